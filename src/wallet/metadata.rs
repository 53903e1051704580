/// Metadata accounts
///
/// A secondary account kind for non-key records: free-form comments and
/// the authorized-peers table used to authenticate encrypted-handshake
/// peers. Entries replay from disk on load; unparseable records are
/// logged and skipped rather than failing the wallet open.
use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::warn;

use crate::error::{SerializationError, WalletError, WalletResult};
use crate::storage::{DbTree, WriteBatch};
use crate::util::{BinaryReader, BinaryWriter, ReentrantLock};

pub const META_ACCOUNT_PREFIX: u8 = 0xF1;
pub const METADATA_COMMENT_PREFIX: u8 = 0xF2;
pub const METADATA_AUTHPEER_PREFIX: u8 = 0xF3;

const META_ASSET_COMMENT: u8 = 0x01;
const META_ASSET_PEER: u8 = 0x02;
const META_ASSET_PEER_ROOT: u8 = 0x03;
const META_ASSET_ROOT_SIGNATURE: u8 = 0x04;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetaAccountKind {
    Comments,
    AuthPeers,
}

impl MetaAccountKind {
    pub fn code(self) -> u32 {
        match self {
            Self::Comments => 0x0000_0001,
            Self::AuthPeers => 0x0000_0002,
        }
    }

    pub fn from_code(code: u32) -> Result<Self, SerializationError> {
        match code {
            0x0000_0001 => Ok(Self::Comments),
            0x0000_0002 => Ok(Self::AuthPeers),
            other => Err(SerializationError::UnknownTag(other as u8)),
        }
    }

    fn asset_prefix(self) -> u8 {
        match self {
            Self::Comments => METADATA_COMMENT_PREFIX,
            Self::AuthPeers => METADATA_AUTHPEER_PREFIX,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MetaAsset {
    Comment {
        key: Vec<u8>,
        text: String,
    },
    /// A named peer public key (compressed secp256k1).
    AuthPeer {
        pubkey: Vec<u8>,
        names: Vec<String>,
    },
    /// A trusted root key peers may rotate under.
    AuthPeerRoot {
        pubkey: Vec<u8>,
        description: String,
        key_index: u32,
    },
    /// Signature binding our own key to a root key.
    RootSignature {
        pubkey: Vec<u8>,
        signature: Vec<u8>,
    },
}

impl MetaAsset {
    pub fn serialize(&self) -> Vec<u8> {
        let mut bw = BinaryWriter::new();
        match self {
            Self::Comment { key, text } => {
                bw.put_u8(META_ASSET_COMMENT);
                bw.put_var_bytes(key);
                bw.put_var_bytes(text.as_bytes());
            }
            Self::AuthPeer { pubkey, names } => {
                bw.put_u8(META_ASSET_PEER);
                bw.put_var_bytes(pubkey);
                bw.put_var_int(names.len() as u64);
                for name in names {
                    bw.put_var_bytes(name.as_bytes());
                }
            }
            Self::AuthPeerRoot {
                pubkey,
                description,
                key_index,
            } => {
                bw.put_u8(META_ASSET_PEER_ROOT);
                bw.put_var_bytes(pubkey);
                bw.put_var_bytes(description.as_bytes());
                bw.put_u32_le(*key_index);
            }
            Self::RootSignature { pubkey, signature } => {
                bw.put_u8(META_ASSET_ROOT_SIGNATURE);
                bw.put_var_bytes(pubkey);
                bw.put_var_bytes(signature);
            }
        }
        bw.into_vec()
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, SerializationError> {
        let mut br = BinaryReader::new(data);
        match br.get_u8()? {
            META_ASSET_COMMENT => Ok(Self::Comment {
                key: br.get_var_bytes()?,
                text: read_string(&mut br)?,
            }),
            META_ASSET_PEER => {
                let pubkey = br.get_var_bytes()?;
                let count = br.get_var_int()? as usize;
                let mut names = Vec::with_capacity(count);
                for _ in 0..count {
                    names.push(read_string(&mut br)?);
                }
                Ok(Self::AuthPeer { pubkey, names })
            }
            META_ASSET_PEER_ROOT => Ok(Self::AuthPeerRoot {
                pubkey: br.get_var_bytes()?,
                description: read_string(&mut br)?,
                key_index: br.get_u32_le()?,
            }),
            META_ASSET_ROOT_SIGNATURE => Ok(Self::RootSignature {
                pubkey: br.get_var_bytes()?,
                signature: br.get_var_bytes()?,
            }),
            other => Err(SerializationError::UnknownTag(other)),
        }
    }
}

fn read_string(br: &mut BinaryReader<'_>) -> Result<String, SerializationError> {
    let bytes = br.get_var_bytes()?;
    String::from_utf8(bytes)
        .map_err(|_| SerializationError::LengthMismatch("invalid utf-8 string".to_string()))
}

struct MetaEntry {
    asset: Option<MetaAsset>,
    needs_commit: bool,
}

pub struct MetaAccount {
    kind: MetaAccountKind,
    entries: BTreeMap<u32, MetaEntry>,
    lock: Arc<ReentrantLock>,
}

impl MetaAccount {
    pub fn new(kind: MetaAccountKind) -> Self {
        Self {
            kind,
            entries: BTreeMap::new(),
            lock: Arc::new(ReentrantLock::new()),
        }
    }

    pub fn kind(&self) -> MetaAccountKind {
        self.kind
    }

    pub fn assets(&self) -> impl Iterator<Item = (u32, &MetaAsset)> {
        self.entries
            .iter()
            .filter_map(|(index, entry)| entry.asset.as_ref().map(|a| (*index, a)))
    }

    pub fn get(&self, index: u32) -> Option<&MetaAsset> {
        self.entries.get(&index).and_then(|e| e.asset.as_ref())
    }

    pub fn insert(&mut self, asset: MetaAsset) -> u32 {
        let _guard = self.lock.acquire();
        let index = self
            .entries
            .keys()
            .next_back()
            .map_or(0, |last| last + 1);
        self.entries.insert(
            index,
            MetaEntry {
                asset: Some(asset),
                needs_commit: true,
            },
        );
        index
    }

    pub fn update(&mut self, index: u32, asset: MetaAsset) {
        let _guard = self.lock.acquire();
        self.entries.insert(
            index,
            MetaEntry {
                asset: Some(asset),
                needs_commit: true,
            },
        );
    }

    /// Mark an entry erased; the record is deleted at the next commit.
    pub fn erase(&mut self, index: u32) {
        let _guard = self.lock.acquire();
        if let Some(entry) = self.entries.get_mut(&index) {
            entry.asset = None;
            entry.needs_commit = true;
        }
    }

    fn header_key(&self) -> Vec<u8> {
        let mut key = vec![META_ACCOUNT_PREFIX];
        key.extend_from_slice(&self.kind.code().to_be_bytes());
        key
    }

    /// Write flagged entries in one batch; erased entries are deleted.
    pub fn commit(&mut self, tree: &DbTree) -> WalletResult<()> {
        let lock = Arc::clone(&self.lock);
        let _guard = lock.acquire();
        let mut batch = WriteBatch::new();

        let mut bw = BinaryWriter::new();
        bw.put_u32_le(self.kind.code());
        batch.put(&self.header_key(), bw.as_slice());

        let kind = self.kind;
        for (index, entry) in self.entries.iter_mut() {
            if !entry.needs_commit {
                continue;
            }
            let mut record_key = vec![kind.asset_prefix()];
            record_key.extend_from_slice(&kind.code().to_be_bytes());
            record_key.extend_from_slice(&index.to_be_bytes());
            match &entry.asset {
                Some(asset) => batch.put(&record_key, &asset.serialize()),
                None => batch.delete(&record_key),
            }
            entry.needs_commit = false;
        }
        tree.apply_batch(batch)?;
        Ok(())
    }

    /// Replay entries from disk, tolerating occasional parse failures.
    pub fn load(tree: &DbTree, kind: MetaAccountKind) -> WalletResult<Self> {
        let mut account = Self::new(kind);
        let mut prefix = vec![kind.asset_prefix()];
        prefix.extend_from_slice(&kind.code().to_be_bytes());
        for (key, value) in tree.scan_prefix(&prefix)? {
            let index = u32::from_be_bytes(
                key[key.len() - 4..]
                    .try_into()
                    .expect("sliced four bytes"),
            );
            match MetaAsset::deserialize(&value) {
                Ok(asset) => {
                    account.entries.insert(
                        index,
                        MetaEntry {
                            asset: Some(asset),
                            needs_commit: false,
                        },
                    );
                }
                Err(e) => warn!(index, "skipping unreadable meta asset: {e}"),
            }
        }
        Ok(account)
    }

    // Comment helpers.

    fn comment_index(&self, key: &[u8]) -> Option<u32> {
        self.assets().find_map(|(index, asset)| match asset {
            MetaAsset::Comment { key: k, .. } if k == key => Some(index),
            _ => None,
        })
    }

    pub fn set_comment(&mut self, key: &[u8], text: &str) -> WalletResult<()> {
        if self.kind != MetaAccountKind::Comments {
            return Err(WalletError::InvalidInput(
                "not a comments account".to_string(),
            ));
        }
        let asset = MetaAsset::Comment {
            key: key.to_vec(),
            text: text.to_string(),
        };
        match self.comment_index(key) {
            Some(index) => self.update(index, asset),
            None => {
                self.insert(asset);
            }
        }
        Ok(())
    }

    pub fn get_comment(&self, key: &[u8]) -> Option<&str> {
        self.assets().find_map(|(_, asset)| match asset {
            MetaAsset::Comment { key: k, text } if k == key => Some(text.as_str()),
            _ => None,
        })
    }

    pub fn delete_comment(&mut self, key: &[u8]) -> bool {
        match self.comment_index(key) {
            Some(index) => {
                self.erase(index);
                true
            }
            None => false,
        }
    }
}

/// Flat projections of an authorized-peers account, in the shape the
/// handshake consumer wants.
#[derive(Debug, Default)]
pub struct PeerProjection {
    /// name -> compressed public key
    pub name_map: BTreeMap<String, Vec<u8>>,
    /// root public key -> (description, key index)
    pub root_peers: BTreeMap<Vec<u8>, (String, u32)>,
    /// our root key and the signature over our own key, if set
    pub root_signature: Option<(Vec<u8>, Vec<u8>)>,
}

impl PeerProjection {
    pub fn from_account(account: &MetaAccount) -> Self {
        let mut projection = Self::default();
        for (_, asset) in account.assets() {
            match asset {
                MetaAsset::AuthPeer { pubkey, names } => {
                    for name in names {
                        projection.name_map.insert(name.clone(), pubkey.clone());
                    }
                }
                MetaAsset::AuthPeerRoot {
                    pubkey,
                    description,
                    key_index,
                } => {
                    projection
                        .root_peers
                        .insert(pubkey.clone(), (description.clone(), *key_index));
                }
                MetaAsset::RootSignature { pubkey, signature } => {
                    projection.root_signature = Some((pubkey.clone(), signature.clone()));
                }
                MetaAsset::Comment { .. } => {}
            }
        }
        projection
    }
}
