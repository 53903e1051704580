/// Address accounts
///
/// A group of asset accounts sharing one id, with outer (receive) and
/// inner (change) roles, a permitted set of script types, and per-asset
/// script-type overrides. Account ids for the BIP-32 kinds are derived
/// from the account root with a kind-tag XOR so two accounts on the same
/// root never collide.
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use crate::crypto::hash::hash160;
use crate::crypto::{ecc, random, SecretBytes};
use crate::encryption::{
    Cipher, CipherData, ContainerLock, DecryptedDataContainer, EncryptedPrivateKey, KeyData,
};
use crate::error::{AccountError, SerializationError, WalletError, WalletResult};
use crate::storage::DbTree;
use crate::util::{BinaryReader, BinaryWriter, ReentrantLock};
use crate::wallet::address::{AddressEntry, AddressType};
use crate::wallet::asset::{AssetEntry, AssetId, Bip32Info, ROOT_ASSET_INDEX};
use crate::wallet::asset_account::AssetAccount;
use crate::wallet::bip32::Bip32Node;
use crate::wallet::derivation::DerivationScheme;

pub const ADDRESS_ACCOUNT_PREFIX: u8 = 0xD0;
/// Per-asset script-type override records (wallet data sub-DB only; the
/// headers sub-DB uses the same byte for encryption keys).
pub const ADDRESS_TYPE_PREFIX: u8 = 0xC0;

/// Reserved id of the legacy Armory account.
pub const ARMORY_LEGACY_ACCOUNTID: u32 = 0xF6E1_0000;
/// Reserved id of the imports account.
pub const IMPORTS_ACCOUNTID: u32 = 0x0000_0000;
/// Asset-account id used by the legacy chain.
pub const ARMORY_LEGACY_ASSET_ACCOUNTID: u32 = 0x0000_0001;
/// Outer/inner derivation nodes of the BIP-32 legacy kind.
pub const BIP32_LEGACY_OUTER_NODE: u32 = 0x0000_0000;
pub const BIP32_LEGACY_INNER_NODE: u32 = 0x0000_0001;
/// Outer/inner derivation nodes of the BIP-32 segwit kind.
pub const BIP32_SEGWIT_OUTER_NODE: u32 = 0x1000_0000;
pub const BIP32_SEGWIT_INNER_NODE: u32 = 0x1000_0001;
/// Asset-account id of ECDH chains.
pub const ECDH_ASSET_ACCOUNTID: u32 = 0x2000_0000;
/// Custom-account sentinel: no further derivation below the root.
pub const BIP32_NO_DERIVATION_NODE: u32 = u32::MAX;

const ADDRESS_ACCOUNT_VERSION: u8 = 0x01;

/// Account kinds the wallet can lay down; the tag byte feeds the id XOR.
pub enum AccountKind {
    ArmoryLegacy,
    Bip32Legacy,
    Bip32SegWit,
    Bip32Custom {
        nodes: Vec<u32>,
        outer: Option<u32>,
        inner: Option<u32>,
        address_types: BTreeSet<AddressType>,
        default_type: AddressType,
    },
    Bip32Salted {
        nodes: Vec<u32>,
        outer: Option<u32>,
        inner: Option<u32>,
        address_types: BTreeSet<AddressType>,
        default_type: AddressType,
        salt: SecretBytes,
    },
    Ecdh,
}

impl AccountKind {
    pub fn tag(&self) -> u8 {
        match self {
            Self::ArmoryLegacy => 0x00,
            Self::Bip32Legacy => 0x01,
            Self::Bip32SegWit => 0x02,
            Self::Bip32Custom { .. } => 0x03,
            Self::Bip32Salted { .. } => 0x04,
            Self::Ecdh => 0x05,
        }
    }
}

/// Root material an account is built on.
pub enum AccountRoot<'a> {
    Armory135 {
        privkey: Option<&'a SecretBytes>,
        pubkey: &'a [u8],
        chaincode: &'a [u8],
    },
    Bip32(&'a Bip32Node),
}

/// Kind-tag-separated account id: hash160 of the root public key with its
/// leading byte XORed by the kind tag, truncated to four bytes.
fn account_id_from_pubkey(pubkey_uncompressed: &[u8], tag: u8) -> Result<u32, AccountError> {
    let mut tweaked = pubkey_uncompressed.to_vec();
    tweaked[0] ^= tag;
    let digest = hash160(&tweaked);
    let id = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    if id == ARMORY_LEGACY_ACCOUNTID || id == IMPORTS_ACCOUNTID {
        return Err(AccountError::AccountIdCollision);
    }
    Ok(id)
}

pub struct AddressAccount {
    id: u32,
    asset_accounts: BTreeMap<u32, AssetAccount>,
    address_types: BTreeSet<AddressType>,
    default_type: AddressType,
    outer_account: u32,
    inner_account: u32,
    overrides: HashMap<AssetId, AddressType>,
    lock: Arc<ReentrantLock>,
}

impl AddressAccount {
    /// Lay down a fresh account per the creation matrix, derive the root
    /// assets, and extend the look-ahead.
    #[allow(clippy::too_many_arguments)]
    pub fn make_new(
        kind: &AccountKind,
        root: &AccountRoot<'_>,
        container: &DecryptedDataContainer,
        scope: &ContainerLock<'_>,
        tree: &DbTree,
        cipher_template: Option<&Cipher>,
        lookup: u32,
    ) -> WalletResult<Self> {
        let mut account = match (kind, root) {
            (AccountKind::ArmoryLegacy, AccountRoot::Armory135 { privkey, pubkey, chaincode }) => {
                let id = ARMORY_LEGACY_ACCOUNTID;
                let root_id =
                    AssetId::new(id, ARMORY_LEGACY_ASSET_ACCOUNTID, ROOT_ASSET_INDEX);
                let root_asset = build_root_asset(
                    root_id,
                    pubkey.to_vec(),
                    *privkey,
                    None,
                    container,
                    scope,
                    cipher_template,
                )?;
                let chain = AssetAccount::new(
                    ARMORY_LEGACY_ASSET_ACCOUNTID,
                    id,
                    Some(root_asset),
                    DerivationScheme::ArmoryLegacy {
                        chaincode: SecretBytes::from(*chaincode),
                    },
                    lookup,
                );
                let mut asset_accounts = BTreeMap::new();
                asset_accounts.insert(ARMORY_LEGACY_ASSET_ACCOUNTID, chain);
                Self {
                    id,
                    asset_accounts,
                    address_types: BTreeSet::from([AddressType::P2pkh]),
                    default_type: AddressType::P2pkh,
                    outer_account: ARMORY_LEGACY_ASSET_ACCOUNTID,
                    inner_account: ARMORY_LEGACY_ASSET_ACCOUNTID,
                    overrides: HashMap::new(),
                    lock: Arc::new(ReentrantLock::new()),
                }
            }
            (AccountKind::Ecdh, AccountRoot::Bip32(node)) => {
                let root_pub = ecc::uncompress_point(node.pubkey())?;
                let id = account_id_from_pubkey(&root_pub, kind.tag())?;
                let root_id = AssetId::new(id, ECDH_ASSET_ACCOUNTID, ROOT_ASSET_INDEX);
                let root_asset = build_root_asset(
                    root_id,
                    root_pub,
                    node.privkey(),
                    None,
                    container,
                    scope,
                    cipher_template,
                )?;
                let mut scheme_id = [0u8; 8];
                random::fill_random(&mut scheme_id)?;
                let chain = AssetAccount::new(
                    ECDH_ASSET_ACCOUNTID,
                    id,
                    Some(root_asset),
                    DerivationScheme::Ecdh {
                        id: scheme_id,
                        salts: BTreeMap::new(),
                    },
                    1,
                );
                let mut asset_accounts = BTreeMap::new();
                asset_accounts.insert(ECDH_ASSET_ACCOUNTID, chain);
                Self {
                    id,
                    asset_accounts,
                    address_types: BTreeSet::from([AddressType::P2wpkh]),
                    default_type: AddressType::P2wpkh,
                    outer_account: ECDH_ASSET_ACCOUNTID,
                    inner_account: ECDH_ASSET_ACCOUNTID,
                    overrides: HashMap::new(),
                    lock: Arc::new(ReentrantLock::new()),
                }
            }
            (
                kind @ (AccountKind::Bip32Legacy
                | AccountKind::Bip32SegWit
                | AccountKind::Bip32Custom { .. }
                | AccountKind::Bip32Salted { .. }),
                AccountRoot::Bip32(node),
            ) => {
                let root_pub = ecc::uncompress_point(node.pubkey())?;
                let id = account_id_from_pubkey(&root_pub, kind.tag())?;

                let (nodes, outer, inner, address_types, default_type, salt) = match kind {
                    AccountKind::Bip32Legacy => (
                        vec![BIP32_LEGACY_OUTER_NODE, BIP32_LEGACY_INNER_NODE],
                        BIP32_LEGACY_OUTER_NODE,
                        BIP32_LEGACY_INNER_NODE,
                        BTreeSet::from([AddressType::P2pkh, AddressType::P2pk]),
                        AddressType::P2pkh,
                        None,
                    ),
                    AccountKind::Bip32SegWit => (
                        vec![BIP32_SEGWIT_OUTER_NODE, BIP32_SEGWIT_INNER_NODE],
                        BIP32_SEGWIT_OUTER_NODE,
                        BIP32_SEGWIT_INNER_NODE,
                        BTreeSet::from([AddressType::P2wpkh, AddressType::NestedP2wpkh]),
                        AddressType::P2wpkh,
                        None,
                    ),
                    AccountKind::Bip32Custom {
                        nodes,
                        outer,
                        inner,
                        address_types,
                        default_type,
                    } => {
                        let nodes = if nodes.is_empty() {
                            vec![BIP32_NO_DERIVATION_NODE]
                        } else {
                            nodes.clone()
                        };
                        let outer_id = (*outer).unwrap_or(nodes[0]);
                        (
                            nodes,
                            outer_id,
                            (*inner).unwrap_or(outer_id),
                            address_types.clone(),
                            *default_type,
                            None,
                        )
                    }
                    AccountKind::Bip32Salted {
                        nodes,
                        outer,
                        inner,
                        address_types,
                        default_type,
                        salt,
                    } => {
                        let nodes = if nodes.is_empty() {
                            vec![BIP32_NO_DERIVATION_NODE]
                        } else {
                            nodes.clone()
                        };
                        let outer_id = (*outer).unwrap_or(nodes[0]);
                        (
                            nodes,
                            outer_id,
                            (*inner).unwrap_or(outer_id),
                            address_types.clone(),
                            *default_type,
                            Some(salt.clone()),
                        )
                    }
                    _ => unreachable!("armory/ecdh handled above"),
                };

                let mut asset_accounts = BTreeMap::new();
                for node_id in nodes {
                    let derived = if node_id == BIP32_NO_DERIVATION_NODE {
                        (*node).clone()
                    } else {
                        node.derive(node_id)?
                    };
                    let root_id = AssetId::new(id, node_id, ROOT_ASSET_INDEX);
                    let info = Bip32Info {
                        chaincode: *derived.chaincode(),
                        depth: derived.depth(),
                        leaf_id: node_id,
                        fingerprint: derived.fingerprint(),
                    };
                    let root_asset = build_root_asset(
                        root_id,
                        ecc::uncompress_point(derived.pubkey())?,
                        derived.privkey(),
                        Some(info),
                        container,
                        scope,
                        cipher_template,
                    )?;
                    let scheme = match &salt {
                        Some(salt) => DerivationScheme::Bip32Salted {
                            chaincode: *derived.chaincode(),
                            depth: derived.depth(),
                            leaf_id: node_id,
                            salt: salt.clone(),
                        },
                        None => DerivationScheme::Bip32 {
                            chaincode: *derived.chaincode(),
                            depth: derived.depth(),
                            leaf_id: node_id,
                        },
                    };
                    asset_accounts.insert(
                        node_id,
                        AssetAccount::new(node_id, id, Some(root_asset), scheme, lookup),
                    );
                }

                Self {
                    id,
                    asset_accounts,
                    address_types,
                    default_type,
                    outer_account: outer,
                    inner_account: inner,
                    overrides: HashMap::new(),
                    lock: Arc::new(ReentrantLock::new()),
                }
            }
            _ => {
                return Err(WalletError::InvalidInput(
                    "account kind does not match root material".to_string(),
                ))
            }
        };

        // Initial look-ahead, private when the root allows it. ECDH chains
        // wait for salts.
        for chain in account.asset_accounts.values_mut() {
            if matches!(chain.derivation(), DerivationScheme::Ecdh { .. }) {
                continue;
            }
            let has_priv = chain.root().is_some_and(|r| r.has_private_key());
            let target = chain.lookup().saturating_sub(1);
            if has_priv {
                chain.extend_private_chain_to_index(container, scope, tree, target)?;
            } else {
                chain.extend_public_chain_to_index(tree, target)?;
            }
        }

        account.commit(tree)?;
        Ok(account)
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn address_types(&self) -> &BTreeSet<AddressType> {
        &self.address_types
    }

    pub fn default_type(&self) -> AddressType {
        self.default_type
    }

    pub fn outer_account_id(&self) -> u32 {
        self.outer_account
    }

    pub fn inner_account_id(&self) -> u32 {
        self.inner_account
    }

    pub fn asset_accounts(&self) -> impl Iterator<Item = &AssetAccount> {
        self.asset_accounts.values()
    }

    pub fn asset_account(&self, id: u32) -> Option<&AssetAccount> {
        self.asset_accounts.get(&id)
    }

    pub fn asset_account_mut(&mut self, id: u32) -> Option<&mut AssetAccount> {
        self.asset_accounts.get_mut(&id)
    }

    /// New receive address from the outer chain.
    pub fn get_new_address(
        &mut self,
        tree: &DbTree,
        address_type: Option<AddressType>,
    ) -> WalletResult<AddressEntry> {
        self.new_address_from(tree, self.outer_account, address_type)
    }

    /// New change address from the inner chain.
    pub fn get_new_change_address(
        &mut self,
        tree: &DbTree,
        address_type: Option<AddressType>,
    ) -> WalletResult<AddressEntry> {
        self.new_address_from(tree, self.inner_account, address_type)
    }

    fn new_address_from(
        &mut self,
        tree: &DbTree,
        chain_id: u32,
        address_type: Option<AddressType>,
    ) -> WalletResult<AddressEntry> {
        let lock = Arc::clone(&self.lock);
        let _guard = lock.acquire();
        let address_type = address_type.unwrap_or(self.default_type);
        if !self.address_types.contains(&address_type) {
            return Err(AccountError::UnsupportedScriptType.into());
        }
        let asset = self
            .asset_accounts
            .get_mut(&chain_id)
            .ok_or(AccountError::UnknownAccount(chain_id))?
            .get_new_asset(tree)?;
        self.set_address_type(tree, *asset.id(), address_type)?;
        AddressEntry::new(asset, address_type)
    }

    /// Record or erase a per-asset script-type override. The default type
    /// is implicit and never stored.
    pub fn set_address_type(
        &mut self,
        tree: &DbTree,
        asset_id: AssetId,
        address_type: AddressType,
    ) -> WalletResult<()> {
        let mut key = vec![ADDRESS_TYPE_PREFIX];
        key.extend_from_slice(&asset_id.to_bytes());
        if address_type == self.default_type {
            if self.overrides.remove(&asset_id).is_some() {
                tree.delete(&key)?;
            }
        } else {
            self.overrides.insert(asset_id, address_type);
            let mut bw = BinaryWriter::new();
            bw.put_u32_le(address_type.to_u32());
            tree.put(&key, bw.as_slice())?;
        }
        Ok(())
    }

    /// The type an existing asset was handed out as.
    pub fn address_type_for_id(&self, asset_id: &AssetId) -> AddressType {
        self.overrides
            .get(asset_id)
            .copied()
            .unwrap_or(self.default_type)
    }

    pub fn get_asset_for_id(&self, asset_id: &AssetId) -> WalletResult<&AssetEntry> {
        self.asset_accounts
            .get(&asset_id.asset_account)
            .and_then(|chain| chain.get_asset(asset_id.index))
            .ok_or_else(|| AccountError::UnknownAsset.into())
    }

    /// Address entry for an existing asset, honoring any override.
    pub fn get_address_entry_for_id(&self, asset_id: &AssetId) -> WalletResult<AddressEntry> {
        let asset = self.get_asset_for_id(asset_id)?.clone();
        AddressEntry::new(asset, self.address_type_for_id(asset_id))
    }

    /// Merged hash map over all chains.
    pub fn get_address_hash_map(
        &self,
    ) -> WalletResult<HashMap<AssetId, HashMap<AddressType, Vec<u8>>>> {
        let mut merged = HashMap::new();
        for chain in self.asset_accounts.values() {
            merged.extend(chain.get_address_hash_map(&self.address_types)?);
        }
        Ok(merged)
    }

    pub fn extend_public_chain(&mut self, tree: &DbTree, count: u32) -> WalletResult<()> {
        for chain in self.asset_accounts.values_mut() {
            chain.extend_public_chain(tree, count)?;
        }
        Ok(())
    }

    pub fn extend_private_chain(
        &mut self,
        container: &DecryptedDataContainer,
        scope: &ContainerLock<'_>,
        tree: &DbTree,
        count: u32,
    ) -> WalletResult<()> {
        for chain in self.asset_accounts.values_mut() {
            chain.extend_private_chain(container, scope, tree, count)?;
        }
        Ok(())
    }

    fn header_key(&self) -> Vec<u8> {
        let mut key = vec![ADDRESS_ACCOUNT_PREFIX];
        key.extend_from_slice(&self.id.to_be_bytes());
        key
    }

    pub fn commit(&mut self, tree: &DbTree) -> WalletResult<()> {
        let lock = Arc::clone(&self.lock);
        let _guard = lock.acquire();
        let mut bw = BinaryWriter::new();
        bw.put_u8(ADDRESS_ACCOUNT_VERSION);
        bw.put_u32_be(self.outer_account);
        bw.put_u32_be(self.inner_account);
        bw.put_u32_le(self.default_type.to_u32());
        bw.put_var_int(self.address_types.len() as u64);
        for address_type in &self.address_types {
            bw.put_u32_le(address_type.to_u32());
        }
        bw.put_var_int(self.asset_accounts.len() as u64);
        for chain_id in self.asset_accounts.keys() {
            bw.put_u32_be(*chain_id);
        }
        tree.put(&self.header_key(), bw.as_slice())?;

        for chain in self.asset_accounts.values_mut() {
            chain.commit(tree)?;
        }
        Ok(())
    }

    pub fn load(tree: &DbTree, id: u32) -> WalletResult<Self> {
        let mut key = vec![ADDRESS_ACCOUNT_PREFIX];
        key.extend_from_slice(&id.to_be_bytes());
        let header = tree.get_existing(&key)?;
        let mut br = BinaryReader::new(&header);
        let version = br.get_u8()?;
        if version != ADDRESS_ACCOUNT_VERSION {
            return Err(SerializationError::UnsupportedVersion(version).into());
        }
        let outer_account = br.get_u32_be()?;
        let inner_account = br.get_u32_be()?;
        let default_type = AddressType::from_u32(br.get_u32_le()?)?;
        let type_count = br.get_var_int()? as usize;
        let mut address_types = BTreeSet::new();
        for _ in 0..type_count {
            address_types.insert(AddressType::from_u32(br.get_u32_le()?)?);
        }
        let chain_count = br.get_var_int()? as usize;
        let mut asset_accounts = BTreeMap::new();
        for _ in 0..chain_count {
            let chain_id = br.get_u32_be()?;
            asset_accounts.insert(chain_id, AssetAccount::load(tree, id, chain_id)?);
        }

        // Script-type overrides: key tail is the 12-byte asset id.
        let mut overrides = HashMap::new();
        let mut override_prefix = vec![ADDRESS_TYPE_PREFIX];
        override_prefix.extend_from_slice(&id.to_be_bytes());
        for (record_key, value) in tree.scan_prefix(&override_prefix)? {
            let asset_id = AssetId::from_bytes(&record_key[1..])?;
            let mut vbr = BinaryReader::new(&value);
            overrides.insert(asset_id, AddressType::from_u32(vbr.get_u32_le()?)?);
        }

        Ok(Self {
            id,
            asset_accounts,
            address_types,
            default_type,
            outer_account,
            inner_account,
            overrides,
            lock: Arc::new(ReentrantLock::new()),
        })
    }

    /// Watching-only mirror with public copies of every chain.
    pub fn watching_only_copy(&self) -> Self {
        Self {
            id: self.id,
            asset_accounts: self
                .asset_accounts
                .iter()
                .map(|(id, chain)| (*id, chain.watching_only_copy()))
                .collect(),
            address_types: self.address_types.clone(),
            default_type: self.default_type,
            outer_account: self.outer_account,
            inner_account: self.inner_account,
            overrides: self.overrides.clone(),
            lock: Arc::new(ReentrantLock::new()),
        }
    }
}

fn build_root_asset(
    id: AssetId,
    pubkey_uncompressed: Vec<u8>,
    privkey: Option<&SecretBytes>,
    bip32_info: Option<Bip32Info>,
    container: &DecryptedDataContainer,
    scope: &ContainerLock<'_>,
    cipher_template: Option<&Cipher>,
) -> WalletResult<AssetEntry> {
    let asset = match privkey {
        Some(plain) => {
            let data = match cipher_template {
                Some(template) => {
                    let cipher = template.for_new_plaintext()?;
                    let ciphertext = container.encrypt_data(scope, &cipher, plain.as_slice())?;
                    KeyData::Encrypted {
                        data: CipherData::new(ciphertext, cipher),
                    }
                }
                None => KeyData::Clear { key: plain.clone() },
            };
            AssetEntry::new_with_private_key(
                id,
                pubkey_uncompressed,
                EncryptedPrivateKey {
                    id: id.privkey_id(),
                    data,
                },
            )
        }
        None => AssetEntry::new_public(id, pubkey_uncompressed),
    };
    Ok(match bip32_info {
        Some(info) => asset.with_bip32_info(info),
        None => asset,
    })
}
