/// Asset entries
///
/// An asset is one derived key pair at a specific index within a
/// derivation chain. Assets are immutable once created, except for the
/// public-to-private upgrade when a private chain extension catches up.
use crate::crypto::ecc;
use crate::encryption::EncryptedPrivateKey;
use crate::error::{CryptoResult, SerializationError};
use crate::util::{BinaryReader, BinaryWriter};

/// Key prefix for asset records.
pub const ASSETENTRY_PREFIX: u8 = 0xAA;
/// Index sentinel for account root assets, which sit outside the chain.
pub const ROOT_ASSET_INDEX: u32 = u32::MAX;

const ASSET_VERSION: u8 = 0x01;
const FLAG_HAS_PRIVKEY: u8 = 0x01;
const FLAG_HAS_BIP32_INFO: u8 = 0x02;

/// Full id of an asset: address-account id, asset-account id and chain
/// index, each big-endian on disk. The concatenation is also the record's
/// key tail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetId {
    pub address_account: u32,
    pub asset_account: u32,
    pub index: u32,
}

impl AssetId {
    pub fn new(address_account: u32, asset_account: u32, index: u32) -> Self {
        Self {
            address_account,
            asset_account,
            index,
        }
    }

    pub fn to_bytes(&self) -> [u8; 12] {
        let mut out = [0u8; 12];
        out[..4].copy_from_slice(&self.address_account.to_be_bytes());
        out[4..8].copy_from_slice(&self.asset_account.to_be_bytes());
        out[8..].copy_from_slice(&self.index.to_be_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SerializationError> {
        if bytes.len() != 12 {
            return Err(SerializationError::LengthMismatch(format!(
                "asset id is {} bytes, expected 12",
                bytes.len()
            )));
        }
        let mut br = BinaryReader::new(bytes);
        Ok(Self {
            address_account: br.get_u32_be()?,
            asset_account: br.get_u32_be()?,
            index: br.get_u32_be()?,
        })
    }

    /// Id of the asset's private key: the full id with a trailing
    /// `0xFFFFFFFF` discriminant.
    pub fn privkey_id(&self) -> Vec<u8> {
        let mut out = self.to_bytes().to_vec();
        out.extend_from_slice(&u32::MAX.to_le_bytes());
        out
    }
}

/// Extra derivation state carried by BIP-32 root assets only.
#[derive(Clone, Debug)]
pub struct Bip32Info {
    pub chaincode: [u8; 32],
    pub depth: u8,
    pub leaf_id: u32,
    pub fingerprint: [u8; 4],
}

#[derive(Clone, Debug)]
pub struct AssetEntry {
    id: AssetId,
    pubkey: Vec<u8>,
    privkey: Option<EncryptedPrivateKey>,
    bip32_info: Option<Bip32Info>,
    needs_commit: bool,
}

impl AssetEntry {
    /// Public-only asset.
    pub fn new_public(id: AssetId, pubkey_uncompressed: Vec<u8>) -> Self {
        Self {
            id,
            pubkey: pubkey_uncompressed,
            privkey: None,
            bip32_info: None,
            needs_commit: true,
        }
    }

    pub fn new_with_private_key(
        id: AssetId,
        pubkey_uncompressed: Vec<u8>,
        privkey: EncryptedPrivateKey,
    ) -> Self {
        Self {
            id,
            pubkey: pubkey_uncompressed,
            privkey: Some(privkey),
            bip32_info: None,
            needs_commit: true,
        }
    }

    pub fn with_bip32_info(mut self, info: Bip32Info) -> Self {
        self.bip32_info = Some(info);
        self
    }

    pub fn id(&self) -> &AssetId {
        &self.id
    }

    pub fn index(&self) -> u32 {
        self.id.index
    }

    /// Uncompressed (65-byte) public key, the stored form.
    pub fn pubkey_uncompressed(&self) -> &[u8] {
        &self.pubkey
    }

    /// Compressed view, computed on demand.
    pub fn pubkey_compressed(&self) -> CryptoResult<Vec<u8>> {
        ecc::compress_point(&self.pubkey)
    }

    pub fn has_private_key(&self) -> bool {
        self.privkey.is_some()
    }

    pub fn privkey(&self) -> Option<&EncryptedPrivateKey> {
        self.privkey.as_ref()
    }

    pub fn bip32_info(&self) -> Option<&Bip32Info> {
        self.bip32_info.as_ref()
    }

    pub fn needs_commit(&self) -> bool {
        self.needs_commit
    }

    pub fn mark_committed(&mut self) {
        self.needs_commit = false;
    }

    /// Watching-only copy: same public material, no private key. Flagged
    /// for commit so the fork persists it.
    pub fn public_copy(&self) -> Self {
        Self {
            id: self.id,
            pubkey: self.pubkey.clone(),
            privkey: None,
            bip32_info: self.bip32_info.clone(),
            needs_commit: true,
        }
    }

    /// Record key within the wallet sub-DB.
    pub fn db_key(&self) -> Vec<u8> {
        let mut key = vec![ASSETENTRY_PREFIX];
        key.extend_from_slice(&self.id.to_bytes());
        key
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut bw = BinaryWriter::new();
        bw.put_u8(ASSET_VERSION);
        let mut flags = 0u8;
        if self.privkey.is_some() {
            flags |= FLAG_HAS_PRIVKEY;
        }
        if self.bip32_info.is_some() {
            flags |= FLAG_HAS_BIP32_INFO;
        }
        bw.put_u8(flags);
        bw.put_bytes(&self.id.to_bytes());
        bw.put_var_bytes(&self.pubkey);
        if let Some(privkey) = &self.privkey {
            bw.put_var_bytes(&privkey.serialize());
        }
        if let Some(info) = &self.bip32_info {
            bw.put_var_bytes(&info.chaincode);
            bw.put_u8(info.depth);
            bw.put_u32_le(info.leaf_id);
            bw.put_bytes(&info.fingerprint);
        }
        bw.into_vec()
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, SerializationError> {
        let mut br = BinaryReader::new(data);
        let version = br.get_u8()?;
        if version != ASSET_VERSION {
            return Err(SerializationError::UnsupportedVersion(version));
        }
        let flags = br.get_u8()?;
        let id = AssetId::from_bytes(br.get_bytes(12)?)?;
        let pubkey = br.get_var_bytes()?;

        let privkey = if flags & FLAG_HAS_PRIVKEY != 0 {
            let blob = br.get_var_bytes()?;
            let mut inner = BinaryReader::new(&blob);
            Some(EncryptedPrivateKey::deserialize(&mut inner)?)
        } else {
            None
        };

        let bip32_info = if flags & FLAG_HAS_BIP32_INFO != 0 {
            let chaincode_bytes = br.get_var_bytes()?;
            let chaincode: [u8; 32] = chaincode_bytes.as_slice().try_into().map_err(|_| {
                SerializationError::LengthMismatch("chaincode is not 32 bytes".to_string())
            })?;
            let depth = br.get_u8()?;
            let leaf_id = br.get_u32_le()?;
            let fingerprint: [u8; 4] = br.get_bytes(4)?.try_into().expect("sliced four bytes");
            Some(Bip32Info {
                chaincode,
                depth,
                leaf_id,
                fingerprint,
            })
        } else {
            None
        };

        Ok(Self {
            id,
            pubkey,
            privkey,
            bip32_info,
            needs_commit: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SecretBytes;
    use crate::encryption::KeyData;

    fn sample_pubkey() -> Vec<u8> {
        let privkey = [7u8; 32];
        ecc::pubkey_from_priv(&privkey).unwrap()
    }

    #[test]
    fn test_asset_id_layout() {
        let id = AssetId::new(0xF6E10000, 0x00000001, 5);
        let bytes = id.to_bytes();
        assert_eq!(&bytes[..4], &[0xF6, 0xE1, 0x00, 0x00]);
        assert_eq!(&bytes[4..8], &[0x00, 0x00, 0x00, 0x01]);
        assert_eq!(&bytes[8..], &[0x00, 0x00, 0x00, 0x05]);
        assert_eq!(AssetId::from_bytes(&bytes).unwrap(), id);

        let privkey_id = id.privkey_id();
        assert_eq!(privkey_id.len(), 16);
        assert_eq!(&privkey_id[12..], &[0xFF, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn test_serialization_round_trip() {
        let id = AssetId::new(1, 2, 3);
        let asset = AssetEntry::new_with_private_key(
            id,
            sample_pubkey(),
            EncryptedPrivateKey {
                id: id.privkey_id(),
                data: KeyData::Clear {
                    key: SecretBytes::from(vec![7u8; 32]),
                },
            },
        )
        .with_bip32_info(Bip32Info {
            chaincode: [9u8; 32],
            depth: 2,
            leaf_id: 0x10000000,
            fingerprint: [1, 2, 3, 4],
        });

        let restored = AssetEntry::deserialize(&asset.serialize()).unwrap();
        assert_eq!(restored.id(), asset.id());
        assert_eq!(restored.pubkey_uncompressed(), asset.pubkey_uncompressed());
        assert!(restored.has_private_key());
        assert_eq!(restored.bip32_info().unwrap().leaf_id, 0x10000000);
        assert!(!restored.needs_commit());
    }

    #[test]
    fn test_public_copy_strips_private_key() {
        let id = AssetId::new(1, 2, 3);
        let asset = AssetEntry::new_with_private_key(
            id,
            sample_pubkey(),
            EncryptedPrivateKey {
                id: id.privkey_id(),
                data: KeyData::Clear {
                    key: SecretBytes::from(vec![7u8; 32]),
                },
            },
        );
        let copy = asset.public_copy();
        assert!(!copy.has_private_key());
        assert!(copy.needs_commit());
        assert_eq!(copy.pubkey_uncompressed(), asset.pubkey_uncompressed());
    }

    #[test]
    fn test_compressed_view_is_derived() {
        let asset = AssetEntry::new_public(AssetId::new(0, 0, 0), sample_pubkey());
        let compressed = asset.pubkey_compressed().unwrap();
        assert_eq!(compressed.len(), 33);
        assert_eq!(
            ecc::uncompress_point(&compressed).unwrap(),
            asset.pubkey_uncompressed()
        );
    }
}
