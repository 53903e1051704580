/// Derivation schemes
///
/// Four ways of growing a chain of assets from a parent: the classic
/// chain-code multiplication of Armory-135 wallets, BIP-32 soft
/// derivation, salted BIP-32, and per-salt ECDH. Armory-135 extends from
/// the last known asset; the BIP-32 family and ECDH extend from the
/// account root.
use std::collections::BTreeMap;

use crate::crypto::hash::hash256;
use crate::crypto::{ecc, SecretBytes};
use crate::encryption::{
    Cipher, CipherData, ContainerLock, DecryptedDataContainer, EncryptedPrivateKey, KeyData,
};
use crate::error::{DerivationError, SerializationError, WalletResult};
use crate::util::{BinaryReader, BinaryWriter};
use crate::wallet::asset::{AssetEntry, AssetId, ROOT_ASSET_INDEX};
use crate::wallet::bip32::{Bip32Node, HARDENED_START};

pub const DERIVATION_SCHEME_LEGACY: u8 = 0xA0;
pub const DERIVATION_SCHEME_BIP32: u8 = 0xA1;
pub const DERIVATION_SCHEME_BIP32_SALTED: u8 = 0xA2;
pub const DERIVATION_SCHEME_BIP32_ECDH: u8 = 0xA3;

/// Armory-135 chain step scalar: the fixed chaincode XORed with the
/// hash256 of the parent public key.
fn legacy_chain_scalar(chaincode: &[u8], parent_pubkey: &[u8]) -> Vec<u8> {
    let digest = hash256(parent_pubkey);
    chaincode
        .iter()
        .zip(digest.iter())
        .map(|(a, b)| a ^ b)
        .collect()
}

pub enum DerivationScheme {
    ArmoryLegacy {
        chaincode: SecretBytes,
    },
    Bip32 {
        chaincode: [u8; 32],
        depth: u8,
        leaf_id: u32,
    },
    Bip32Salted {
        chaincode: [u8; 32],
        depth: u8,
        leaf_id: u32,
        salt: SecretBytes,
    },
    Ecdh {
        id: [u8; 8],
        salts: BTreeMap<Vec<u8>, u32>,
    },
}

impl DerivationScheme {
    pub fn tag(&self) -> u8 {
        match self {
            Self::ArmoryLegacy { .. } => DERIVATION_SCHEME_LEGACY,
            Self::Bip32 { .. } => DERIVATION_SCHEME_BIP32,
            Self::Bip32Salted { .. } => DERIVATION_SCHEME_BIP32_SALTED,
            Self::Ecdh { .. } => DERIVATION_SCHEME_BIP32_ECDH,
        }
    }

    /// Armory-135 grows off the last asset; everything else derives from
    /// the account root.
    pub fn extends_from_last_asset(&self) -> bool {
        matches!(self, Self::ArmoryLegacy { .. })
    }

    /// ECDH chains hand out exactly one key per registered salt.
    pub fn default_lookup(&self) -> u32 {
        match self {
            Self::Ecdh { .. } => 1,
            _ => crate::wallet::asset_account::DEFAULT_LOOKUP,
        }
    }

    /// Register a new ECDH salt; the next free index is assigned.
    pub fn add_salt(&mut self, salt: &[u8]) -> WalletResult<u32> {
        let Self::Ecdh { salts, .. } = self else {
            return Err(DerivationError::SaltAlreadyPresent.into());
        };
        if salts.contains_key(salt) {
            return Err(DerivationError::SaltAlreadyPresent.into());
        }
        let index = salts.len() as u32;
        salts.insert(salt.to_vec(), index);
        Ok(index)
    }

    pub fn salt_map(&self) -> Option<&BTreeMap<Vec<u8>, u32>> {
        match self {
            Self::Ecdh { salts, .. } => Some(salts),
            _ => None,
        }
    }

    pub fn insert_salt_at_index(&mut self, salt: Vec<u8>, index: u32) {
        if let Self::Ecdh { salts, .. } = self {
            salts.insert(salt, index);
        }
    }

    fn ecdh_salt_for_index(&self, index: u32) -> Option<&[u8]> {
        match self {
            Self::Ecdh { salts, .. } => salts
                .iter()
                .find(|(_, i)| **i == index)
                .map(|(salt, _)| salt.as_slice()),
            _ => None,
        }
    }

    fn bip32_node_from_pub(&self, pubkey: &[u8]) -> WalletResult<Bip32Node> {
        let (chaincode, depth, leaf_id) = match self {
            Self::Bip32 {
                chaincode,
                depth,
                leaf_id,
            }
            | Self::Bip32Salted {
                chaincode,
                depth,
                leaf_id,
                ..
            } => (*chaincode, *depth, *leaf_id),
            _ => return Err(DerivationError::InvalidChildKey.into()),
        };
        Bip32Node::from_public(pubkey.to_vec(), chaincode, depth, [0u8; 4], leaf_id)
    }

    fn bip32_node_from_priv(&self, privkey: &SecretBytes) -> WalletResult<Bip32Node> {
        let (chaincode, depth, leaf_id) = match self {
            Self::Bip32 {
                chaincode,
                depth,
                leaf_id,
            }
            | Self::Bip32Salted {
                chaincode,
                depth,
                leaf_id,
                ..
            } => (*chaincode, *depth, *leaf_id),
            _ => return Err(DerivationError::InvalidChildKey.into()),
        };
        Bip32Node::from_private(privkey.clone(), chaincode, depth, [0u8; 4], leaf_id)
    }

    /// Produce public-only assets for the inclusive index range.
    pub fn extend_public_chain(
        &self,
        parent: &AssetEntry,
        start: u32,
        end: u32,
    ) -> WalletResult<Vec<AssetEntry>> {
        let mut out = Vec::new();
        match self {
            Self::ArmoryLegacy { chaincode } => {
                let mut prev_pubkey = parent.pubkey_uncompressed().to_vec();
                for index in start..=end {
                    let scalar = legacy_chain_scalar(chaincode.as_slice(), &prev_pubkey);
                    let pubkey = ecc::point_tweak_mul(&prev_pubkey, &scalar)?;
                    let id = AssetId::new(
                        parent.id().address_account,
                        parent.id().asset_account,
                        index,
                    );
                    out.push(AssetEntry::new_public(id, pubkey.clone()));
                    prev_pubkey = pubkey;
                }
            }
            Self::Bip32 { .. } | Self::Bip32Salted { .. } => {
                let root_pub = parent.pubkey_compressed()?;
                let node = self.bip32_node_from_pub(&root_pub)?;
                for index in start..=end {
                    if index >= HARDENED_START {
                        return Err(DerivationError::HardenedFromPublic.into());
                    }
                    let child = node.derive_public(index)?;
                    let mut pubkey = child.pubkey().to_vec();
                    if let Self::Bip32Salted { salt, .. } = self {
                        pubkey = ecc::point_tweak_mul(&pubkey, salt.as_slice())?;
                    }
                    let id = AssetId::new(
                        parent.id().address_account,
                        parent.id().asset_account,
                        index,
                    );
                    out.push(AssetEntry::new_public(id, ecc::uncompress_point(&pubkey)?));
                }
            }
            Self::Ecdh { .. } => {
                let root_pub = parent.pubkey_uncompressed();
                for index in start..=end {
                    let Some(salt) = self.ecdh_salt_for_index(index) else {
                        // Only registered salts yield assets.
                        break;
                    };
                    let pubkey = ecc::point_tweak_mul(root_pub, salt)?;
                    let id = AssetId::new(
                        parent.id().address_account,
                        parent.id().asset_account,
                        index,
                    );
                    out.push(AssetEntry::new_public(id, pubkey));
                }
            }
        }
        Ok(out)
    }

    /// Produce private-bearing assets for the inclusive index range. The
    /// parent must carry a private key; each new key is encrypted under a
    /// fresh-IV copy of `cipher_template`.
    pub fn extend_private_chain(
        &self,
        container: &DecryptedDataContainer,
        scope: &ContainerLock<'_>,
        cipher_template: Option<&Cipher>,
        parent: &AssetEntry,
        start: u32,
        end: u32,
    ) -> WalletResult<Vec<AssetEntry>> {
        let parent_privkey = parent
            .privkey()
            .ok_or(DerivationError::PrivateKeyUnavailable)?;
        let parent_plain = container.get_decrypted_private_key(scope, parent_privkey)?;

        let mut out = Vec::new();
        let mut push_asset = |index: u32,
                              privkey_plain: &SecretBytes,
                              pubkey_uncompressed: Vec<u8>|
         -> WalletResult<()> {
            let id = AssetId::new(
                parent.id().address_account,
                parent.id().asset_account,
                index,
            );
            let data = match cipher_template {
                Some(template) => {
                    let cipher = template.for_new_plaintext()?;
                    let ciphertext =
                        container.encrypt_data(scope, &cipher, privkey_plain.as_slice())?;
                    KeyData::Encrypted {
                        data: CipherData::new(ciphertext, cipher),
                    }
                }
                None => KeyData::Clear {
                    key: privkey_plain.clone(),
                },
            };
            let privkey = EncryptedPrivateKey {
                id: id.privkey_id(),
                data,
            };
            out.push(AssetEntry::new_with_private_key(
                id,
                pubkey_uncompressed,
                privkey,
            ));
            Ok(())
        };

        match self {
            Self::ArmoryLegacy { chaincode } => {
                let mut prev_priv = parent_plain;
                for index in start..=end {
                    let prev_pub = ecc::pubkey_from_priv(prev_priv.as_slice())?;
                    let scalar = legacy_chain_scalar(chaincode.as_slice(), &prev_pub);
                    let privkey = ecc::priv_tweak_mul(prev_priv.as_slice(), &scalar)?;
                    let pubkey = ecc::pubkey_from_priv(privkey.as_slice())?;
                    push_asset(index, &privkey, pubkey)?;
                    prev_priv = privkey;
                }
            }
            Self::Bip32 { .. } | Self::Bip32Salted { .. } => {
                let node = self.bip32_node_from_priv(&parent_plain)?;
                for index in start..=end {
                    if index >= HARDENED_START {
                        return Err(DerivationError::HardenedFromPublic.into());
                    }
                    let child = node.derive_private(index)?;
                    let mut privkey = child
                        .privkey()
                        .ok_or(DerivationError::PrivateKeyUnavailable)?
                        .clone();
                    if let Self::Bip32Salted { salt, .. } = self {
                        privkey = ecc::priv_tweak_mul(privkey.as_slice(), salt.as_slice())?;
                    }
                    let pubkey = ecc::pubkey_from_priv(privkey.as_slice())?;
                    push_asset(index, &privkey, pubkey)?;
                }
            }
            Self::Ecdh { .. } => {
                for index in start..=end {
                    let Some(salt) = self.ecdh_salt_for_index(index) else {
                        break;
                    };
                    let privkey = ecc::priv_tweak_mul(parent_plain.as_slice(), salt)?;
                    let pubkey = ecc::pubkey_from_priv(privkey.as_slice())?;
                    push_asset(index, &privkey, pubkey)?;
                }
            }
        }
        Ok(out)
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut bw = BinaryWriter::new();
        bw.put_u8(self.tag());
        match self {
            Self::ArmoryLegacy { chaincode } => {
                bw.put_var_bytes(chaincode.as_slice());
            }
            Self::Bip32 {
                chaincode,
                depth,
                leaf_id,
            } => {
                bw.put_var_bytes(chaincode);
                bw.put_u8(*depth);
                bw.put_u32_le(*leaf_id);
            }
            Self::Bip32Salted {
                chaincode,
                depth,
                leaf_id,
                salt,
            } => {
                bw.put_var_bytes(chaincode);
                bw.put_u8(*depth);
                bw.put_u32_le(*leaf_id);
                bw.put_var_bytes(salt.as_slice());
            }
            Self::Ecdh { id, .. } => {
                // Salts persist under their own subkeys.
                bw.put_bytes(id);
            }
        }
        bw.into_vec()
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, SerializationError> {
        let mut br = BinaryReader::new(data);
        let tag = br.get_u8()?;
        match tag {
            DERIVATION_SCHEME_LEGACY => Ok(Self::ArmoryLegacy {
                chaincode: SecretBytes::new(br.get_var_bytes()?),
            }),
            DERIVATION_SCHEME_BIP32 => {
                let chaincode = read_chaincode(&mut br)?;
                Ok(Self::Bip32 {
                    chaincode,
                    depth: br.get_u8()?,
                    leaf_id: br.get_u32_le()?,
                })
            }
            DERIVATION_SCHEME_BIP32_SALTED => {
                let chaincode = read_chaincode(&mut br)?;
                let depth = br.get_u8()?;
                let leaf_id = br.get_u32_le()?;
                Ok(Self::Bip32Salted {
                    chaincode,
                    depth,
                    leaf_id,
                    salt: SecretBytes::new(br.get_var_bytes()?),
                })
            }
            DERIVATION_SCHEME_BIP32_ECDH => {
                let id: [u8; 8] = br.get_bytes(8)?.try_into().expect("sliced eight bytes");
                Ok(Self::Ecdh {
                    id,
                    salts: BTreeMap::new(),
                })
            }
            other => Err(SerializationError::UnknownTag(other)),
        }
    }
}

fn read_chaincode(br: &mut BinaryReader<'_>) -> Result<[u8; 32], SerializationError> {
    let bytes = br.get_var_bytes()?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| SerializationError::LengthMismatch("chaincode is not 32 bytes".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KdfRomix;
    use crate::storage::WalletStorage;
    use tempfile::TempDir;

    struct PrivateContext {
        container: DecryptedDataContainer,
        cipher: Cipher,
        _storage: WalletStorage,
        _dir: TempDir,
    }

    fn private_context() -> PrivateContext {
        let dir = TempDir::new().unwrap();
        let storage = WalletStorage::create(&dir.path().join("wallet")).unwrap();
        let tree = storage.open_tree("headers").unwrap();
        let container = DecryptedDataContainer::new(tree, SecretBytes::random(32).unwrap());
        let kdf = KdfRomix::from_params(2048, 1, vec![0x11; 32]);
        let scope = container.unlock();
        let (master_id, _) = container.setup_master_key(&scope, &kdf, None).unwrap();
        drop(scope);
        let cipher = Cipher::new(kdf.id(), master_id).unwrap();
        PrivateContext {
            container,
            cipher,
            _storage: storage,
            _dir: dir,
        }
    }

    fn root_asset_with_priv(privkey: &[u8]) -> AssetEntry {
        let pubkey = ecc::pubkey_from_priv(privkey).unwrap();
        let id = AssetId::new(0, 1, ROOT_ASSET_INDEX);
        AssetEntry::new_with_private_key(
            id,
            pubkey,
            EncryptedPrivateKey {
                id: id.privkey_id(),
                data: KeyData::Clear {
                    key: SecretBytes::from(privkey),
                },
            },
        )
    }

    #[test]
    fn test_legacy_public_and_private_chains_agree() {
        let ctx = private_context();
        let privkey = [3u8; 32];
        let root = root_asset_with_priv(&privkey);
        let scheme = DerivationScheme::ArmoryLegacy {
            chaincode: SecretBytes::from(vec![0x5A; 32]),
        };

        let public = scheme.extend_public_chain(&root, 0, 4).unwrap();
        let scope = ctx.container.unlock();
        let private = scheme
            .extend_private_chain(&ctx.container, &scope, Some(&ctx.cipher), &root, 0, 4)
            .unwrap();

        assert_eq!(public.len(), 5);
        assert_eq!(private.len(), 5);
        for (pub_asset, priv_asset) in public.iter().zip(private.iter()) {
            assert_eq!(
                pub_asset.pubkey_uncompressed(),
                priv_asset.pubkey_uncompressed()
            );
            assert!(priv_asset.has_private_key());
            // Decrypted private key must match the stored public key.
            let plain = ctx
                .container
                .get_decrypted_private_key(&scope, priv_asset.privkey().unwrap())
                .unwrap();
            assert_eq!(
                ecc::pubkey_from_priv(plain.as_slice()).unwrap(),
                priv_asset.pubkey_uncompressed()
            );
        }
    }

    #[test]
    fn test_bip32_chain_matches_node_derivation() {
        let ctx = private_context();
        let seed = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let node = Bip32Node::from_seed(&seed).unwrap();
        let root = root_asset_with_priv(node.privkey().unwrap().as_slice());
        let scheme = DerivationScheme::Bip32 {
            chaincode: *node.chaincode(),
            depth: node.depth(),
            leaf_id: 0,
        };

        let public = scheme.extend_public_chain(&root, 0, 2).unwrap();
        for (i, asset) in public.iter().enumerate() {
            let expected = node.derive_public(i as u32).unwrap();
            assert_eq!(
                asset.pubkey_compressed().unwrap().as_slice(),
                expected.pubkey()
            );
        }

        let scope = ctx.container.unlock();
        let private = scheme
            .extend_private_chain(&ctx.container, &scope, Some(&ctx.cipher), &root, 0, 2)
            .unwrap();
        for (pub_asset, priv_asset) in public.iter().zip(private.iter()) {
            assert_eq!(
                pub_asset.pubkey_uncompressed(),
                priv_asset.pubkey_uncompressed()
            );
        }
    }

    #[test]
    fn test_bip32_rejects_hardened_indices() {
        let seed = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let node = Bip32Node::from_seed(&seed).unwrap();
        let root = root_asset_with_priv(node.privkey().unwrap().as_slice());
        let scheme = DerivationScheme::Bip32 {
            chaincode: *node.chaincode(),
            depth: 0,
            leaf_id: 0,
        };
        assert!(scheme
            .extend_public_chain(&root, HARDENED_START, HARDENED_START)
            .is_err());
    }

    #[test]
    fn test_salted_chain_differs_from_unsalted() {
        let ctx = private_context();
        let seed = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let node = Bip32Node::from_seed(&seed).unwrap();
        let root = root_asset_with_priv(node.privkey().unwrap().as_slice());

        let plain = DerivationScheme::Bip32 {
            chaincode: *node.chaincode(),
            depth: 0,
            leaf_id: 0,
        };
        let salted = DerivationScheme::Bip32Salted {
            chaincode: *node.chaincode(),
            depth: 0,
            leaf_id: 0,
            salt: SecretBytes::from(vec![0x99; 32]),
        };

        let a = plain.extend_public_chain(&root, 0, 0).unwrap();
        let b = salted.extend_public_chain(&root, 0, 0).unwrap();
        assert_ne!(a[0].pubkey_uncompressed(), b[0].pubkey_uncompressed());

        // Salted private keys still match their stored public keys.
        let scope = ctx.container.unlock();
        let private = salted
            .extend_private_chain(&ctx.container, &scope, Some(&ctx.cipher), &root, 0, 0)
            .unwrap();
        assert_eq!(
            private[0].pubkey_uncompressed(),
            b[0].pubkey_uncompressed()
        );
    }

    #[test]
    fn test_ecdh_salts_drive_the_chain() {
        let ctx = private_context();
        let privkey = [5u8; 32];
        let root = root_asset_with_priv(&privkey);
        let mut scheme = DerivationScheme::Ecdh {
            id: [1, 2, 3, 4, 5, 6, 7, 8],
            salts: BTreeMap::new(),
        };

        assert_eq!(scheme.add_salt(&[0x41; 32]).unwrap(), 0);
        assert_eq!(scheme.add_salt(&[0x42; 32]).unwrap(), 1);
        assert!(scheme.add_salt(&[0x41; 32]).is_err());

        let public = scheme.extend_public_chain(&root, 0, 5).unwrap();
        // Only the two registered salts produce assets.
        assert_eq!(public.len(), 2);

        let scope = ctx.container.unlock();
        let private = scheme
            .extend_private_chain(&ctx.container, &scope, Some(&ctx.cipher), &root, 0, 1)
            .unwrap();
        for (pub_asset, priv_asset) in public.iter().zip(private.iter()) {
            assert_eq!(
                pub_asset.pubkey_uncompressed(),
                priv_asset.pubkey_uncompressed()
            );
        }
    }

    #[test]
    fn test_scheme_serialization_round_trip() {
        let schemes = [
            DerivationScheme::ArmoryLegacy {
                chaincode: SecretBytes::from(vec![1; 32]),
            },
            DerivationScheme::Bip32 {
                chaincode: [2; 32],
                depth: 3,
                leaf_id: 0x10000000,
            },
            DerivationScheme::Bip32Salted {
                chaincode: [2; 32],
                depth: 3,
                leaf_id: 7,
                salt: SecretBytes::from(vec![9; 32]),
            },
            DerivationScheme::Ecdh {
                id: [8; 8],
                salts: BTreeMap::new(),
            },
        ];
        for scheme in &schemes {
            let restored = DerivationScheme::deserialize(&scheme.serialize()).unwrap();
            assert_eq!(restored.tag(), scheme.tag());
        }
    }
}
