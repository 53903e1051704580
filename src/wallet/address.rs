/// Address entries
///
/// Binds an asset to a script template and exposes the two things the
/// rest of the system needs: the prefixed script hash a chain scanner
/// matches against outputs, and the preimage a signer supplies when
/// spending. Nested variants contribute both the outer hash and every
/// inner preimage.
use bitcoin::base58;

use crate::crypto::hash::{hash160, sha256};
use crate::error::{AccountError, ResolverError, SerializationError, WalletError, WalletResult};

/// Version byte for base58 P2PKH addresses; doubles as the prefixed-hash
/// tag for pubkey-hash script types.
pub const SCRIPT_PREFIX_P2PKH: u8 = 0x00;
/// Version byte for base58 P2SH addresses.
pub const SCRIPT_PREFIX_P2SH: u8 = 0x05;
/// Internal prefix for version-0 witness pubkey-hash programs.
pub const SCRIPT_PREFIX_P2WPKH: u8 = 0x90;
/// Internal prefix for version-0 witness script-hash programs.
pub const SCRIPT_PREFIX_P2WSH: u8 = 0x95;

const OP_CHECKSIG: u8 = 0xAC;
const OP_CHECKMULTISIG: u8 = 0xAE;
const OP_DUP: u8 = 0x76;
const OP_HASH160: u8 = 0xA9;
const OP_EQUALVERIFY: u8 = 0x88;

/// Script types an account can hand out.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AddressType {
    P2pkh,
    P2pk,
    P2wpkh,
    /// P2SH-wrapped P2WPKH.
    NestedP2wpkh,
    /// P2SH-wrapped compressed P2PK.
    NestedP2pk,
    P2wshMultisig,
}

impl AddressType {
    pub fn to_u32(self) -> u32 {
        match self {
            Self::P2pkh => 0x0000_0001,
            Self::P2pk => 0x0000_0002,
            Self::P2wpkh => 0x0000_0004,
            Self::NestedP2wpkh => 0x0000_0008,
            Self::NestedP2pk => 0x0000_0010,
            Self::P2wshMultisig => 0x0000_0020,
        }
    }

    pub fn from_u32(value: u32) -> Result<Self, SerializationError> {
        match value {
            0x0000_0001 => Ok(Self::P2pkh),
            0x0000_0002 => Ok(Self::P2pk),
            0x0000_0004 => Ok(Self::P2wpkh),
            0x0000_0008 => Ok(Self::NestedP2wpkh),
            0x0000_0010 => Ok(Self::NestedP2pk),
            0x0000_0020 => Ok(Self::P2wshMultisig),
            other => Err(SerializationError::UnknownTag(other as u8)),
        }
    }

    /// Prefix byte attached to this type's script hash. Distinct types may
    /// share a prefix (P2PK hashes like P2PKH).
    pub fn prefix_byte(self) -> u8 {
        match self {
            Self::P2pkh | Self::P2pk => SCRIPT_PREFIX_P2PKH,
            Self::P2wpkh => SCRIPT_PREFIX_P2WPKH,
            Self::NestedP2wpkh | Self::NestedP2pk => SCRIPT_PREFIX_P2SH,
            Self::P2wshMultisig => SCRIPT_PREFIX_P2WSH,
        }
    }
}

use crate::wallet::asset::AssetEntry;

pub enum AddressEntry {
    P2pkh { asset: AssetEntry },
    P2pk { asset: AssetEntry },
    P2wpkh { asset: AssetEntry },
    Multisig { assets: Vec<AssetEntry>, m: u8 },
    NestedP2sh { inner: Box<AddressEntry> },
    NestedP2wsh { inner: Box<AddressEntry> },
}

impl AddressEntry {
    /// Instantiate the entry for a single-asset script type.
    pub fn new(asset: AssetEntry, address_type: AddressType) -> WalletResult<Self> {
        match address_type {
            AddressType::P2pkh => Ok(Self::P2pkh { asset }),
            AddressType::P2pk => Ok(Self::P2pk { asset }),
            AddressType::P2wpkh => Ok(Self::P2wpkh { asset }),
            AddressType::NestedP2wpkh => Ok(Self::NestedP2sh {
                inner: Box::new(Self::P2wpkh { asset }),
            }),
            AddressType::NestedP2pk => Ok(Self::NestedP2sh {
                inner: Box::new(Self::P2pk { asset }),
            }),
            AddressType::P2wshMultisig => Err(AccountError::UnsupportedScriptType.into()),
        }
    }

    /// m-of-n multisig under P2WSH.
    pub fn new_multisig(assets: Vec<AssetEntry>, m: u8) -> WalletResult<Self> {
        if assets.is_empty() || m == 0 || m as usize > assets.len() || assets.len() > 16 {
            return Err(WalletError::InvalidInput(format!(
                "invalid multisig shape: {}-of-{}",
                m,
                assets.len()
            )));
        }
        Ok(Self::NestedP2wsh {
            inner: Box::new(Self::Multisig { assets, m }),
        })
    }

    pub fn address_type(&self) -> AddressType {
        match self {
            Self::P2pkh { .. } => AddressType::P2pkh,
            Self::P2pk { .. } => AddressType::P2pk,
            Self::P2wpkh { .. } => AddressType::P2wpkh,
            Self::Multisig { .. } | Self::NestedP2wsh { .. } => AddressType::P2wshMultisig,
            Self::NestedP2sh { inner } => match inner.as_ref() {
                Self::P2wpkh { .. } => AddressType::NestedP2wpkh,
                _ => AddressType::NestedP2pk,
            },
        }
    }

    /// The wrapped entry of a nested script, if any.
    pub fn predecessor(&self) -> Option<&AddressEntry> {
        match self {
            Self::NestedP2sh { inner } | Self::NestedP2wsh { inner } => Some(inner),
            _ => None,
        }
    }

    /// The script this entry contributes when wrapped by an outer hash.
    pub fn script_for_nesting(&self) -> WalletResult<Vec<u8>> {
        match self {
            Self::P2pkh { asset } => {
                let digest = hash160(&asset.pubkey_compressed()?);
                let mut script = vec![OP_DUP, OP_HASH160, 0x14];
                script.extend_from_slice(&digest);
                script.push(OP_EQUALVERIFY);
                script.push(OP_CHECKSIG);
                Ok(script)
            }
            Self::P2pk { asset } => {
                let pubkey = asset.pubkey_compressed()?;
                let mut script = vec![pubkey.len() as u8];
                script.extend_from_slice(&pubkey);
                script.push(OP_CHECKSIG);
                Ok(script)
            }
            Self::P2wpkh { asset } => {
                let digest = hash160(&asset.pubkey_compressed()?);
                let mut script = vec![0x00, 0x14];
                script.extend_from_slice(&digest);
                Ok(script)
            }
            Self::Multisig { assets, m } => {
                let mut script = vec![0x50 + m];
                for asset in assets {
                    let pubkey = asset.pubkey_compressed()?;
                    script.push(pubkey.len() as u8);
                    script.extend_from_slice(&pubkey);
                }
                script.push(0x50 + assets.len() as u8);
                script.push(OP_CHECKMULTISIG);
                Ok(script)
            }
            Self::NestedP2sh { .. } | Self::NestedP2wsh { .. } => Err(WalletError::InvalidInput(
                "nested entries cannot nest again".to_string(),
            )),
        }
    }

    /// The prefixed script hash a chain scanner matches against outputs.
    pub fn prefixed_hash(&self) -> WalletResult<Vec<u8>> {
        match self {
            Self::P2pkh { asset } | Self::P2pk { asset } => {
                let mut out = vec![SCRIPT_PREFIX_P2PKH];
                out.extend_from_slice(&hash160(&asset.pubkey_compressed()?));
                Ok(out)
            }
            Self::P2wpkh { asset } => {
                let mut out = vec![SCRIPT_PREFIX_P2WPKH];
                out.extend_from_slice(&hash160(&asset.pubkey_compressed()?));
                Ok(out)
            }
            Self::Multisig { .. } => {
                let mut out = vec![SCRIPT_PREFIX_P2WSH];
                out.extend_from_slice(&sha256(&self.script_for_nesting()?));
                Ok(out)
            }
            Self::NestedP2sh { inner } => {
                let mut out = vec![SCRIPT_PREFIX_P2SH];
                out.extend_from_slice(&hash160(&inner.script_for_nesting()?));
                Ok(out)
            }
            Self::NestedP2wsh { inner } => {
                let mut out = vec![SCRIPT_PREFIX_P2WSH];
                out.extend_from_slice(&sha256(&inner.script_for_nesting()?));
                Ok(out)
            }
        }
    }

    /// The bytes a signer plugs in when spending: compressed pubkey for
    /// key-hash types, redeem or witness script for nested ones.
    pub fn preimage(&self) -> WalletResult<Vec<u8>> {
        match self {
            Self::P2pkh { asset } | Self::P2pk { asset } | Self::P2wpkh { asset } => {
                Ok(asset.pubkey_compressed()?)
            }
            Self::Multisig { .. } => self.script_for_nesting(),
            Self::NestedP2sh { inner } | Self::NestedP2wsh { inner } => {
                inner.script_for_nesting()
            }
        }
    }

    /// Human-readable address string.
    pub fn address_string(&self) -> WalletResult<String> {
        let prefixed = self.prefixed_hash()?;
        prefixed_hash_to_address_string(&prefixed)
    }
}

/// Render a prefixed hash as its address string.
pub fn prefixed_hash_to_address_string(prefixed: &[u8]) -> WalletResult<String> {
    let (prefix, payload) = prefixed
        .split_first()
        .ok_or(ResolverError::UnknownAddress)?;
    match *prefix {
        SCRIPT_PREFIX_P2PKH | SCRIPT_PREFIX_P2SH => Ok(base58::encode_check(prefixed)),
        SCRIPT_PREFIX_P2WPKH | SCRIPT_PREFIX_P2WSH => {
            bech32::segwit::encode(bech32::hrp::BC, bech32::Fe32::Q, payload)
                .map_err(|_| ResolverError::UnknownAddress.into())
        }
        _ => Err(ResolverError::UnknownAddress.into()),
    }
}

/// Parse an address string back into a prefixed hash.
pub fn address_string_to_prefixed_hash(address: &str) -> WalletResult<Vec<u8>> {
    if let Ok(payload) = base58::decode_check(address) {
        if payload.len() == 21
            && (payload[0] == SCRIPT_PREFIX_P2PKH || payload[0] == SCRIPT_PREFIX_P2SH)
        {
            return Ok(payload);
        }
        return Err(ResolverError::UnknownAddress.into());
    }
    if let Ok((_hrp, version, program)) = bech32::segwit::decode(address) {
        if version != bech32::Fe32::Q {
            return Err(ResolverError::UnknownAddress.into());
        }
        let prefix = match program.len() {
            20 => SCRIPT_PREFIX_P2WPKH,
            32 => SCRIPT_PREFIX_P2WSH,
            _ => return Err(ResolverError::UnknownAddress.into()),
        };
        let mut out = vec![prefix];
        out.extend_from_slice(&program);
        return Ok(out);
    }
    Err(ResolverError::UnknownAddress.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ecc;
    use crate::wallet::asset::AssetId;

    fn generator_asset() -> AssetEntry {
        // priv = 1, the generator point.
        let mut privkey = [0u8; 32];
        privkey[31] = 1;
        AssetEntry::new_public(
            AssetId::new(0, 0, 0),
            ecc::pubkey_from_priv(&privkey).unwrap(),
        )
    }

    #[test]
    fn test_base58_address_round_trip() {
        let address = "16UwLL9Risc3QfPqBUvKofHmBQ7wMtjvM";
        let prefixed = address_string_to_prefixed_hash(address).unwrap();
        assert_eq!(
            hex::encode(&prefixed),
            "00010966776006953d5567439e5e39f86a0d273bee"
        );
        assert_eq!(prefixed_hash_to_address_string(&prefixed).unwrap(), address);
    }

    #[test]
    fn test_p2wpkh_bech32_vector() {
        let entry = AddressEntry::new(generator_asset(), AddressType::P2wpkh).unwrap();
        assert_eq!(
            entry.address_string().unwrap(),
            "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4"
        );
    }

    #[test]
    fn test_p2wsh_one_of_one_vector() {
        // sha256 of `<pubkey> OP_CHECKSIG` for the generator pubkey.
        let entry = AddressEntry::NestedP2wsh {
            inner: Box::new(AddressEntry::P2pk {
                asset: generator_asset(),
            }),
        };
        assert_eq!(
            entry.address_string().unwrap(),
            "bc1qrp33g0q5c5txsp9arysrx4k6zdkfs4nce4xj0gdcccefvpysxf3qccfmv3"
        );
    }

    #[test]
    fn test_p2pk_shares_p2pkh_prefix() {
        let p2pkh = AddressEntry::new(generator_asset(), AddressType::P2pkh).unwrap();
        let p2pk = AddressEntry::new(generator_asset(), AddressType::P2pk).unwrap();
        assert_eq!(
            p2pkh.prefixed_hash().unwrap(),
            p2pk.prefixed_hash().unwrap()
        );
        // Preimages agree here (compressed pubkey), but the spending path
        // differs by type, which is why hash-map hits carry the type.
        assert_eq!(p2pkh.address_type(), AddressType::P2pkh);
        assert_eq!(p2pk.address_type(), AddressType::P2pk);
    }

    #[test]
    fn test_nested_p2wpkh_exposes_predecessor() {
        let entry = AddressEntry::new(generator_asset(), AddressType::NestedP2wpkh).unwrap();
        assert_eq!(entry.address_type(), AddressType::NestedP2wpkh);
        assert_eq!(entry.prefixed_hash().unwrap()[0], SCRIPT_PREFIX_P2SH);

        let inner = entry.predecessor().unwrap();
        assert_eq!(inner.address_type(), AddressType::P2wpkh);
        // The outer preimage is the inner witness program script.
        assert_eq!(
            entry.preimage().unwrap(),
            inner.script_for_nesting().unwrap()
        );
    }

    #[test]
    fn test_multisig_script_shape() {
        let assets = vec![generator_asset(), generator_asset(), generator_asset()];
        let entry = AddressEntry::new_multisig(assets, 2).unwrap();
        let script = entry.preimage().unwrap();
        assert_eq!(script[0], 0x52); // OP_2
        assert_eq!(script[script.len() - 2], 0x53); // OP_3
        assert_eq!(script[script.len() - 1], 0xAE); // OP_CHECKMULTISIG
        assert_eq!(entry.prefixed_hash().unwrap()[0], SCRIPT_PREFIX_P2WSH);

        assert!(AddressEntry::new_multisig(vec![generator_asset()], 2).is_err());
    }
}
