/// BIP-32 derivation node
///
/// Soft and hardened private derivation, soft public derivation, and the
/// Base58 extended-key encoding. Key material is held as raw bytes; curve
/// math goes through the crypto adapter.
use bitcoin::base58;

use crate::crypto::hash::{hash160, hmac_sha512};
use crate::crypto::{ecc, SecretBytes};
use crate::error::{DerivationError, SerializationError, WalletError, WalletResult};

/// Mainnet xprv version bytes.
pub const XPRV_VERSION: [u8; 4] = [0x04, 0x88, 0xAD, 0xE4];
/// Mainnet xpub version bytes.
pub const XPUB_VERSION: [u8; 4] = [0x04, 0x88, 0xB2, 0x1E];
/// First hardened child index.
pub const HARDENED_START: u32 = 0x8000_0000;

const BIP32_SEED_KEY: &[u8] = b"Bitcoin seed";

#[derive(Clone, Debug)]
pub struct Bip32Node {
    chaincode: [u8; 32],
    privkey: Option<SecretBytes>,
    pubkey: Vec<u8>,
    depth: u8,
    parent_fingerprint: [u8; 4],
    child_num: u32,
}

impl Bip32Node {
    /// Master node from a seed, per the BIP-32 bootstrap.
    pub fn from_seed(seed: &[u8]) -> WalletResult<Self> {
        let digest = hmac_sha512(BIP32_SEED_KEY, seed);
        let privkey = &digest[..32];
        let mut chaincode = [0u8; 32];
        chaincode.copy_from_slice(&digest[32..]);
        let pubkey = ecc::compressed_pubkey_from_priv(privkey)
            .map_err(|_| DerivationError::InvalidChildKey)?;
        Ok(Self {
            chaincode,
            privkey: Some(SecretBytes::from(privkey)),
            pubkey,
            depth: 0,
            parent_fingerprint: [0u8; 4],
            child_num: 0,
        })
    }

    pub fn from_private(
        privkey: SecretBytes,
        chaincode: [u8; 32],
        depth: u8,
        parent_fingerprint: [u8; 4],
        child_num: u32,
    ) -> WalletResult<Self> {
        let pubkey = ecc::compressed_pubkey_from_priv(privkey.as_slice())
            .map_err(|_| DerivationError::InvalidChildKey)?;
        Ok(Self {
            chaincode,
            privkey: Some(privkey),
            pubkey,
            depth,
            parent_fingerprint,
            child_num,
        })
    }

    pub fn from_public(
        pubkey: Vec<u8>,
        chaincode: [u8; 32],
        depth: u8,
        parent_fingerprint: [u8; 4],
        child_num: u32,
    ) -> WalletResult<Self> {
        let pubkey = ecc::compress_point(&pubkey)?;
        Ok(Self {
            chaincode,
            privkey: None,
            pubkey,
            depth,
            parent_fingerprint,
            child_num,
        })
    }

    pub fn is_public(&self) -> bool {
        self.privkey.is_none()
    }

    pub fn privkey(&self) -> Option<&SecretBytes> {
        self.privkey.as_ref()
    }

    /// Compressed (33-byte) public key.
    pub fn pubkey(&self) -> &[u8] {
        &self.pubkey
    }

    pub fn chaincode(&self) -> &[u8; 32] {
        &self.chaincode
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    pub fn parent_fingerprint(&self) -> &[u8; 4] {
        &self.parent_fingerprint
    }

    pub fn child_num(&self) -> u32 {
        self.child_num
    }

    /// hash160 of the compressed public key, truncated to four bytes.
    pub fn fingerprint(&self) -> [u8; 4] {
        let digest = hash160(&self.pubkey);
        [digest[0], digest[1], digest[2], digest[3]]
    }

    fn next_depth(&self) -> WalletResult<u8> {
        self.depth
            .checked_add(1)
            .ok_or_else(|| DerivationError::DepthOverflow.into())
    }

    /// Derive a private child; hardened iff `index >= 2^31`.
    pub fn derive_private(&self, index: u32) -> WalletResult<Self> {
        let privkey = self
            .privkey
            .as_ref()
            .ok_or(DerivationError::PrivateKeyUnavailable)?;

        let mut data = Vec::with_capacity(37);
        if index >= HARDENED_START {
            data.push(0x00);
            data.extend_from_slice(privkey.as_slice());
        } else {
            data.extend_from_slice(&self.pubkey);
        }
        data.extend_from_slice(&index.to_be_bytes());

        let digest = hmac_sha512(&self.chaincode, &data);
        let child_priv = ecc::priv_tweak_add(privkey.as_slice(), &digest[..32])
            .map_err(|_| DerivationError::InvalidChildKey)?;
        let mut chaincode = [0u8; 32];
        chaincode.copy_from_slice(&digest[32..]);

        Self::from_private(
            child_priv,
            chaincode,
            self.next_depth()?,
            self.fingerprint(),
            index,
        )
    }

    /// Derive a public child; hardened indices are impossible without the
    /// private key.
    pub fn derive_public(&self, index: u32) -> WalletResult<Self> {
        if index >= HARDENED_START {
            return Err(DerivationError::HardenedFromPublic.into());
        }

        let mut data = Vec::with_capacity(37);
        data.extend_from_slice(&self.pubkey);
        data.extend_from_slice(&index.to_be_bytes());

        let digest = hmac_sha512(&self.chaincode, &data);
        let child_pub = ecc::point_add_scalar(&self.pubkey, &digest[..32])
            .map_err(|_| DerivationError::InvalidChildKey)?;
        let mut chaincode = [0u8; 32];
        chaincode.copy_from_slice(&digest[32..]);

        Self::from_public(
            child_pub,
            chaincode,
            self.next_depth()?,
            self.fingerprint(),
            index,
        )
    }

    /// Derive a child, privately when possible, publicly otherwise.
    pub fn derive(&self, index: u32) -> WalletResult<Self> {
        if self.privkey.is_some() {
            self.derive_private(index)
        } else {
            self.derive_public(index)
        }
    }

    /// Base58-check extended-key encoding (xprv when the node holds a
    /// private key, xpub otherwise).
    pub fn encode_base58(&self) -> String {
        let mut payload = Vec::with_capacity(78);
        match &self.privkey {
            Some(privkey) => {
                payload.extend_from_slice(&XPRV_VERSION);
                payload.push(self.depth);
                payload.extend_from_slice(&self.parent_fingerprint);
                payload.extend_from_slice(&self.child_num.to_be_bytes());
                payload.extend_from_slice(&self.chaincode);
                payload.push(0x00);
                payload.extend_from_slice(privkey.as_slice());
            }
            None => {
                payload.extend_from_slice(&XPUB_VERSION);
                payload.push(self.depth);
                payload.extend_from_slice(&self.parent_fingerprint);
                payload.extend_from_slice(&self.child_num.to_be_bytes());
                payload.extend_from_slice(&self.chaincode);
                payload.extend_from_slice(&self.pubkey);
            }
        }
        base58::encode_check(&payload)
    }

    pub fn decode_base58(encoded: &str) -> WalletResult<Self> {
        let payload = base58::decode_check(encoded).map_err(|e| {
            WalletError::Serialization(SerializationError::LengthMismatch(e.to_string()))
        })?;
        if payload.len() != 78 {
            return Err(SerializationError::LengthMismatch(format!(
                "extended key payload is {} bytes, expected 78",
                payload.len()
            ))
            .into());
        }

        let version: [u8; 4] = payload[..4].try_into().expect("sliced four bytes");
        let depth = payload[4];
        let parent_fingerprint: [u8; 4] = payload[5..9].try_into().expect("sliced four bytes");
        let child_num = u32::from_be_bytes(payload[9..13].try_into().expect("sliced four bytes"));
        let mut chaincode = [0u8; 32];
        chaincode.copy_from_slice(&payload[13..45]);
        let key_data = &payload[45..78];

        if version == XPRV_VERSION {
            if key_data[0] != 0x00 {
                return Err(SerializationError::UnknownTag(key_data[0]).into());
            }
            Self::from_private(
                SecretBytes::from(&key_data[1..]),
                chaincode,
                depth,
                parent_fingerprint,
                child_num,
            )
        } else if version == XPUB_VERSION {
            Self::from_public(
                key_data.to_vec(),
                chaincode,
                depth,
                parent_fingerprint,
                child_num,
            )
        } else {
            Err(SerializationError::UnknownTag(version[0]).into())
        }
    }

    /// Public-only view of this node.
    pub fn public_copy(&self) -> Self {
        Self {
            chaincode: self.chaincode,
            privkey: None,
            pubkey: self.pubkey.clone(),
            depth: self.depth,
            parent_fingerprint: self.parent_fingerprint,
            child_num: self.child_num,
        }
    }
}
