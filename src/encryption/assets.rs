/// Encrypted containers persisted by the wallet
///
/// Three shapes: the master encryption key (which may be wrapped under
/// several passphrase-derived keys at once), a single private key, and the
/// wallet seed.
use std::collections::BTreeMap;

use crate::crypto::SecretBytes;
use crate::encryption::cipher::Cipher;
use crate::error::SerializationError;
use crate::util::{BinaryReader, BinaryWriter};

/// A ciphertext together with the cipher metadata that produced it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CipherData {
    pub ciphertext: Vec<u8>,
    pub cipher: Cipher,
}

impl CipherData {
    pub fn new(ciphertext: Vec<u8>, cipher: Cipher) -> Self {
        Self { ciphertext, cipher }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut bw = BinaryWriter::new();
        bw.put_var_bytes(&self.ciphertext);
        bw.put_var_bytes(&self.cipher.serialize());
        bw.into_vec()
    }

    pub fn deserialize(br: &mut BinaryReader<'_>) -> Result<Self, SerializationError> {
        let ciphertext = br.get_var_bytes()?;
        let cipher_blob = br.get_var_bytes()?;
        let mut cipher_br = BinaryReader::new(&cipher_blob);
        let cipher = Cipher::deserialize(&mut cipher_br)?;
        Ok(Self { ciphertext, cipher })
    }
}

/// A master encryption key record. The same key material may be wrapped
/// under multiple passphrase-derived keys; the map is keyed by the
/// wrapping key's id.
#[derive(Clone, Debug)]
pub struct EncryptedKey {
    id: Vec<u8>,
    ciphertexts: BTreeMap<Vec<u8>, CipherData>,
}

impl EncryptedKey {
    pub fn new(id: Vec<u8>, data: CipherData) -> Self {
        let mut ciphertexts = BTreeMap::new();
        ciphertexts.insert(data.cipher.encryption_key_id().to_vec(), data);
        Self { id, ciphertexts }
    }

    pub fn id(&self) -> &[u8] {
        &self.id
    }

    pub fn cipher_data(&self) -> &BTreeMap<Vec<u8>, CipherData> {
        &self.ciphertexts
    }

    pub fn get(&self, wrapping_key_id: &[u8]) -> Option<&CipherData> {
        self.ciphertexts.get(wrapping_key_id)
    }

    pub fn add_cipher_data(&mut self, data: CipherData) {
        self.ciphertexts
            .insert(data.cipher.encryption_key_id().to_vec(), data);
    }

    pub fn remove_cipher_data(&mut self, wrapping_key_id: &[u8]) -> bool {
        self.ciphertexts.remove(wrapping_key_id).is_some()
    }

    pub fn clear_cipher_data(&mut self) {
        self.ciphertexts.clear();
    }

    /// Same underlying key material, IVs and ciphertext bytes ignored.
    /// The id binds the plaintext and KDF choice, so id equality is
    /// material equality.
    pub fn is_same(&self, other: &EncryptedKey) -> bool {
        self.id == other.id
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut bw = BinaryWriter::new();
        bw.put_var_bytes(&self.id);
        bw.put_var_int(self.ciphertexts.len() as u64);
        for data in self.ciphertexts.values() {
            bw.put_var_bytes(&data.serialize());
        }
        bw.into_vec()
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, SerializationError> {
        let mut br = BinaryReader::new(data);
        let id = br.get_var_bytes()?;
        let count = br.get_var_int()? as usize;
        let mut ciphertexts = BTreeMap::new();
        for _ in 0..count {
            let blob = br.get_var_bytes()?;
            let mut inner = BinaryReader::new(&blob);
            let cd = CipherData::deserialize(&mut inner)?;
            ciphertexts.insert(cd.cipher.encryption_key_id().to_vec(), cd);
        }
        Ok(Self { id, ciphertexts })
    }
}

/// Private-key payload of an asset: cleartext in watching-path wallets
/// created without encryption, ciphertext otherwise.
#[derive(Clone, Debug)]
pub enum KeyData {
    Clear { key: SecretBytes },
    Encrypted { data: CipherData },
}

/// A single asset's private key.
#[derive(Clone, Debug)]
pub struct EncryptedPrivateKey {
    pub id: Vec<u8>,
    pub data: KeyData,
}

const KEYDATA_CLEAR: u8 = 0x00;
const KEYDATA_ENCRYPTED: u8 = 0x01;

impl EncryptedPrivateKey {
    pub fn serialize(&self) -> Vec<u8> {
        let mut bw = BinaryWriter::new();
        bw.put_var_bytes(&self.id);
        match &self.data {
            KeyData::Clear { key } => {
                bw.put_u8(KEYDATA_CLEAR);
                bw.put_var_bytes(key.as_slice());
            }
            KeyData::Encrypted { data } => {
                bw.put_u8(KEYDATA_ENCRYPTED);
                bw.put_var_bytes(&data.serialize());
            }
        }
        bw.into_vec()
    }

    pub fn deserialize(br: &mut BinaryReader<'_>) -> Result<Self, SerializationError> {
        let id = br.get_var_bytes()?;
        let tag = br.get_u8()?;
        let data = match tag {
            KEYDATA_CLEAR => KeyData::Clear {
                key: SecretBytes::new(br.get_var_bytes()?),
            },
            KEYDATA_ENCRYPTED => {
                let blob = br.get_var_bytes()?;
                let mut inner = BinaryReader::new(&blob);
                KeyData::Encrypted {
                    data: CipherData::deserialize(&mut inner)?,
                }
            }
            other => return Err(SerializationError::UnknownTag(other)),
        };
        Ok(Self { id, data })
    }
}

/// The wallet seed, always encrypted.
#[derive(Clone, Debug)]
pub struct EncryptedSeed {
    pub data: CipherData,
}

impl EncryptedSeed {
    pub fn serialize(&self) -> Vec<u8> {
        self.data.serialize()
    }

    pub fn deserialize(blob: &[u8]) -> Result<Self, SerializationError> {
        let mut br = BinaryReader::new(blob);
        Ok(Self {
            data: CipherData::deserialize(&mut br)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_cipher_data(iv_seed: u8) -> CipherData {
        CipherData::new(
            vec![0xEE; 48],
            Cipher::with_iv(vec![1; 32], vec![iv_seed; 32], vec![iv_seed; 16]),
        )
    }

    #[test]
    fn test_encrypted_key_multi_wrap() {
        let mut key = EncryptedKey::new(vec![9; 32], sample_cipher_data(2));
        key.add_cipher_data(sample_cipher_data(3));
        assert_eq!(key.cipher_data().len(), 2);
        assert!(key.remove_cipher_data(&[2u8; 32]));
        assert_eq!(key.cipher_data().len(), 1);
        assert!(!key.remove_cipher_data(&[2u8; 32]));
    }

    #[test]
    fn test_encrypted_key_round_trip() {
        let mut key = EncryptedKey::new(vec![9; 32], sample_cipher_data(2));
        key.add_cipher_data(sample_cipher_data(3));
        let restored = EncryptedKey::deserialize(&key.serialize()).unwrap();
        assert_eq!(restored.id(), key.id());
        assert_eq!(restored.cipher_data(), key.cipher_data());
        assert!(restored.is_same(&key));
    }

    #[test]
    fn test_private_key_round_trip_both_kinds() {
        let encrypted = EncryptedPrivateKey {
            id: vec![7; 16],
            data: KeyData::Encrypted {
                data: sample_cipher_data(4),
            },
        };
        let bytes = encrypted.serialize();
        let mut br = BinaryReader::new(&bytes);
        let restored = EncryptedPrivateKey::deserialize(&mut br).unwrap();
        assert_eq!(restored.id, encrypted.id);
        assert!(matches!(restored.data, KeyData::Encrypted { .. }));

        let clear = EncryptedPrivateKey {
            id: vec![7; 16],
            data: KeyData::Clear {
                key: SecretBytes::from(vec![5u8; 32]),
            },
        };
        let bytes = clear.serialize();
        let mut br = BinaryReader::new(&bytes);
        let restored = EncryptedPrivateKey::deserialize(&mut br).unwrap();
        assert!(matches!(restored.data, KeyData::Clear { .. }));
    }
}
