/// Per-ciphertext metadata
///
/// A cipher binds a ciphertext to the KDF and encryption key that produced
/// it, plus the IV. Reusing a cipher for a new plaintext must go through
/// `for_new_plaintext`, which cycles the IV; the same `(key, iv)` pair is
/// never used to encrypt two distinct plaintexts.
use crate::crypto::{aes, AES_IV_SIZE};
use crate::error::{CryptoResult, EncryptionError, SerializationError};
use crate::util::{BinaryReader, BinaryWriter};

/// Tag byte for the only supported cipher kind, AES-256-CBC.
pub const CIPHER_KIND_AES_CBC: u8 = 0x01;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cipher {
    kdf_id: Vec<u8>,
    encryption_key_id: Vec<u8>,
    iv: Vec<u8>,
}

impl Cipher {
    /// New cipher with a fresh random IV.
    pub fn new(kdf_id: Vec<u8>, encryption_key_id: Vec<u8>) -> CryptoResult<Self> {
        let iv = crate::crypto::random::generate_random_bytes(AES_IV_SIZE)?;
        Ok(Self {
            kdf_id,
            encryption_key_id,
            iv,
        })
    }

    pub fn with_iv(kdf_id: Vec<u8>, encryption_key_id: Vec<u8>, iv: Vec<u8>) -> Self {
        Self {
            kdf_id,
            encryption_key_id,
            iv,
        }
    }

    /// Same key bindings, fresh IV. The only sanctioned way to reuse a
    /// cipher for another plaintext.
    pub fn for_new_plaintext(&self) -> CryptoResult<Self> {
        Self::new(self.kdf_id.clone(), self.encryption_key_id.clone())
    }

    pub fn kdf_id(&self) -> &[u8] {
        &self.kdf_id
    }

    pub fn encryption_key_id(&self) -> &[u8] {
        &self.encryption_key_id
    }

    pub fn iv(&self) -> &[u8] {
        &self.iv
    }

    pub fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        aes::encrypt(key, &self.iv, plaintext)
    }

    pub fn decrypt(&self, key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        aes::decrypt(key, &self.iv, ciphertext)
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut bw = BinaryWriter::new();
        bw.put_u8(CIPHER_KIND_AES_CBC);
        bw.put_var_bytes(&self.kdf_id);
        bw.put_var_bytes(&self.encryption_key_id);
        bw.put_var_bytes(&self.iv);
        bw.into_vec()
    }

    pub fn deserialize(br: &mut BinaryReader<'_>) -> Result<Self, SerializationError> {
        let kind = br.get_u8()?;
        if kind != CIPHER_KIND_AES_CBC {
            return Err(SerializationError::UnknownTag(kind));
        }
        let kdf_id = br.get_var_bytes()?;
        let encryption_key_id = br.get_var_bytes()?;
        let iv = br.get_var_bytes()?;
        Ok(Self {
            kdf_id,
            encryption_key_id,
            iv,
        })
    }
}
