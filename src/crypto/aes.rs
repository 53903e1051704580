/// AES-256-CBC adapter with PKCS#7 padding
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};

use crate::crypto::{AES_IV_SIZE, AES_KEY_SIZE};
use crate::error::{CryptoError, CryptoResult, EncryptionError};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

pub fn encrypt(key: &[u8], iv: &[u8], plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
    if key.len() != AES_KEY_SIZE {
        return Err(CryptoError::BadLength {
            expected: AES_KEY_SIZE,
            got: key.len(),
        });
    }
    if iv.len() != AES_IV_SIZE {
        return Err(CryptoError::BadLength {
            expected: AES_IV_SIZE,
            got: iv.len(),
        });
    }
    let cipher = Aes256CbcEnc::new_from_slices(key, iv).map_err(|_| CryptoError::BadLength {
        expected: AES_KEY_SIZE,
        got: key.len(),
    })?;
    Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

/// Decrypt a CBC ciphertext. Padding failures surface as corrupt
/// ciphertext; the caller decides whether that means a bad key.
pub fn decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
    if key.len() != AES_KEY_SIZE || iv.len() != AES_IV_SIZE {
        return Err(EncryptionError::CorruptCiphertext);
    }
    let cipher = Aes256CbcDec::new_from_slices(key, iv)
        .map_err(|_| EncryptionError::CorruptCiphertext)?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| EncryptionError::CorruptCiphertext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::random::generate_random_bytes;

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let key = generate_random_bytes(32).unwrap();
        let iv = generate_random_bytes(16).unwrap();
        let plaintext = b"thirty-two bytes of private key!";

        let ct = encrypt(&key, &iv, plaintext).unwrap();
        assert_ne!(&ct[..plaintext.len().min(ct.len())], plaintext.as_slice());
        // CBC pads to the next block boundary.
        assert_eq!(ct.len() % 16, 0);

        let pt = decrypt(&key, &iv, &ct).unwrap();
        assert_eq!(pt, plaintext);
    }

    #[test]
    fn test_wrong_key_fails() {
        let key = generate_random_bytes(32).unwrap();
        let wrong = generate_random_bytes(32).unwrap();
        let iv = generate_random_bytes(16).unwrap();

        let ct = encrypt(&key, &iv, b"secret").unwrap();
        let result = decrypt(&wrong, &iv, &ct);
        // Either the padding check trips or the plaintext differs.
        if let Ok(pt) = result {
            assert_ne!(pt, b"secret");
        }
    }

    #[test]
    fn test_bad_key_length_rejected() {
        let iv = [0u8; 16];
        assert!(matches!(
            encrypt(&[0u8; 16], &iv, b"data"),
            Err(CryptoError::BadLength { .. })
        ));
    }
}
