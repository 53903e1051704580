/// Cryptographically secure random number generation
///
/// All randomness in the wallet funnels through here; the OS entropy
/// source is the only generator used.
use getrandom::getrandom;

use crate::error::{CryptoError, CryptoResult};

/// Generate `length` random bytes from the OS entropy source.
pub fn generate_random_bytes(length: usize) -> CryptoResult<Vec<u8>> {
    let mut buffer = vec![0u8; length];
    getrandom(&mut buffer).map_err(|_| CryptoError::RngFailed)?;
    Ok(buffer)
}

/// Fill an existing buffer with random bytes.
pub fn fill_random(buffer: &mut [u8]) -> CryptoResult<()> {
    getrandom(buffer).map_err(|_| CryptoError::RngFailed)
}

/// Generate 32 random bytes that form a valid secp256k1 scalar.
pub fn generate_private_key_bytes() -> CryptoResult<[u8; 32]> {
    loop {
        let mut bytes = [0u8; 32];
        fill_random(&mut bytes)?;
        if secp256k1::SecretKey::from_slice(&bytes).is_ok() {
            return Ok(bytes);
        }
        // Out-of-range draw, try again (probability ~2^-128).
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_bytes_generation() {
        let a = generate_random_bytes(32).unwrap();
        let b = generate_random_bytes(32).unwrap();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }

    #[test]
    fn test_private_key_bytes_are_valid_scalars() {
        let bytes = generate_private_key_bytes().unwrap();
        assert!(secp256k1::SecretKey::from_slice(&bytes).is_ok());
    }
}
