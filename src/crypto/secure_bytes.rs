/// Secret byte buffer with zero-on-drop semantics
///
/// Holds private keys, chaincodes, passphrases and KDF output. The backing
/// storage is wiped when the value is dropped, equality runs in constant
/// time, and the `Debug` impl never prints the contents.
use std::fmt;

use zeroize::Zeroize;

use crate::error::{CryptoError, CryptoResult};

pub struct SecretBytes(Vec<u8>);

impl SecretBytes {
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// `length` fresh random bytes from the OS entropy source.
    pub fn random(length: usize) -> CryptoResult<Self> {
        Ok(Self(super::random::generate_random_bytes(length)?))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// New buffer holding `self ∥ other`.
    pub fn concat(&self, other: &[u8]) -> Self {
        let mut out = Vec::with_capacity(self.0.len() + other.len());
        out.extend_from_slice(&self.0);
        out.extend_from_slice(other);
        Self(out)
    }

    /// Copy of the byte range `[start, start + len)`.
    pub fn slice_copy(&self, start: usize, len: usize) -> CryptoResult<Self> {
        if start + len > self.0.len() {
            return Err(CryptoError::BadLength {
                expected: start + len,
                got: self.0.len(),
            });
        }
        Ok(Self(self.0[start..start + len].to_vec()))
    }

    /// XOR `other` into this buffer. Lengths must match.
    pub fn xor_with(&mut self, other: &[u8]) -> CryptoResult<()> {
        if self.0.len() != other.len() {
            return Err(CryptoError::BadLength {
                expected: self.0.len(),
                got: other.len(),
            });
        }
        for (a, b) in self.0.iter_mut().zip(other.iter()) {
            *a ^= b;
        }
        Ok(())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl Drop for SecretBytes {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl Clone for SecretBytes {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl PartialEq for SecretBytes {
    /// Constant-time comparison; mismatched lengths short-circuit but leak
    /// only the length, which is not secret.
    fn eq(&self, other: &Self) -> bool {
        if self.0.len() != other.0.len() {
            return false;
        }
        let mut diff = 0u8;
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            diff |= a ^ b;
        }
        diff == 0
    }
}

impl Eq for SecretBytes {}

impl AsRef<[u8]> for SecretBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for SecretBytes {
    fn from(data: Vec<u8>) -> Self {
        Self(data)
    }
}

impl From<&[u8]> for SecretBytes {
    fn from(data: &[u8]) -> Self {
        Self(data.to_vec())
    }
}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretBytes({} bytes)", self.0.len())
    }
}
