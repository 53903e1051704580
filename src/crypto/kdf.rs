/// Memory-hard key derivation (ROMIX family)
///
/// Sequential-memory-hard KDF in the scrypt lineage: a chained SHA-512
/// lookup table is filled from the salted passphrase, then walked by
/// data-dependent indices. Memory size and iteration count are calibrated
/// against a wall-clock target so the cost tracks the host machine.
use std::time::Instant;

use zeroize::Zeroize;

use crate::crypto::hash::{hash256, sha512};
use crate::crypto::{
    random::generate_random_bytes, SecretBytes, DEFAULT_KDF_MAX_MEMORY, DEFAULT_KDF_TARGET_SECS,
    KDF_SALT_SIZE,
};
use crate::error::{CryptoResult, SerializationError};
use crate::util::{BinaryReader, BinaryWriter};

const HASH_OUTPUT_BYTES: usize = 64;
const KDF_OUTPUT_BYTES: usize = 32;
const HASH_FUNCTION_NAME: &str = "sha512";
const MIN_MEMORY_BYTES: u32 = 1024;

#[derive(Clone)]
pub struct KdfRomix {
    memory_bytes: u32,
    iterations: u32,
    salt: Vec<u8>,
}

impl KdfRomix {
    /// Build from precomputed parameters (e.g. read back from disk).
    pub fn from_params(memory_bytes: u32, iterations: u32, salt: Vec<u8>) -> Self {
        Self {
            memory_bytes: memory_bytes.max(MIN_MEMORY_BYTES),
            iterations: iterations.max(1),
            salt,
        }
    }

    /// Fresh KDF calibrated against the default compute target.
    pub fn new() -> CryptoResult<Self> {
        Self::calibrated(DEFAULT_KDF_TARGET_SECS, DEFAULT_KDF_MAX_MEMORY)
    }

    /// Calibrate memory and iteration count on this machine: double the
    /// memory requirement until a single pass costs at least a quarter of
    /// the target, then set the iteration count to fill the remainder.
    pub fn calibrated(target_secs: f64, max_memory: u32) -> CryptoResult<Self> {
        let salt = generate_random_bytes(KDF_SALT_SIZE)?;

        if target_secs <= 0.0 {
            return Ok(Self::from_params(MIN_MEMORY_BYTES, 1, salt));
        }

        let mut kdf = Self::from_params(MIN_MEMORY_BYTES, 1, salt);
        let probe = b"kdf calibration probe key";

        let mut per_iter_secs = 0.0;
        while per_iter_secs <= target_secs / 4.0 && kdf.memory_bytes < max_memory {
            kdf.memory_bytes *= 2;
            let start = Instant::now();
            let _ = kdf.derive_one(probe);
            per_iter_secs = start.elapsed().as_secs_f64();
        }

        // Time enough passes to get a stable per-iteration estimate.
        let mut sampled = 0.0;
        let mut count = 1u32;
        while sampled < 0.02 {
            count *= 2;
            let start = Instant::now();
            for _ in 0..count {
                let _ = kdf.derive_one(probe);
            }
            sampled = start.elapsed().as_secs_f64();
        }
        let per_iter = sampled / count as f64;
        kdf.iterations = ((target_secs / (per_iter + 0.0005)) as u32).max(1);

        Ok(kdf)
    }

    pub fn memory_bytes(&self) -> u32 {
        self.memory_bytes
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    fn sequence_count(&self) -> usize {
        self.memory_bytes as usize / HASH_OUTPUT_BYTES
    }

    /// One ROMIX pass over the lookup table.
    fn derive_one(&self, password: &[u8]) -> SecretBytes {
        let seq = self.sequence_count();
        let mut lut = vec![0u8; seq * HASH_OUTPUT_BYTES];

        let mut salted = password.to_vec();
        salted.extend_from_slice(&self.salt);
        lut[..HASH_OUTPUT_BYTES].copy_from_slice(&sha512(&salted));
        salted.zeroize();

        for slot in 1..seq {
            let prev = (slot - 1) * HASH_OUTPUT_BYTES;
            let digest = sha512(&lut[prev..prev + HASH_OUTPUT_BYTES]);
            lut[slot * HASH_OUTPUT_BYTES..(slot + 1) * HASH_OUTPUT_BYTES]
                .copy_from_slice(&digest);
        }

        let mut x = [0u8; HASH_OUTPUT_BYTES];
        x.copy_from_slice(&lut[(seq - 1) * HASH_OUTPUT_BYTES..]);

        // Half as many lookups as table slots, trading compute for memory
        // pressure the way scrypt does.
        let lookups = seq / 2;
        let mut y = [0u8; HASH_OUTPUT_BYTES];
        for _ in 0..lookups {
            let tail = u32::from_le_bytes([x[60], x[61], x[62], x[63]]);
            let index = (tail as usize % seq) * HASH_OUTPUT_BYTES;
            for (i, b) in y.iter_mut().enumerate() {
                *b = x[i] ^ lut[index + i];
            }
            x = sha512(&y);
        }

        lut.zeroize();
        y.zeroize();

        let out = SecretBytes::from(&x[..KDF_OUTPUT_BYTES]);
        x.zeroize();
        out
    }

    /// Full derivation: `iterations` chained ROMIX passes.
    pub fn derive(&self, password: &[u8]) -> SecretBytes {
        let mut key = SecretBytes::from(password);
        for _ in 0..self.iterations {
            key = self.derive_one(key.as_slice());
        }
        key
    }

    /// Identifier binding these parameters: hash256 of the serialized form.
    pub fn id(&self) -> Vec<u8> {
        hash256(&self.serialize()).to_vec()
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut bw = BinaryWriter::new();
        bw.put_var_bytes(HASH_FUNCTION_NAME.as_bytes());
        bw.put_u32_le(self.memory_bytes);
        bw.put_u32_le(self.iterations);
        bw.put_var_bytes(&self.salt);
        bw.into_vec()
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, SerializationError> {
        let mut br = BinaryReader::new(data);
        let name = br.get_var_bytes()?;
        if name != HASH_FUNCTION_NAME.as_bytes() {
            return Err(SerializationError::LengthMismatch(format!(
                "unknown kdf hash function: {}",
                String::from_utf8_lossy(&name)
            )));
        }
        let memory_bytes = br.get_u32_le()?;
        let iterations = br.get_u32_le()?;
        let salt = br.get_var_bytes()?;
        Ok(Self::from_params(memory_bytes, iterations, salt))
    }
}
