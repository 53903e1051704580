/// Cryptographic primitives module
///
/// Thin adapters over audited implementations: hashing and HMAC from
/// `bitcoin::hashes`, curve math from `secp256k1`, AES-256-CBC from the
/// RustCrypto `aes`/`cbc` crates, OS randomness from `getrandom`. Nothing
/// above this module touches a crypto crate directly; all inputs and
/// outputs at this boundary are plain byte buffers.
pub mod aes;
pub mod ecc;
pub mod hash;
pub mod kdf;
pub mod random;
pub mod secure_bytes;

/// AES-256 key size in bytes
pub const AES_KEY_SIZE: usize = 32;

/// AES-CBC IV size in bytes
pub const AES_IV_SIZE: usize = 16;

/// Salt size for the key derivation function
pub const KDF_SALT_SIZE: usize = 32;

/// Default KDF compute target in seconds
pub const DEFAULT_KDF_TARGET_SECS: f64 = 0.25;

/// Default KDF memory ceiling (32 MiB)
pub const DEFAULT_KDF_MAX_MEMORY: u32 = 32 * 1024 * 1024;

pub use kdf::KdfRomix;
pub use random::{fill_random, generate_random_bytes};
pub use secure_bytes::SecretBytes;
