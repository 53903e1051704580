/// Encryption layer module
///
/// Everything between raw AES/KDF primitives and the wallet: per-ciphertext
/// metadata, the encrypted containers stored on disk, and the
/// decrypted-data container that mediates passphrase prompts and scoped
/// in-memory decryption windows.
pub mod assets;
pub mod cipher;
pub mod container;

pub use assets::{CipherData, EncryptedKey, EncryptedPrivateKey, EncryptedSeed, KeyData};
pub use cipher::Cipher;
pub use container::{ContainerLock, DecryptedDataContainer, PassphrasePrompt};
