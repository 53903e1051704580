/// Error types for the wallet engine
///
/// A unified error system covering every layer of the wallet: crypto
/// primitives, storage, derivation, account management, encryption and
/// the resolver surface.
use thiserror::Error;

/// Main wallet error type with comprehensive error variants
#[derive(Debug, Error)]
pub enum WalletError {
    #[error("Cryptographic operation failed: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Storage operation failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Key derivation failed: {0}")]
    Derivation(#[from] DerivationError),

    #[error("Account operation failed: {0}")]
    Account(#[from] AccountError),

    #[error("Encryption layer failure: {0}")]
    Encryption(#[from] EncryptionError),

    #[error("Resolver failure: {0}")]
    Resolver(#[from] ResolverError),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Cryptographic primitive errors
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid curve point")]
    InvalidPoint,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Random number generation failed")]
    RngFailed,

    #[error("Bad input length: expected {expected}, got {got}")]
    BadLength { expected: usize, got: usize },

    #[error("ECDSA error: {0}")]
    Ecdsa(#[from] secp256k1::Error),
}

/// Storage and file errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Wallet file not found: {0}")]
    FileMissing(String),

    #[error("Invalid storage path: {0}")]
    InvalidPath(String),

    #[error("No entry under key")]
    MissingEntry,
}

impl From<sled::Error> for StorageError {
    fn from(e: sled::Error) -> Self {
        StorageError::Database(e.to_string())
    }
}

/// Binary record encode/decode errors
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("Record truncated: wanted {wanted} more bytes, {left} left")]
    Truncated { wanted: usize, left: usize },

    #[error("Unknown tag byte: {0:#04x}")]
    UnknownTag(u8),

    #[error("Length mismatch: {0}")]
    LengthMismatch(String),

    #[error("Unsupported record version: {0}")]
    UnsupportedVersion(u8),
}

/// Key-tree derivation errors
#[derive(Debug, Error)]
pub enum DerivationError {
    #[error("Cannot derive a hardened child from a public key")]
    HardenedFromPublic,

    #[error("Derivation depth overflow")]
    DepthOverflow,

    #[error("ECDH salt already present")]
    SaltAlreadyPresent,

    #[error("Parent asset carries no private key")]
    PrivateKeyUnavailable,

    #[error("Derivation produced an invalid child key")]
    InvalidChildKey,
}

/// Account-level errors
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("Unknown account id: {0:#010x}")]
    UnknownAccount(u32),

    #[error("Account id collides with a reserved sentinel")]
    AccountIdCollision,

    #[error("Unsupported script type for this account")]
    UnsupportedScriptType,

    #[error("Chain extension cannot reach the requested index")]
    LookupOverflow,

    #[error("Unknown asset id")]
    UnknownAsset,
}

/// Encryption-layer errors
#[derive(Debug, Error)]
pub enum EncryptionError {
    #[error("Wrong passphrase")]
    WrongPassphrase,

    #[error("Passphrase entry cancelled by user")]
    PassphraseCancelled,

    #[error("Encryption key not available: {0}")]
    KeyUnavailable(String),

    #[error("Lock already held by this thread")]
    AlreadyLocked,

    #[error("Corrupt ciphertext")]
    CorruptCiphertext,

    #[error("No passphrase prompt installed")]
    NoPrompt,
}

/// Resolver feed errors
#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("Unknown address")]
    UnknownAddress,

    #[error("No asset for public key")]
    NoAsset,

    #[error("Private key unavailable")]
    PrivateKeyUnavailable,
}

/// Result type for all wallet operations
pub type WalletResult<T> = Result<T, WalletError>;

/// Result type for cryptographic operations
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
