/// Hierarchical-deterministic Bitcoin wallet storage and key-derivation
/// engine
///
/// Holds a tree of accounts whose leaves are chains of secp256k1 key
/// pairs, persists them in an embedded key-value store, keeps private
/// material encrypted under passphrase-derived keys, and exposes the
/// resolver surface a transaction signer requires. Also manages the
/// authorized-peers wallet used to authenticate encrypted-handshake
/// peers.
pub mod cli;
pub mod crypto;
pub mod encryption;
pub mod error;
pub mod storage;
pub mod util;
pub mod wallet;

// Re-export common types for convenience
pub use error::{WalletError, WalletResult};
pub use wallet::Wallet;

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Initialize logging for the wallet
pub fn init_logging() {
    tracing_subscriber::fmt::init();
}
