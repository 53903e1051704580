/// Storage layer module
///
/// Embedded KV storage for wallet files. One sled database per wallet
/// file, with named trees as sub-databases.
pub mod wallet_storage;

pub use wallet_storage::{DbTree, WalletStorage, WriteBatch};
