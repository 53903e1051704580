/// Core wallet module
///
/// The account tree: BIP-32 nodes, derivation schemes, assets, asset and
/// address accounts, metadata accounts, the wallet itself and the
/// resolver feeds a signer consumes.
pub mod address;
pub mod address_account;
pub mod asset;
pub mod asset_account;
pub mod bip32;
pub mod core;
pub mod derivation;
pub mod metadata;
pub mod resolver;

pub use address::{AddressEntry, AddressType};
pub use address_account::{AccountKind, AddressAccount};
pub use asset::{AssetEntry, AssetId};
pub use asset_account::AssetAccount;
pub use bip32::Bip32Node;
pub use self::core::{AuthorizedPeers, CreateParams, MultisigWallet, Wallet};
pub use derivation::DerivationScheme;
pub use metadata::{MetaAccount, MetaAccountKind, PeerProjection};
pub use resolver::{ExoticResolver, MultisigResolver, ResolverFeed, WalletResolver};
