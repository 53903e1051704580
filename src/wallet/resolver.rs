/// Resolver feeds
///
/// The adapter surface a transaction signer consumes: script hash to
/// preimage, and public key to private key. The single-wallet resolver
/// caches as it resolves, the multisig variant pre-indexes public keys
/// across member wallets, and the exotic fallback linearly scans asset
/// accounts for keys used in unusual scripts.
use std::collections::HashMap;

use crate::crypto::SecretBytes;
use crate::encryption::ContainerLock;
use crate::error::ResolverError;
use crate::wallet::address::AddressEntry;
use crate::wallet::asset::AssetId;
use crate::wallet::core::Wallet;

pub trait ResolverFeed {
    /// Preimage for a script hash (raw or prefixed).
    fn get_by_val(&mut self, hash: &[u8]) -> Result<Vec<u8>, ResolverError>;

    /// Private key for a public key (compressed or uncompressed).
    fn get_priv_key_for_pubkey(&mut self, pubkey: &[u8]) -> Result<SecretBytes, ResolverError>;
}

/// Resolver over one wallet. Maintains `hash -> preimage` and
/// `pubkey -> asset` caches; misses search every account's hash map with
/// every permitted script-type prefix.
pub struct WalletResolver<'a> {
    wallet: &'a Wallet,
    scope: &'a ContainerLock<'a>,
    hash_to_preimage: HashMap<Vec<u8>, Vec<u8>>,
    pubkey_to_asset: HashMap<Vec<u8>, AssetId>,
}

impl<'a> WalletResolver<'a> {
    pub fn new(wallet: &'a Wallet, scope: &'a ContainerLock<'a>) -> Self {
        Self {
            wallet,
            scope,
            hash_to_preimage: HashMap::new(),
            pubkey_to_asset: HashMap::new(),
        }
    }

    /// Cache an entry's hash and preimage, walking nested predecessors so
    /// inner preimages resolve too.
    fn cache_entry(&mut self, entry: &AddressEntry, asset_id: AssetId) -> Result<(), ResolverError> {
        let mut current = Some(entry);
        while let Some(entry) = current {
            let prefixed = entry
                .prefixed_hash()
                .map_err(|_| ResolverError::UnknownAddress)?;
            let preimage = entry
                .preimage()
                .map_err(|_| ResolverError::UnknownAddress)?;
            // Both the raw and the prefixed form hit the cache.
            self.hash_to_preimage
                .insert(prefixed[1..].to_vec(), preimage.clone());
            self.hash_to_preimage.insert(prefixed, preimage);
            current = entry.predecessor();
        }

        let asset = self
            .wallet
            .get_asset_for_id(&asset_id)
            .map_err(|_| ResolverError::NoAsset)?;
        self.pubkey_to_asset
            .insert(asset.pubkey_uncompressed().to_vec(), asset_id);
        if let Ok(compressed) = asset.pubkey_compressed() {
            self.pubkey_to_asset.insert(compressed, asset_id);
        }
        Ok(())
    }

    fn search(&mut self, hash: &[u8]) -> Result<(), ResolverError> {
        for account in self.wallet.accounts() {
            // Candidate prefixed forms of the queried raw hash.
            let candidates: Vec<Vec<u8>> = account
                .address_types()
                .iter()
                .map(|t| {
                    let mut v = vec![t.prefix_byte()];
                    v.extend_from_slice(hash);
                    v
                })
                .collect();

            let map = account
                .get_address_hash_map()
                .map_err(|_| ResolverError::UnknownAddress)?;
            for (asset_id, per_type) in map {
                for (hit_type, prefixed) in per_type {
                    if prefixed == hash || candidates.iter().any(|c| *c == prefixed) {
                        // The hit's own type wins, not the type whose
                        // prefix we happened to query with.
                        let asset = self
                            .wallet
                            .get_asset_for_id(&asset_id)
                            .map_err(|_| ResolverError::NoAsset)?
                            .clone();
                        let entry = AddressEntry::new(asset, hit_type)
                            .map_err(|_| ResolverError::UnknownAddress)?;
                        self.cache_entry(&entry, asset_id)?;
                        return Ok(());
                    }
                }
            }
        }
        Err(ResolverError::UnknownAddress)
    }
}

impl ResolverFeed for WalletResolver<'_> {
    fn get_by_val(&mut self, hash: &[u8]) -> Result<Vec<u8>, ResolverError> {
        if let Some(preimage) = self.hash_to_preimage.get(hash) {
            return Ok(preimage.clone());
        }
        self.search(hash)?;
        self.hash_to_preimage
            .get(hash)
            .cloned()
            .ok_or(ResolverError::UnknownAddress)
    }

    fn get_priv_key_for_pubkey(&mut self, pubkey: &[u8]) -> Result<SecretBytes, ResolverError> {
        let asset_id = self
            .pubkey_to_asset
            .get(pubkey)
            .copied()
            .ok_or(ResolverError::NoAsset)?;
        decrypt_asset_key(self.wallet, self.scope, &asset_id)
    }
}

fn decrypt_asset_key(
    wallet: &Wallet,
    scope: &ContainerLock<'_>,
    asset_id: &AssetId,
) -> Result<SecretBytes, ResolverError> {
    let asset = wallet
        .get_asset_for_id(asset_id)
        .map_err(|_| ResolverError::NoAsset)?;
    let privkey = asset
        .privkey()
        .ok_or(ResolverError::PrivateKeyUnavailable)?;
    wallet
        .container()
        .get_decrypted_private_key(scope, privkey)
        .map_err(|_| ResolverError::PrivateKeyUnavailable)
}

/// Resolver suitable for multisig spends: pre-indexes every public key
/// (compressed and uncompressed) across all member wallets. Hash lookups
/// are unsupported; the signer supplies multisig scripts itself.
pub struct MultisigResolver<'a> {
    wallets: Vec<(&'a Wallet, &'a ContainerLock<'a>)>,
    pubkey_index: HashMap<Vec<u8>, (usize, AssetId)>,
}

impl<'a> MultisigResolver<'a> {
    pub fn new(wallets: Vec<(&'a Wallet, &'a ContainerLock<'a>)>) -> Self {
        let mut pubkey_index = HashMap::new();
        for (wallet_index, (wallet, _)) in wallets.iter().enumerate() {
            for account in wallet.accounts() {
                for chain in account.asset_accounts() {
                    for asset in chain.assets() {
                        pubkey_index.insert(
                            asset.pubkey_uncompressed().to_vec(),
                            (wallet_index, *asset.id()),
                        );
                        if let Ok(compressed) = asset.pubkey_compressed() {
                            pubkey_index.insert(compressed, (wallet_index, *asset.id()));
                        }
                    }
                }
            }
        }
        Self {
            wallets,
            pubkey_index,
        }
    }
}

impl ResolverFeed for MultisigResolver<'_> {
    fn get_by_val(&mut self, _hash: &[u8]) -> Result<Vec<u8>, ResolverError> {
        Err(ResolverError::UnknownAddress)
    }

    fn get_priv_key_for_pubkey(&mut self, pubkey: &[u8]) -> Result<SecretBytes, ResolverError> {
        let (wallet_index, asset_id) = self
            .pubkey_index
            .get(pubkey)
            .copied()
            .ok_or(ResolverError::NoAsset)?;
        let (wallet, scope) = self.wallets[wallet_index];
        decrypt_asset_key(wallet, scope, &asset_id)
    }
}

/// Fallback for exotic scripts: the single-wallet resolver first, then a
/// linear scan of every asset account for the queried public key.
pub struct ExoticResolver<'a> {
    inner: WalletResolver<'a>,
}

impl<'a> ExoticResolver<'a> {
    pub fn new(wallet: &'a Wallet, scope: &'a ContainerLock<'a>) -> Self {
        Self {
            inner: WalletResolver::new(wallet, scope),
        }
    }
}

impl ResolverFeed for ExoticResolver<'_> {
    fn get_by_val(&mut self, hash: &[u8]) -> Result<Vec<u8>, ResolverError> {
        self.inner.get_by_val(hash)
    }

    fn get_priv_key_for_pubkey(&mut self, pubkey: &[u8]) -> Result<SecretBytes, ResolverError> {
        match self.inner.get_priv_key_for_pubkey(pubkey) {
            Err(ResolverError::NoAsset) => {}
            other => return other,
        }
        for account in self.inner.wallet.accounts() {
            for chain in account.asset_accounts() {
                for asset in chain.assets() {
                    let matches = asset.pubkey_uncompressed() == pubkey
                        || asset
                            .pubkey_compressed()
                            .map(|c| c == pubkey)
                            .unwrap_or(false);
                    if matches {
                        return decrypt_asset_key(self.inner.wallet, self.inner.scope, asset.id());
                    }
                }
            }
        }
        Err(ResolverError::NoAsset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash::{hash160, sha256};
    use crate::crypto::{ecc, KdfRomix};
    use crate::wallet::address::AddressType;
    use crate::wallet::core::{CreateParams, Wallet};
    use tempfile::TempDir;

    fn test_params() -> CreateParams {
        CreateParams {
            passphrase: None,
            lookup: 3,
            kdf: Some(KdfRomix::from_params(2048, 1, vec![0x61; 32])),
        }
    }

    fn test_wallet() -> (Wallet, TempDir) {
        let dir = TempDir::new().unwrap();
        let seed = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let wallet =
            Wallet::create_from_seed(&dir.path().join("wallet"), &seed, test_params()).unwrap();
        (wallet, dir)
    }

    #[test]
    fn test_by_val_resolves_p2wpkh_preimage() {
        let (mut wallet, _dir) = test_wallet();
        let entry = wallet.get_new_address(Some(AddressType::P2wpkh)).unwrap();
        let prefixed = entry.prefixed_hash().unwrap();

        let scope = wallet.unlock();
        let mut resolver = WalletResolver::new(&wallet, &scope);
        let preimage = resolver.get_by_val(&prefixed[1..]).unwrap();
        assert_eq!(hash160(&preimage).as_slice(), &prefixed[1..]);
    }

    #[test]
    fn test_by_val_nested_feeds_inner_preimage() {
        let (mut wallet, _dir) = test_wallet();
        let entry = wallet
            .get_new_address(Some(AddressType::NestedP2wpkh))
            .unwrap();
        let outer = entry.prefixed_hash().unwrap();

        let scope = wallet.unlock();
        let mut resolver = WalletResolver::new(&wallet, &scope);

        // Outer hash resolves to the redeem script, and applying the hash
        // chain to the preimage reproduces the prefixed hash.
        let redeem = resolver.get_by_val(&outer[1..]).unwrap();
        let mut rebuilt = vec![outer[0]];
        rebuilt.extend_from_slice(&hash160(&redeem));
        assert_eq!(rebuilt, outer);

        // The inner witness program was cached along the way.
        let inner = entry.predecessor().unwrap();
        let inner_hash = inner.prefixed_hash().unwrap();
        let inner_preimage = resolver.get_by_val(&inner_hash).unwrap();
        assert_eq!(hash160(&inner_preimage).as_slice(), &inner_hash[1..]);
    }

    #[test]
    fn test_pubkey_path_needs_prior_hit() {
        let (mut wallet, _dir) = test_wallet();
        let entry = wallet.get_new_address(None).unwrap();
        let prefixed = entry.prefixed_hash().unwrap();
        let pubkey = entry.preimage().unwrap();

        let scope = wallet.unlock();
        let mut resolver = WalletResolver::new(&wallet, &scope);

        // Cold cache: the pubkey path misses.
        assert!(matches!(
            resolver.get_priv_key_for_pubkey(&pubkey),
            Err(ResolverError::NoAsset)
        ));

        // After a hash hit the pubkey resolves to the matching private key.
        resolver.get_by_val(&prefixed[1..]).unwrap();
        let privkey = resolver.get_priv_key_for_pubkey(&pubkey).unwrap();
        assert_eq!(
            ecc::compressed_pubkey_from_priv(privkey.as_slice()).unwrap(),
            pubkey
        );
    }

    #[test]
    fn test_exotic_fallback_scans_accounts() {
        let (mut wallet, _dir) = test_wallet();
        let entry = wallet.get_new_address(None).unwrap();
        let pubkey = entry.preimage().unwrap();

        let scope = wallet.unlock();
        let mut resolver = ExoticResolver::new(&wallet, &scope);
        // No prior hash hit, the linear scan still finds the key.
        let privkey = resolver.get_priv_key_for_pubkey(&pubkey).unwrap();
        assert_eq!(
            ecc::compressed_pubkey_from_priv(privkey.as_slice()).unwrap(),
            pubkey
        );

        assert!(matches!(
            resolver.get_priv_key_for_pubkey(&[0x02; 33]),
            Err(ResolverError::NoAsset)
        ));
    }

    #[test]
    fn test_multisig_resolver_spans_wallets() {
        let dir_a = TempDir::new().unwrap();
        let dir_b = TempDir::new().unwrap();
        let mut wallet_a = Wallet::create_from_seed(
            &dir_a.path().join("wallet"),
            &sha256(b"member a"),
            test_params(),
        )
        .unwrap();
        let mut wallet_b = Wallet::create_from_seed(
            &dir_b.path().join("wallet"),
            &sha256(b"member b"),
            test_params(),
        )
        .unwrap();
        let pub_a = wallet_a.get_new_address(None).unwrap().preimage().unwrap();
        let pub_b = wallet_b.get_new_address(None).unwrap().preimage().unwrap();

        let scope_a = wallet_a.unlock();
        let scope_b = wallet_b.unlock();
        let mut resolver =
            MultisigResolver::new(vec![(&wallet_a, &scope_a), (&wallet_b, &scope_b)]);

        for pubkey in [&pub_a, &pub_b] {
            let privkey = resolver.get_priv_key_for_pubkey(pubkey).unwrap();
            assert_eq!(
                &ecc::compressed_pubkey_from_priv(privkey.as_slice()).unwrap(),
                pubkey
            );
        }

        // Hash lookups are the signer's job in multisig spends.
        assert!(resolver.get_by_val(&[0u8; 20]).is_err());
    }
}
