/// Asset accounts
///
/// One derivation chain: an ordered map of assets by index, the
/// look-ahead policy, and the highest-used-index watermark. The watermark
/// is persisted before an asset is handed out, and chain extensions
/// commit in a single batch.
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::crypto::SecretBytes;
use crate::encryption::{ContainerLock, DecryptedDataContainer};
use crate::error::{
    AccountError, DerivationError, SerializationError, WalletError, WalletResult,
};
use crate::storage::{DbTree, WriteBatch};
use crate::util::{BinaryReader, BinaryWriter, ReentrantLock};
use crate::wallet::address::{AddressEntry, AddressType};
use crate::wallet::asset::{AssetEntry, AssetId, ASSETENTRY_PREFIX};
use crate::wallet::derivation::DerivationScheme;

pub const ASSET_ACCOUNT_PREFIX: u8 = 0xE1;
pub const ASSET_COUNT_PREFIX: u8 = 0xE2;
pub const ASSET_TOP_INDEX_PREFIX: u8 = 0xE3;
pub const ECDH_SALT_PREFIX: u8 = 0xE4;

/// Default look-ahead: pre-derived assets kept beyond the watermark.
pub const DEFAULT_LOOKUP: u32 = 100;

const ACCOUNT_VERSION: u8 = 0x01;

#[derive(Default)]
struct HashCache {
    entries: HashMap<AssetId, HashMap<AddressType, Vec<u8>>>,
    last_hashed: Option<u32>,
}

pub struct AssetAccount {
    id: u32,
    address_account_id: u32,
    root: Option<AssetEntry>,
    derivation: DerivationScheme,
    assets: BTreeMap<u32, AssetEntry>,
    highest_used: Option<u32>,
    lookup: u32,
    hash_cache: Mutex<HashCache>,
    lock: Arc<ReentrantLock>,
}

impl AssetAccount {
    pub fn new(
        id: u32,
        address_account_id: u32,
        root: Option<AssetEntry>,
        derivation: DerivationScheme,
        lookup: u32,
    ) -> Self {
        Self {
            id,
            address_account_id,
            root,
            derivation,
            assets: BTreeMap::new(),
            highest_used: None,
            lookup: lookup.max(1),
            hash_cache: Mutex::new(HashCache::default()),
            lock: Arc::new(ReentrantLock::new()),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn address_account_id(&self) -> u32 {
        self.address_account_id
    }

    pub fn derivation(&self) -> &DerivationScheme {
        &self.derivation
    }

    pub fn root(&self) -> Option<&AssetEntry> {
        self.root.as_ref()
    }

    pub fn lookup(&self) -> u32 {
        self.lookup
    }

    pub fn highest_used_index(&self) -> Option<u32> {
        self.highest_used
    }

    pub fn last_computed_index(&self) -> Option<u32> {
        self.assets.keys().next_back().copied()
    }

    pub fn asset_count(&self) -> usize {
        self.assets.len()
    }

    pub fn get_asset(&self, index: u32) -> Option<&AssetEntry> {
        self.assets.get(&index)
    }

    pub fn assets(&self) -> impl Iterator<Item = &AssetEntry> {
        self.assets.values()
    }

    /// 8-byte on-disk id: address-account id then asset-account id, both
    /// big-endian.
    pub fn full_id(&self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[..4].copy_from_slice(&self.address_account_id.to_be_bytes());
        out[4..].copy_from_slice(&self.id.to_be_bytes());
        out
    }

    fn header_key(&self) -> Vec<u8> {
        let mut key = vec![ASSET_ACCOUNT_PREFIX];
        key.extend_from_slice(&self.full_id());
        key
    }

    fn count_key(&self) -> Vec<u8> {
        let mut key = vec![ASSET_COUNT_PREFIX];
        key.extend_from_slice(&self.full_id());
        key
    }

    fn top_index_key(&self) -> Vec<u8> {
        let mut key = vec![ASSET_TOP_INDEX_PREFIX];
        key.extend_from_slice(&self.full_id());
        key
    }

    fn asset_prefix(&self) -> Vec<u8> {
        let mut key = vec![ASSETENTRY_PREFIX];
        key.extend_from_slice(&self.full_id());
        key
    }

    fn salt_key(&self, index: u32) -> Vec<u8> {
        let mut key = vec![ECDH_SALT_PREFIX];
        key.extend_from_slice(&self.full_id());
        key.extend_from_slice(&index.to_be_bytes());
        key
    }

    /// Hand out the next unused asset, bumping and persisting the
    /// watermark first and growing the look-ahead when the chain runs
    /// short.
    pub fn get_new_asset(&mut self, tree: &DbTree) -> WalletResult<AssetEntry> {
        let lock = Arc::clone(&self.lock);
        let _guard = lock.acquire();

        let next = self.highest_used.map_or(0, |i| i + 1);
        let mut bw = BinaryWriter::new();
        bw.put_var_int(next as u64);
        tree.put(&self.top_index_key(), bw.as_slice())?;
        self.highest_used = Some(next);

        // Keep at least one unused asset beyond the watermark.
        let needs_extension = match self.last_computed_index() {
            Some(last) => next + 1 > last,
            None => true,
        };
        if needs_extension {
            let count = self.lookup.max(next + 1);
            self.extend_public_chain(tree, count)?;
        }

        self.assets
            .get(&next)
            .cloned()
            .ok_or_else(|| AccountError::LookupOverflow.into())
    }

    /// Extend the public chain by `count` assets past the last computed
    /// index.
    pub fn extend_public_chain(&mut self, tree: &DbTree, count: u32) -> WalletResult<()> {
        if count == 0 {
            return Ok(());
        }
        let target = self.last_computed_index().map_or(count - 1, |l| l + count);
        self.extend_public_chain_to_index(tree, target)
    }

    /// Extend the public chain up to `target` inclusive; a no-op when the
    /// chain already reaches it.
    pub fn extend_public_chain_to_index(&mut self, tree: &DbTree, target: u32) -> WalletResult<()> {
        let lock = Arc::clone(&self.lock);
        let _guard = lock.acquire();

        let start = match self.last_computed_index() {
            Some(last) if last >= target => return Ok(()),
            Some(last) => last + 1,
            None => 0,
        };

        let parent = self.derivation_parent(start)?;
        let produced = self.derivation.extend_public_chain(&parent, start, target)?;
        debug!(account = self.id, start, target, "extended public chain");
        self.insert_assets(tree, produced, false)
    }

    /// Extend the private chain up to `target` inclusive, upgrading
    /// public-only assets in place.
    pub fn extend_private_chain_to_index(
        &mut self,
        container: &DecryptedDataContainer,
        scope: &ContainerLock<'_>,
        tree: &DbTree,
        target: u32,
    ) -> WalletResult<()> {
        let lock = Arc::clone(&self.lock);
        let _guard = lock.acquire();

        // First index that still lacks a private key.
        let start = (0..=target)
            .find(|i| self.assets.get(i).map_or(true, |a| !a.has_private_key()));
        let Some(start) = start else {
            return Ok(());
        };

        let parent = if self.derivation.extends_from_last_asset() {
            // Walk back to the nearest private-bearing asset.
            let mut walk = start;
            loop {
                if walk == 0 {
                    break self.root_with_private()?;
                }
                walk -= 1;
                if let Some(asset) = self.assets.get(&walk) {
                    if asset.has_private_key() {
                        break asset.clone();
                    }
                }
            }
        } else {
            self.root_with_private()?
        };

        let cipher_template = parent.privkey().and_then(|pk| match &pk.data {
            crate::encryption::KeyData::Encrypted { data } => Some(data.cipher.clone()),
            crate::encryption::KeyData::Clear { .. } => None,
        });

        let start = if self.derivation.extends_from_last_asset() {
            // Chain restarts right after the parent we found.
            match parent.index() {
                crate::wallet::asset::ROOT_ASSET_INDEX => 0,
                i => i + 1,
            }
        } else {
            start
        };

        let produced = self.derivation.extend_private_chain(
            container,
            scope,
            cipher_template.as_ref(),
            &parent,
            start,
            target,
        )?;
        self.insert_assets(tree, produced, true)
    }

    pub fn extend_private_chain(
        &mut self,
        container: &DecryptedDataContainer,
        scope: &ContainerLock<'_>,
        tree: &DbTree,
        count: u32,
    ) -> WalletResult<()> {
        if count == 0 {
            return Ok(());
        }
        let target = self.last_computed_index().map_or(count - 1, |l| l.max(count - 1));
        self.extend_private_chain_to_index(container, scope, tree, target)
    }

    fn root_with_private(&self) -> WalletResult<AssetEntry> {
        let root = self
            .root
            .as_ref()
            .ok_or(DerivationError::PrivateKeyUnavailable)?;
        if !root.has_private_key() {
            return Err(DerivationError::PrivateKeyUnavailable.into());
        }
        Ok(root.clone())
    }

    fn derivation_parent(&self, start: u32) -> WalletResult<AssetEntry> {
        if self.derivation.extends_from_last_asset() && start > 0 {
            if let Some(last) = self.assets.get(&(start - 1)) {
                return Ok(last.clone());
            }
        }
        self.root
            .clone()
            .ok_or_else(|| WalletError::InvariantViolation("account has no root asset".to_string()))
    }

    /// Insert produced assets and commit them in one batch. Public-only
    /// entries never overwrite private-bearing ones; private entries
    /// replace public-only twins after a pubkey check.
    fn insert_assets(
        &mut self,
        tree: &DbTree,
        produced: Vec<AssetEntry>,
        upgrading: bool,
    ) -> WalletResult<()> {
        let mut batch = WriteBatch::new();
        for mut asset in produced {
            let index = asset.index();
            if let Some(existing) = self.assets.get(&index) {
                if existing.has_private_key() {
                    continue;
                }
                if upgrading {
                    if existing.pubkey_uncompressed() != asset.pubkey_uncompressed() {
                        return Err(WalletError::InvariantViolation(format!(
                            "private extension diverged at index {index}"
                        )));
                    }
                } else {
                    continue;
                }
            }
            batch.put(&asset.db_key(), &asset.serialize());
            asset.mark_committed();
            self.assets.insert(index, asset);
        }

        let mut bw = BinaryWriter::new();
        bw.put_var_int(self.assets.len() as u64);
        batch.put(&self.count_key(), bw.as_slice());
        tree.apply_batch(batch)?;
        Ok(())
    }

    /// Walk private derivation up to `index` and return the decrypted key.
    /// For root-based schemes this is constant work; for the linear
    /// Armory-135 chain it back-fills from the nearest private asset.
    pub fn fill_private_key(
        &mut self,
        container: &DecryptedDataContainer,
        scope: &ContainerLock<'_>,
        tree: &DbTree,
        index: u32,
    ) -> WalletResult<SecretBytes> {
        self.extend_private_chain_to_index(container, scope, tree, index)?;
        let asset = self
            .assets
            .get(&index)
            .ok_or(AccountError::UnknownAsset)?;
        let privkey = asset
            .privkey()
            .ok_or(DerivationError::PrivateKeyUnavailable)?;
        Ok(container.get_decrypted_private_key(scope, privkey)?)
    }

    /// Register a new ECDH salt and persist it immediately.
    pub fn add_salt(&mut self, tree: &DbTree, salt: &[u8]) -> WalletResult<u32> {
        let lock = Arc::clone(&self.lock);
        let _guard = lock.acquire();
        let index = self.derivation.add_salt(salt)?;
        let mut bw = BinaryWriter::new();
        bw.put_var_bytes(salt);
        tree.put(&self.salt_key(index), bw.as_slice())?;
        Ok(index)
    }

    /// Lazily maintained map `asset id -> {script type -> prefixed hash}`
    /// over every computed asset.
    pub fn get_address_hash_map(
        &self,
        types: &BTreeSet<AddressType>,
    ) -> WalletResult<HashMap<AssetId, HashMap<AddressType, Vec<u8>>>> {
        let mut cache = self.hash_cache.lock().expect("hash cache poisoned");
        let from = cache.last_hashed.map_or(0, |l| l + 1);
        for (index, asset) in self.assets.range(from..) {
            let mut per_type = HashMap::new();
            for address_type in types {
                if *address_type == AddressType::P2wshMultisig {
                    continue;
                }
                let entry = AddressEntry::new(asset.clone(), *address_type)?;
                per_type.insert(*address_type, entry.prefixed_hash()?);
            }
            cache.entries.insert(*asset.id(), per_type);
            cache.last_hashed = Some(*index);
        }
        Ok(cache.entries.clone())
    }

    fn serialize_header(&self) -> Vec<u8> {
        let mut bw = BinaryWriter::new();
        bw.put_u8(ACCOUNT_VERSION);
        bw.put_u8(self.derivation.tag());
        bw.put_u32_be(self.address_account_id);
        bw.put_u32_be(self.id);
        bw.put_u32_le(self.lookup);
        match &self.root {
            Some(root) => {
                bw.put_u8(0x01);
                bw.put_var_bytes(&root.serialize());
            }
            None => bw.put_u8(0x00),
        }
        bw.put_var_bytes(&self.derivation.serialize());
        bw.into_vec()
    }

    /// Write the account header, watermark and any uncommitted assets in
    /// one batch.
    pub fn commit(&mut self, tree: &DbTree) -> WalletResult<()> {
        let lock = Arc::clone(&self.lock);
        let _guard = lock.acquire();
        let mut batch = WriteBatch::new();
        batch.put(&self.header_key(), &self.serialize_header());

        if let Some(top) = self.highest_used {
            let mut bw = BinaryWriter::new();
            bw.put_var_int(top as u64);
            batch.put(&self.top_index_key(), bw.as_slice());
        }

        for asset in self.assets.values_mut() {
            if asset.needs_commit() {
                batch.put(&asset.db_key(), &asset.serialize());
                asset.mark_committed();
            }
        }

        let mut bw = BinaryWriter::new();
        bw.put_var_int(self.assets.len() as u64);
        batch.put(&self.count_key(), bw.as_slice());
        tree.apply_batch(batch)?;
        Ok(())
    }

    /// Read an account back from disk.
    pub fn load(tree: &DbTree, address_account_id: u32, id: u32) -> WalletResult<Self> {
        let mut probe = Self::new(
            id,
            address_account_id,
            None,
            DerivationScheme::ArmoryLegacy {
                chaincode: SecretBytes::empty(),
            },
            DEFAULT_LOOKUP,
        );

        let header = tree.get_existing(&probe.header_key())?;
        let mut br = BinaryReader::new(&header);
        let version = br.get_u8()?;
        if version != ACCOUNT_VERSION {
            return Err(SerializationError::UnsupportedVersion(version).into());
        }
        let _tag = br.get_u8()?;
        let stored_address_account = br.get_u32_be()?;
        let stored_id = br.get_u32_be()?;
        if stored_address_account != address_account_id || stored_id != id {
            return Err(WalletError::InvariantViolation(
                "asset account record does not match its key".to_string(),
            ));
        }
        probe.lookup = br.get_u32_le()?.max(1);
        if br.get_u8()? == 0x01 {
            let blob = br.get_var_bytes()?;
            probe.root = Some(AssetEntry::deserialize(&blob)?);
        }
        let scheme_blob = br.get_var_bytes()?;
        probe.derivation = DerivationScheme::deserialize(&scheme_blob)?;

        // ECDH salts live under their own subkeys.
        let mut salt_prefix = vec![ECDH_SALT_PREFIX];
        salt_prefix.extend_from_slice(&probe.full_id());
        for (key, value) in tree.scan_prefix(&salt_prefix)? {
            let index = u32::from_be_bytes(
                key[key.len() - 4..]
                    .try_into()
                    .expect("sliced four bytes"),
            );
            let mut sbr = BinaryReader::new(&value);
            probe
                .derivation
                .insert_salt_at_index(sbr.get_var_bytes()?, index);
        }

        for (key, value) in tree.scan_prefix(&probe.asset_prefix())? {
            let index = u32::from_be_bytes(
                key[key.len() - 4..]
                    .try_into()
                    .expect("sliced four bytes"),
            );
            let asset = AssetEntry::deserialize(&value)?;
            probe.assets.insert(index, asset);
        }

        if let Some(value) = tree.get(&probe.top_index_key())? {
            let mut tbr = BinaryReader::new(&value);
            probe.highest_used = Some(tbr.get_var_int()? as u32);
        }

        if let Some(value) = tree.get(&probe.count_key())? {
            let mut cbr = BinaryReader::new(&value);
            let count = cbr.get_var_int()? as usize;
            if count != probe.assets.len() {
                warn!(
                    expected = count,
                    found = probe.assets.len(),
                    "asset count record out of step"
                );
            }
        }

        Ok(probe)
    }

    /// Watching-only mirror: public copies of every asset, same watermark,
    /// same salts.
    pub fn watching_only_copy(&self) -> Self {
        let derivation = match &self.derivation {
            DerivationScheme::ArmoryLegacy { chaincode } => DerivationScheme::ArmoryLegacy {
                chaincode: chaincode.clone(),
            },
            DerivationScheme::Bip32 {
                chaincode,
                depth,
                leaf_id,
            } => DerivationScheme::Bip32 {
                chaincode: *chaincode,
                depth: *depth,
                leaf_id: *leaf_id,
            },
            DerivationScheme::Bip32Salted {
                chaincode,
                depth,
                leaf_id,
                salt,
            } => DerivationScheme::Bip32Salted {
                chaincode: *chaincode,
                depth: *depth,
                leaf_id: *leaf_id,
                salt: salt.clone(),
            },
            DerivationScheme::Ecdh { id, salts } => DerivationScheme::Ecdh {
                id: *id,
                salts: salts.clone(),
            },
        };

        let mut copy = Self::new(
            self.id,
            self.address_account_id,
            self.root.as_ref().map(|r| r.public_copy()),
            derivation,
            self.lookup,
        );
        copy.highest_used = self.highest_used;
        copy.assets = self
            .assets
            .iter()
            .map(|(i, a)| (*i, a.public_copy()))
            .collect();
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{ecc, KdfRomix};
    use crate::encryption::{Cipher, CipherData, EncryptedPrivateKey, KeyData};
    use crate::storage::WalletStorage;
    use crate::wallet::asset::ROOT_ASSET_INDEX;
    use tempfile::TempDir;

    struct Fixture {
        account: AssetAccount,
        container: DecryptedDataContainer,
        tree: DbTree,
        _storage: WalletStorage,
        _dir: TempDir,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let storage = WalletStorage::create(&dir.path().join("wallet")).unwrap();
        let headers = storage.open_tree("headers").unwrap();
        let tree = storage.open_tree("w1").unwrap();
        let container = DecryptedDataContainer::new(headers, SecretBytes::random(32).unwrap());
        let kdf = KdfRomix::from_params(2048, 1, vec![0x21; 32]);
        let scope = container.unlock();
        let (master_id, _) = container.setup_master_key(&scope, &kdf, None).unwrap();

        // Encrypted root key for a legacy chain.
        let root_priv = [9u8; 32];
        let root_pub = ecc::pubkey_from_priv(&root_priv).unwrap();
        let root_id = AssetId::new(0xF6E10000, 1, ROOT_ASSET_INDEX);
        let cipher = Cipher::new(kdf.id(), master_id).unwrap();
        let ciphertext = container
            .encrypt_data(&scope, &cipher, &root_priv)
            .unwrap();
        drop(scope);
        let root = AssetEntry::new_with_private_key(
            root_id,
            root_pub,
            EncryptedPrivateKey {
                id: root_id.privkey_id(),
                data: KeyData::Encrypted {
                    data: CipherData::new(ciphertext, cipher),
                },
            },
        );

        let account = AssetAccount::new(
            1,
            0xF6E10000,
            Some(root),
            DerivationScheme::ArmoryLegacy {
                chaincode: SecretBytes::from(vec![0x77; 32]),
            },
            4,
        );
        Fixture {
            account,
            container,
            tree,
            _storage: storage,
            _dir: dir,
        }
    }

    #[test]
    fn test_get_new_asset_bumps_watermark_and_extends() {
        let mut fx = fixture();
        assert!(fx.account.highest_used_index().is_none());

        let first = fx.account.get_new_asset(&fx.tree).unwrap();
        assert_eq!(first.index(), 0);
        assert_eq!(fx.account.highest_used_index(), Some(0));
        // Look-ahead keeps assets beyond the watermark.
        assert!(fx.account.last_computed_index().unwrap() >= 1);

        let second = fx.account.get_new_asset(&fx.tree).unwrap();
        assert_eq!(second.index(), 1);
        assert_ne!(
            first.pubkey_uncompressed(),
            second.pubkey_uncompressed()
        );
    }

    #[test]
    fn test_extension_to_index_is_idempotent() {
        let mut fx = fixture();
        fx.account
            .extend_public_chain_to_index(&fx.tree, 5)
            .unwrap();
        let count = fx.account.asset_count();
        let pubkeys: Vec<_> = fx
            .account
            .assets()
            .map(|a| a.pubkey_uncompressed().to_vec())
            .collect();

        fx.account
            .extend_public_chain_to_index(&fx.tree, 5)
            .unwrap();
        assert_eq!(fx.account.asset_count(), count);
        let again: Vec<_> = fx
            .account
            .assets()
            .map(|a| a.pubkey_uncompressed().to_vec())
            .collect();
        assert_eq!(pubkeys, again);
    }

    #[test]
    fn test_private_extension_preserves_public_keys() {
        let mut fx = fixture();
        fx.account
            .extend_public_chain_to_index(&fx.tree, 6)
            .unwrap();
        let pubkeys: Vec<_> = fx
            .account
            .assets()
            .map(|a| a.pubkey_uncompressed().to_vec())
            .collect();

        let scope = fx.container.unlock();
        fx.account
            .extend_private_chain_to_index(&fx.container, &scope, &fx.tree, 4)
            .unwrap();

        for (i, asset) in fx.account.assets().enumerate() {
            assert_eq!(asset.pubkey_uncompressed(), pubkeys[i].as_slice());
            if (i as u32) <= 4 {
                assert!(asset.has_private_key());
            } else {
                assert!(!asset.has_private_key());
            }
        }
    }

    #[test]
    fn test_fill_private_key_walks_legacy_chain() {
        let mut fx = fixture();
        fx.account
            .extend_public_chain_to_index(&fx.tree, 5)
            .unwrap();
        let scope = fx.container.unlock();
        let plain = fx
            .account
            .fill_private_key(&fx.container, &scope, &fx.tree, 3)
            .unwrap();
        let expected = fx.account.get_asset(3).unwrap().pubkey_uncompressed();
        assert_eq!(ecc::pubkey_from_priv(plain.as_slice()).unwrap(), expected);
    }

    #[test]
    fn test_commit_and_load_round_trip() {
        let mut fx = fixture();
        fx.account
            .extend_public_chain_to_index(&fx.tree, 3)
            .unwrap();
        let _ = fx.account.get_new_asset(&fx.tree).unwrap();
        fx.account.commit(&fx.tree).unwrap();

        let loaded = AssetAccount::load(&fx.tree, 0xF6E10000, 1).unwrap();
        assert_eq!(loaded.asset_count(), fx.account.asset_count());
        assert_eq!(loaded.highest_used_index(), fx.account.highest_used_index());
        assert_eq!(loaded.lookup(), fx.account.lookup());
        for (a, b) in loaded.assets().zip(fx.account.assets()) {
            assert_eq!(a.pubkey_uncompressed(), b.pubkey_uncompressed());
            assert_eq!(a.has_private_key(), b.has_private_key());
        }
    }

    #[test]
    fn test_hash_map_is_memoised_and_typed() {
        let mut fx = fixture();
        fx.account
            .extend_public_chain_to_index(&fx.tree, 2)
            .unwrap();
        let mut types = BTreeSet::new();
        types.insert(AddressType::P2pkh);
        types.insert(AddressType::P2wpkh);

        let map = fx.account.get_address_hash_map(&types).unwrap();
        assert_eq!(map.len(), 3);
        for per_type in map.values() {
            assert_eq!(per_type.len(), 2);
            assert_eq!(per_type[&AddressType::P2pkh][0], 0x00);
            assert_eq!(per_type[&AddressType::P2wpkh][0], 0x90);
        }

        // Extending hashes only the new tail.
        fx.account
            .extend_public_chain_to_index(&fx.tree, 4)
            .unwrap();
        let map = fx.account.get_address_hash_map(&types).unwrap();
        assert_eq!(map.len(), 5);
    }

    #[test]
    fn test_watching_only_copy_has_no_private_material() {
        let mut fx = fixture();
        let scope = fx.container.unlock();
        fx.account
            .extend_private_chain_to_index(&fx.container, &scope, &fx.tree, 3)
            .unwrap();
        drop(scope);

        let copy = fx.account.watching_only_copy();
        assert_eq!(copy.asset_count(), fx.account.asset_count());
        assert!(copy.assets().all(|a| !a.has_private_key()));
        assert!(!copy.root().unwrap().has_private_key());
        // Public extension still works on the copy.
        let mut copy = copy;
        copy.extend_public_chain_to_index(&fx.tree, 6).unwrap();
        let parent_pub: Vec<_> = fx
            .account
            .derivation()
            .extend_public_chain(fx.account.get_asset(3).unwrap(), 4, 6)
            .unwrap()
            .iter()
            .map(|a| a.pubkey_uncompressed().to_vec())
            .collect();
        for (i, pubkey) in parent_pub.iter().enumerate() {
            assert_eq!(
                copy.get_asset(4 + i as u32).unwrap().pubkey_uncompressed(),
                pubkey.as_slice()
            );
        }
    }
}
