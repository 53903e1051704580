/// Decrypted-data container
///
/// Mediates every access to plaintext secrets. Decrypted master keys and
/// private keys live in an in-memory cache that only exists while a caller
/// holds the container lock; dropping the outermost lock frame wipes the
/// cache. Passphrase prompts are resolved through a LIFO callback stack,
/// and master-key rotation runs under a non-reentrant exclusive lock with
/// a crash-safe three-step disk commit.
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::crypto::hash::hash256;
use crate::crypto::{KdfRomix, SecretBytes};
use crate::encryption::assets::{CipherData, EncryptedKey, EncryptedPrivateKey, KeyData};
use crate::encryption::cipher::Cipher;
use crate::error::{EncryptionError, StorageResult, WalletError, WalletResult};
use crate::storage::DbTree;
use crate::util::{LockGuard, ReentrantLock};

/// Primary disk slot for encryption-key records.
pub const ENCRYPTIONKEY_PREFIX: u8 = 0xC0;
/// Temporary slot used mid-rotation; replayed on load after a crash.
pub const ENCRYPTIONKEY_PREFIX_TEMP: u8 = 0xCC;
/// KDF parameter records.
pub const KDF_PREFIX: u8 = 0xC1;

/// Callback asking the user for the passphrase matching one of the given
/// encryption-key ids. An empty return means the user cancelled.
pub type PassphrasePrompt = Arc<dyn Fn(&BTreeSet<Vec<u8>>) -> SecretBytes + Send + Sync>;

/// An encryption key in the clear, with per-KDF derived forms memoised.
pub struct DecryptedEncryptionKey {
    raw: SecretBytes,
    derived: HashMap<Vec<u8>, SecretBytes>,
}

impl DecryptedEncryptionKey {
    pub fn new(raw: SecretBytes) -> Self {
        Self {
            raw,
            derived: HashMap::new(),
        }
    }

    pub fn raw(&self) -> &SecretBytes {
        &self.raw
    }

    /// Derived form of this key under the given KDF.
    pub fn derive(&mut self, kdf: &KdfRomix) -> SecretBytes {
        let kdf_id = kdf.id();
        if let Some(existing) = self.derived.get(&kdf_id) {
            return existing.clone();
        }
        let derived = kdf.derive(self.raw.as_slice());
        self.derived.insert(kdf_id, derived.clone());
        derived
    }

    /// Identifier of this key under the given KDF: binds material and KDF
    /// choice, never the IV.
    pub fn key_id(&mut self, kdf: &KdfRomix) -> Vec<u8> {
        let derived = self.derive(kdf);
        let mut preimage = derived.as_slice().to_vec();
        preimage.extend_from_slice(&kdf.id());
        hash256(&preimage).to_vec()
    }
}

#[derive(Default)]
struct DecryptedCache {
    encryption_keys: HashMap<Vec<u8>, DecryptedEncryptionKey>,
    private_keys: HashMap<Vec<u8>, SecretBytes>,
}

impl DecryptedCache {
    fn clear(&mut self) {
        // SecretBytes zeroes on drop.
        self.encryption_keys.clear();
        self.private_keys.clear();
    }
}

pub struct DecryptedDataContainer {
    tree: DbTree,
    kdfs: Mutex<HashMap<Vec<u8>, KdfRomix>>,
    encrypted_keys: Mutex<HashMap<Vec<u8>, EncryptedKey>>,
    default_key: SecretBytes,
    default_ids: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
    prompts: Mutex<Vec<PassphrasePrompt>>,
    cache: Mutex<DecryptedCache>,
    lock: ReentrantLock,
}

/// Scoped unlock of the container. While any frame is alive the holding
/// thread may read plaintext secrets; dropping the outermost frame wipes
/// the decrypted cache.
pub struct ContainerLock<'a> {
    container: &'a DecryptedDataContainer,
    guard: Option<LockGuard<'a>>,
}

impl Drop for ContainerLock<'_> {
    fn drop(&mut self) {
        if let Some(guard) = &self.guard {
            if guard.is_outermost() {
                self.container
                    .cache
                    .lock()
                    .expect("cache poisoned")
                    .clear();
            }
        }
        self.guard.take();
    }
}

impl DecryptedDataContainer {
    pub fn new(tree: DbTree, default_key: SecretBytes) -> Self {
        Self {
            tree,
            kdfs: Mutex::new(HashMap::new()),
            encrypted_keys: Mutex::new(HashMap::new()),
            default_key,
            default_ids: Mutex::new(HashMap::new()),
            prompts: Mutex::new(Vec::new()),
            cache: Mutex::new(DecryptedCache::default()),
            lock: ReentrantLock::new(),
        }
    }

    /// Read KDF and encryption-key records back from disk, replaying any
    /// temporary rotation slot left behind by a crash.
    pub fn load(&self) -> WalletResult<()> {
        // Crash replay: a temp slot holds the committed new state; rebuild
        // the primary slot from it.
        for (key, value) in self.tree.scan_prefix(&[ENCRYPTIONKEY_PREFIX_TEMP])? {
            let mut primary = vec![ENCRYPTIONKEY_PREFIX];
            primary.extend_from_slice(&key[1..]);
            self.tree.wipe(&primary)?;
            self.tree.put(&primary, &value)?;
            self.tree.delete(&key)?;
            self.tree.flush()?;
        }

        let mut kdfs = self.kdfs.lock().expect("kdf table poisoned");
        for (key, value) in self.tree.scan_prefix(&[KDF_PREFIX])? {
            match KdfRomix::deserialize(&value) {
                Ok(kdf) => {
                    kdfs.insert(key[1..].to_vec(), kdf);
                }
                Err(e) => warn!("skipping unreadable kdf record: {e}"),
            }
        }
        drop(kdfs);

        let mut keys = self.encrypted_keys.lock().expect("key table poisoned");
        for (key, value) in self.tree.scan_prefix(&[ENCRYPTIONKEY_PREFIX])? {
            match EncryptedKey::deserialize(&value) {
                Ok(record) => {
                    keys.insert(key[1..].to_vec(), record);
                }
                Err(e) => warn!("skipping unreadable encryption-key record: {e}"),
            }
        }
        Ok(())
    }

    /// Enter an unlock scope. Reentrant on the same thread; other threads
    /// block until every frame is released.
    pub fn unlock(&self) -> ContainerLock<'_> {
        ContainerLock {
            container: self,
            guard: Some(self.lock.acquire()),
        }
    }

    pub fn default_key(&self) -> &SecretBytes {
        &self.default_key
    }

    pub fn add_kdf(&self, kdf: &KdfRomix) -> StorageResult<()> {
        let id = kdf.id();
        let mut key = vec![KDF_PREFIX];
        key.extend_from_slice(&id);
        self.tree.put(&key, &kdf.serialize())?;
        self.kdfs
            .lock()
            .expect("kdf table poisoned")
            .insert(id, kdf.clone());
        Ok(())
    }

    pub fn get_kdf(&self, kdf_id: &[u8]) -> Option<KdfRomix> {
        self.kdfs
            .lock()
            .expect("kdf table poisoned")
            .get(kdf_id)
            .cloned()
    }

    pub fn add_encrypted_key(&self, record: EncryptedKey) -> StorageResult<()> {
        let mut key = vec![ENCRYPTIONKEY_PREFIX];
        key.extend_from_slice(record.id());
        self.tree.put(&key, &record.serialize())?;
        self.encrypted_keys
            .lock()
            .expect("key table poisoned")
            .insert(record.id().to_vec(), record);
        Ok(())
    }

    pub fn get_encrypted_key(&self, id: &[u8]) -> Option<EncryptedKey> {
        self.encrypted_keys
            .lock()
            .expect("key table poisoned")
            .get(id)
            .cloned()
    }

    /// Install a passphrase prompt on top of the stack.
    pub fn push_prompt(&self, prompt: PassphrasePrompt) {
        self.prompts.lock().expect("prompt stack poisoned").push(prompt);
    }

    pub fn pop_prompt(&self) {
        self.prompts.lock().expect("prompt stack poisoned").pop();
    }

    fn top_prompt(&self) -> Option<PassphrasePrompt> {
        self.prompts
            .lock()
            .expect("prompt stack poisoned")
            .last()
            .cloned()
    }

    fn default_key_id(&self, kdf: &KdfRomix) -> Vec<u8> {
        let kdf_id = kdf.id();
        if let Some(id) = self
            .default_ids
            .lock()
            .expect("default id cache poisoned")
            .get(&kdf_id)
        {
            return id.clone();
        }
        let id = DecryptedEncryptionKey::new(self.default_key.clone()).key_id(kdf);
        self.default_ids
            .lock()
            .expect("default id cache poisoned")
            .insert(kdf_id, id.clone());
        id
    }

    /// True when no decrypted material is held in memory.
    pub fn is_cache_empty(&self) -> bool {
        let cache = self.cache.lock().expect("cache poisoned");
        cache.encryption_keys.is_empty() && cache.private_keys.is_empty()
    }

    /// Resolve one of the candidate encryption keys into the decrypted
    /// cache, transitively decrypting wrapped keys and falling back to the
    /// passphrase prompt. Returns the id that resolved.
    pub fn populate_encryption_key(
        &self,
        candidates: &BTreeMap<Vec<u8>, Vec<u8>>,
    ) -> Result<Vec<u8>, EncryptionError> {
        self.populate_inner(candidates, 0)
    }

    fn populate_inner(
        &self,
        candidates: &BTreeMap<Vec<u8>, Vec<u8>>,
        depth: u8,
    ) -> Result<Vec<u8>, EncryptionError> {
        if depth > 4 {
            return Err(EncryptionError::KeyUnavailable(
                "encryption-key wrap chain too deep".to_string(),
            ));
        }

        // Anything already decrypted wins.
        {
            let cache = self.cache.lock().expect("cache poisoned");
            for id in candidates.keys() {
                if cache.encryption_keys.contains_key(id) {
                    return Ok(id.clone());
                }
            }
        }

        // A candidate wrapped on disk: resolve its own wrapping key first,
        // then peel it.
        for (id, _kdf_id) in candidates {
            let Some(record) = self.get_encrypted_key(id) else {
                continue;
            };
            let inner: BTreeMap<Vec<u8>, Vec<u8>> = record
                .cipher_data()
                .values()
                .map(|cd| {
                    (
                        cd.cipher.encryption_key_id().to_vec(),
                        cd.cipher.kdf_id().to_vec(),
                    )
                })
                .collect();
            let wrap_id = self.populate_inner(&inner, depth + 1)?;
            let cd = record
                .get(&wrap_id)
                .ok_or_else(|| EncryptionError::KeyUnavailable(hex::encode(id)))?;
            let wrap_derived = self.derived_key_for(&wrap_id, cd.cipher.kdf_id())?;
            let raw = cd.cipher.decrypt(wrap_derived.as_slice(), &cd.ciphertext)?;
            self.cache
                .lock()
                .expect("cache poisoned")
                .encryption_keys
                .insert(
                    id.clone(),
                    DecryptedEncryptionKey::new(SecretBytes::new(raw)),
                );
            return Ok(id.clone());
        }

        // The default key satisfies candidates created without a user
        // passphrase.
        for (id, kdf_id) in candidates {
            let Some(kdf) = self.get_kdf(kdf_id) else {
                continue;
            };
            if &self.default_key_id(&kdf) == id {
                self.cache
                    .lock()
                    .expect("cache poisoned")
                    .encryption_keys
                    .insert(
                        id.clone(),
                        DecryptedEncryptionKey::new(self.default_key.clone()),
                    );
                return Ok(id.clone());
            }
        }

        // Last resort: ask the user. A wrong passphrase re-prompts until
        // the callback returns empty (cancellation).
        let prompt = self.top_prompt().ok_or_else(|| {
            EncryptionError::KeyUnavailable("no passphrase prompt installed".to_string())
        })?;
        let id_set: BTreeSet<Vec<u8>> = candidates.keys().cloned().collect();
        loop {
            let passphrase = (prompt.as_ref())(&id_set);
            if passphrase.is_empty() {
                return Err(EncryptionError::PassphraseCancelled);
            }
            let mut key = DecryptedEncryptionKey::new(passphrase);
            for (id, kdf_id) in candidates {
                let Some(kdf) = self.get_kdf(kdf_id) else {
                    continue;
                };
                if &key.key_id(&kdf) == id {
                    self.cache
                        .lock()
                        .expect("cache poisoned")
                        .encryption_keys
                        .insert(id.clone(), key);
                    return Ok(id.clone());
                }
            }
        }
    }

    /// Derived form of a cached encryption key under the given KDF.
    fn derived_key_for(
        &self,
        key_id: &[u8],
        kdf_id: &[u8],
    ) -> Result<SecretBytes, EncryptionError> {
        let kdf = self
            .get_kdf(kdf_id)
            .ok_or_else(|| EncryptionError::KeyUnavailable(hex::encode(kdf_id)))?;
        let mut cache = self.cache.lock().expect("cache poisoned");
        let key = cache
            .encryption_keys
            .get_mut(key_id)
            .ok_or_else(|| EncryptionError::KeyUnavailable(hex::encode(key_id)))?;
        Ok(key.derive(&kdf))
    }

    /// Plaintext of an asset's private key. Requires an unlock scope; the
    /// result is cached for the remainder of the scope.
    pub fn get_decrypted_private_key(
        &self,
        _scope: &ContainerLock<'_>,
        key: &EncryptedPrivateKey,
    ) -> Result<SecretBytes, EncryptionError> {
        if let Some(cached) = self
            .cache
            .lock()
            .expect("cache poisoned")
            .private_keys
            .get(&key.id)
        {
            return Ok(cached.clone());
        }

        let plaintext = match &key.data {
            KeyData::Clear { key } => key.clone(),
            KeyData::Encrypted { data } => {
                let mut candidates = BTreeMap::new();
                candidates.insert(
                    data.cipher.encryption_key_id().to_vec(),
                    data.cipher.kdf_id().to_vec(),
                );
                self.populate_encryption_key(&candidates)?;
                let derived = self
                    .derived_key_for(data.cipher.encryption_key_id(), data.cipher.kdf_id())?;
                SecretBytes::new(data.cipher.decrypt(derived.as_slice(), &data.ciphertext)?)
            }
        };

        self.cache
            .lock()
            .expect("cache poisoned")
            .private_keys
            .insert(key.id.clone(), plaintext.clone());
        Ok(plaintext)
    }

    /// Decrypt an arbitrary ciphertext (e.g. the wallet seed) without
    /// caching the plaintext.
    pub fn decrypt_cipher_data(
        &self,
        _scope: &ContainerLock<'_>,
        data: &CipherData,
    ) -> Result<SecretBytes, EncryptionError> {
        let mut candidates = BTreeMap::new();
        candidates.insert(
            data.cipher.encryption_key_id().to_vec(),
            data.cipher.kdf_id().to_vec(),
        );
        self.populate_encryption_key(&candidates)?;
        let derived = self.derived_key_for(data.cipher.encryption_key_id(), data.cipher.kdf_id())?;
        Ok(SecretBytes::new(
            data.cipher.decrypt(derived.as_slice(), &data.ciphertext)?,
        ))
    }

    /// Encrypt plaintext under the cipher's encryption key, resolving the
    /// key first. IV rotation is the caller's job (`for_new_plaintext`).
    pub fn encrypt_data(
        &self,
        _scope: &ContainerLock<'_>,
        cipher: &Cipher,
        plaintext: &[u8],
    ) -> WalletResult<Vec<u8>> {
        let mut candidates = BTreeMap::new();
        candidates.insert(
            cipher.encryption_key_id().to_vec(),
            cipher.kdf_id().to_vec(),
        );
        self.populate_encryption_key(&candidates)?;
        let derived = self.derived_key_for(cipher.encryption_key_id(), cipher.kdf_id())?;
        Ok(cipher.encrypt(derived.as_slice(), plaintext)?)
    }

    /// Install the wallet's master encryption key: random material,
    /// wrapped under the user passphrase (or the default key when none is
    /// given). Returns `(master_key_id, wrapping_key_id)`. The master key
    /// stays decrypted in the cache so creation can proceed; the caller's
    /// unlock scope bounds that window.
    pub fn setup_master_key(
        &self,
        _scope: &ContainerLock<'_>,
        kdf: &KdfRomix,
        passphrase: Option<&SecretBytes>,
    ) -> WalletResult<(Vec<u8>, Vec<u8>)> {
        let wrap_raw = passphrase.cloned().unwrap_or_else(|| self.default_key.clone());
        let mut wrap = DecryptedEncryptionKey::new(wrap_raw);
        let wrap_id = wrap.key_id(kdf);
        let wrap_derived = wrap.derive(kdf);

        let master_raw = SecretBytes::random(32)?;
        let mut master = DecryptedEncryptionKey::new(master_raw.clone());
        let master_id = master.key_id(kdf);

        let cipher = Cipher::new(kdf.id(), wrap_id.clone())?;
        let ciphertext = cipher.encrypt(wrap_derived.as_slice(), master_raw.as_slice())?;
        let record = EncryptedKey::new(master_id.clone(), CipherData::new(ciphertext, cipher));

        self.add_kdf(kdf)?;
        self.add_encrypted_key(record)?;

        let mut cache = self.cache.lock().expect("cache poisoned");
        cache.encryption_keys.insert(master_id.clone(), master);
        cache.encryption_keys.insert(wrap_id.clone(), wrap);
        Ok((master_id, wrap_id))
    }

    /// Re-wrap the master key under a new passphrase. `replace` drops all
    /// previous wrappings; otherwise the new one is appended
    /// (multi-passphrase support). Runs under the exclusive lock and
    /// commits through a temporary disk slot so a crash at any step leaves
    /// a recoverable state.
    pub fn change_master_passphrase(
        &self,
        master_key_id: &[u8],
        kdf_id: &[u8],
        new_passphrase: Option<&SecretBytes>,
        replace: bool,
    ) -> WalletResult<Vec<u8>> {
        let _exclusive = self.lock.acquire_exclusive()?;

        let kdf = self
            .get_kdf(kdf_id)
            .ok_or_else(|| EncryptionError::KeyUnavailable(hex::encode(kdf_id)))?;

        let result = (|| -> WalletResult<Vec<u8>> {
            let mut candidates = BTreeMap::new();
            candidates.insert(master_key_id.to_vec(), kdf_id.to_vec());
            self.populate_encryption_key(&candidates)?;
            let master_raw = {
                let cache = self.cache.lock().expect("cache poisoned");
                cache
                    .encryption_keys
                    .get(master_key_id)
                    .ok_or_else(|| EncryptionError::KeyUnavailable(hex::encode(master_key_id)))?
                    .raw()
                    .clone()
            };

            let wrap_raw = new_passphrase
                .cloned()
                .unwrap_or_else(|| self.default_key.clone());
            let mut wrap = DecryptedEncryptionKey::new(wrap_raw);
            let new_wrap_id = wrap.key_id(&kdf);
            let wrap_derived = wrap.derive(&kdf);

            let cipher = Cipher::new(kdf.id(), new_wrap_id.clone())?;
            let ciphertext = cipher.encrypt(wrap_derived.as_slice(), master_raw.as_slice())?;

            let mut record = self
                .get_encrypted_key(master_key_id)
                .ok_or_else(|| EncryptionError::KeyUnavailable(hex::encode(master_key_id)))?;
            if replace {
                record.clear_cipher_data();
            }
            record.add_cipher_data(CipherData::new(ciphertext, cipher));
            let serialized = record.serialize();

            let mut temp_key = vec![ENCRYPTIONKEY_PREFIX_TEMP];
            temp_key.extend_from_slice(master_key_id);
            let mut primary_key = vec![ENCRYPTIONKEY_PREFIX];
            primary_key.extend_from_slice(master_key_id);

            // Step A: stage the new record in the temp slot.
            self.tree.put(&temp_key, &serialized)?;
            self.tree.flush()?;
            // Step B: wipe the old primary and write the new one.
            self.tree.wipe(&primary_key)?;
            self.tree.put(&primary_key, &serialized)?;
            self.tree.flush()?;
            // Step C: drop the temp slot.
            self.tree.delete(&temp_key)?;
            self.tree.flush()?;

            self.encrypted_keys
                .lock()
                .expect("key table poisoned")
                .insert(master_key_id.to_vec(), record);
            Ok(new_wrap_id)
        })();

        // The exclusive frame has no scoped cache cleanup; wipe by hand on
        // every exit path.
        self.cache.lock().expect("cache poisoned").clear();
        result
    }
}

impl std::fmt::Debug for DecryptedDataContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptedDataContainer")
            .field("kdf_count", &self.kdfs.lock().expect("kdf table poisoned").len())
            .field(
                "encrypted_key_count",
                &self.encrypted_keys.lock().expect("key table poisoned").len(),
            )
            .finish()
    }
}
