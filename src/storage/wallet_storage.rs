/// Wallet file storage over sled
///
/// A wallet file is a sled database directory. Named trees play the role
/// of sub-databases: `headers` carries store-wide records (master id, main
/// wallet pointer, wallet metas, encryption material), and each wallet id
/// names the tree holding that wallet's account and asset records.
use std::path::{Path, PathBuf};

use sled::Db;

use crate::error::{StorageError, StorageResult};

/// Sub-database holding store-wide header records.
pub const HEADERS_TREE: &str = "headers";

pub struct WalletStorage {
    db: Db,
    path: PathBuf,
}

impl WalletStorage {
    /// Create a fresh wallet file. Fails if something already lives at the
    /// path.
    pub fn create(path: &Path) -> StorageResult<Self> {
        if path.exists() {
            return Err(StorageError::InvalidPath(format!(
                "{} already exists",
                path.display()
            )));
        }
        Self::open_impl(path)
    }

    /// Open an existing wallet file.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if !path.exists() {
            return Err(StorageError::FileMissing(path.display().to_string()));
        }
        Self::open_impl(path)
    }

    fn open_impl(path: &Path) -> StorageResult<Self> {
        let db = sled::open(path)?;
        Ok(Self {
            db,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The store-wide headers sub-database.
    pub fn headers(&self) -> StorageResult<DbTree> {
        self.open_tree(HEADERS_TREE)
    }

    /// Open or create a named sub-database.
    pub fn open_tree(&self, name: &str) -> StorageResult<DbTree> {
        let tree = self.db.open_tree(name.as_bytes())?;
        Ok(DbTree { tree })
    }

    pub fn flush(&self) -> StorageResult<()> {
        self.db.flush()?;
        Ok(())
    }

    /// Delete the wallet file and its lock sidecar from disk.
    pub fn erase(self) -> StorageResult<()> {
        let path = self.path.clone();
        drop(self.db);
        std::fs::remove_dir_all(&path)?;
        Ok(())
    }

    /// Scan every value in every tree for a byte sequence. Test support
    /// for the "no cleartext key on disk" check, and cheap enough to keep
    /// out of cfg(test).
    pub fn contains_bytes(&self, needle: &[u8]) -> StorageResult<bool> {
        for name in self.db.tree_names() {
            let tree = self.db.open_tree(&name)?;
            for entry in tree.iter() {
                let (key, value) = entry?;
                if contains_subslice(&key, needle) || contains_subslice(&value, needle) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

/// Handle to one sub-database. Cheap to clone; clones share the tree.
#[derive(Clone)]
pub struct DbTree {
    tree: sled::Tree,
}

impl DbTree {
    pub fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.tree.get(key)?.map(|v| v.to_vec()))
    }

    pub fn get_existing(&self, key: &[u8]) -> StorageResult<Vec<u8>> {
        self.get(key)?.ok_or(StorageError::MissingEntry)
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> StorageResult<()> {
        self.tree.insert(key, value)?;
        Ok(())
    }

    pub fn delete(&self, key: &[u8]) -> StorageResult<()> {
        self.tree.remove(key)?;
        Ok(())
    }

    /// Destructive delete: overwrite the value bytes before removing the
    /// entry, so sensitive material does not linger in the log.
    pub fn wipe(&self, key: &[u8]) -> StorageResult<()> {
        if let Some(value) = self.tree.get(key)? {
            let zeros = vec![0u8; value.len()];
            self.tree.insert(key, zeros)?;
        }
        self.tree.remove(key)?;
        Ok(())
    }

    /// All entries whose key starts with `prefix`, in key order.
    pub fn scan_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut out = Vec::new();
        for entry in self.tree.scan_prefix(prefix) {
            let (key, value) = entry?;
            out.push((key.to_vec(), value.to_vec()));
        }
        Ok(out)
    }

    /// First entry at or after `key`, cursor-style.
    pub fn seek_ge(&self, key: &[u8]) -> StorageResult<Option<(Vec<u8>, Vec<u8>)>> {
        for entry in self.tree.range(key.to_vec()..) {
            let (k, v) = entry?;
            return Ok(Some((k.to_vec(), v.to_vec())));
        }
        Ok(None)
    }

    /// Apply a batch of writes atomically.
    pub fn apply_batch(&self, batch: WriteBatch) -> StorageResult<()> {
        self.tree.apply_batch(batch.inner)?;
        Ok(())
    }

    pub fn flush(&self) -> StorageResult<()> {
        self.tree.flush()?;
        Ok(())
    }
}

/// Accumulates writes for a single atomic commit.
#[derive(Default)]
pub struct WriteBatch {
    inner: sled::Batch,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.inner.insert(key, value);
    }

    pub fn delete(&mut self, key: &[u8]) {
        self.inner.remove(key);
    }
}
