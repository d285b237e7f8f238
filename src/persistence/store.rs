//! Content-addressed key/value stores.
//!
//! A key is the base64url encoding of a content hash; the file backend
//! stores each value as `<key>.json` in its directory.

use super::disk::DiskSpace;
use super::StorageError;
use crate::blockchain::WalletList;
use crate::cache::WalletListCache;
use crate::encoding::BlockHash;
use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

pub trait ContentStore: Send + Sync {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// `None` when the key is absent.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    fn contains(&self, key: &str) -> bool;

    /// Remove `key`, returning the size of the removed value.
    fn remove(&self, key: &str) -> Result<Option<u64>, StorageError>;
}

/// One directory of JSON files, written through a temporary sibling and a
/// rename so a partial write never shows up under the real name.
pub struct FileStore {
    dir: PathBuf,
    disk: Option<Arc<DiskSpace>>,
}

impl FileStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(FileStore { dir, disk: None })
    }

    /// Count writes against `disk` and refuse those over budget.
    pub fn with_admission(mut self, disk: Arc<DiskSpace>) -> Self {
        self.disk = Some(disk);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl ContentStore for FileStore {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let size = value.len() as u64;
        if let Some(disk) = &self.disk {
            disk.admit(size)?;
        }
        let mut temp = tempfile::NamedTempFile::new_in(&self.dir)?;
        temp.write_all(value)?;
        temp.as_file().sync_all()?;
        temp.persist(self.path(key)).map_err(|e| StorageError::Io(e.error))?;
        if let Some(disk) = &self.disk {
            disk.record_write(size);
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match fs::read(self.path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn contains(&self, key: &str) -> bool {
        self.path(key).is_file()
    }

    fn remove(&self, key: &str) -> Result<Option<u64>, StorageError> {
        let path = self.path(key);
        let size = match fs::metadata(&path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        fs::remove_file(&path)?;
        Ok(Some(size))
    }
}

/// Map-backed store for tests and ephemeral runs.
#[derive(Default)]
pub struct InMemoryStore {
    entries: parking_lot::RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl ContentStore for InMemoryStore {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.entries.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    fn remove(&self, key: &str) -> Result<Option<u64>, StorageError> {
        Ok(self
            .entries
            .write()
            .remove(key)
            .map(|value| value.len() as u64))
    }
}

/// Wallet lists keyed by their content hash, so blocks sharing a ledger
/// snapshot share one file.
pub struct WalletListStore {
    store: Arc<dyn ContentStore>,
    cache: WalletListCache,
}

impl WalletListStore {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        WalletListStore {
            store,
            cache: WalletListCache::new_lru(WalletListCache::DEFAULT_CAPACITY),
        }
    }

    pub fn write(&self, list: &WalletList) -> Result<BlockHash, StorageError> {
        let hash = list.hash();
        let key = hash.to_b64();
        if !self.store.contains(&key) {
            let bytes = serde_json::to_vec(list)?;
            self.store.put(&key, &bytes)?;
        }
        self.cache.put(hash, Arc::new(list.clone()));
        Ok(hash)
    }

    /// `None` when the list is missing, unreadable or does not hash to `hash`.
    pub fn read(&self, hash: &BlockHash) -> Option<Arc<WalletList>> {
        if let Some(list) = self.cache.get(hash) {
            return Some(list);
        }
        let bytes = match self.store.get(&hash.to_b64()) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(wallet_list = %hash, error = %e, "Failed to read wallet list");
                return None;
            }
        };
        let list: WalletList = match serde_json::from_slice(&bytes) {
            Ok(list) => list,
            Err(e) => {
                warn!(wallet_list = %hash, error = %e, "Malformed wallet list");
                return None;
            }
        };
        if list.hash() != *hash {
            warn!(wallet_list = %hash, "Wallet list does not match its hash");
            return None;
        }
        let list = Arc::new(list);
        self.cache.put(*hash, Arc::clone(&list));
        Some(list)
    }

    pub fn forget_cached(&self, hash: &BlockHash) {
        self.cache.remove(hash);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::WalletEntry;
    use crate::encoding::Address;
    use tempfile::TempDir;

    #[test]
    fn test_file_store_put_get_remove() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path().join("txs")).unwrap();

        assert_eq!(store.get("abc").unwrap(), None);
        store.put("abc", b"{\"x\":1}").unwrap();
        assert!(store.contains("abc"));
        assert_eq!(store.get("abc").unwrap(), Some(b"{\"x\":1}".to_vec()));

        // Only the final file remains, no temporaries
        let names: Vec<_> = fs::read_dir(store.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["abc.json".to_string()]);

        assert_eq!(store.remove("abc").unwrap(), Some(7));
        assert_eq!(store.remove("abc").unwrap(), None);
    }

    #[test]
    fn test_refused_write_leaves_nothing_behind() {
        let dir = TempDir::new().unwrap();
        let disk = Arc::new(DiskSpace::new(10, 0));
        let store = FileStore::open(dir.path()).unwrap().with_admission(Arc::clone(&disk));

        store.put("small", b"12345").unwrap();
        assert_eq!(disk.used(), 5);
        assert!(matches!(
            store.put("large", b"123456"),
            Err(StorageError::NotEnoughSpace { needed: 6, available: 5 })
        ));
        assert!(!store.contains("large"));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_wallet_lists_deduplicate() {
        let backing = Arc::new(InMemoryStore::new());
        let store = WalletListStore::new(backing.clone());
        let list = WalletList::from_entries([WalletEntry::new(Address([1; 32]), 77)]);

        let first = store.write(&list).unwrap();
        let second = store.write(&list).unwrap();
        assert_eq!(first, second);
        assert_eq!(backing.len(), 1);
        assert_eq!(store.read(&first).as_deref(), Some(&list));
    }

    #[test]
    fn test_wallet_list_integrity_checked() {
        let backing = Arc::new(InMemoryStore::new());
        let store = WalletListStore::new(backing.clone());
        let list = WalletList::from_entries([WalletEntry::new(Address([1; 32]), 77)]);
        let hash = store.write(&list).unwrap();
        store.forget_cached(&hash);

        backing.put(&hash.to_b64(), b"not json").unwrap();
        assert!(store.read(&hash).is_none());

        let other = WalletList::from_entries([WalletEntry::new(Address([2; 32]), 1)]);
        backing.put(&hash.to_b64(), &serde_json::to_vec(&other).unwrap()).unwrap();
        assert!(store.read(&hash).is_none());
    }
}
