use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use super::{KeyValueStore, StorageError};

/// In-memory store.
///
/// Can be switched into a disabled mode where every call fails, which is how
/// tests exercise quota-exceeded or storage-turned-off conditions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
    disabled: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store on which every operation fails with `StorageError::Unavailable`.
    pub fn disabled() -> Self {
        let store = Self::default();
        store.set_disabled(true);
        store
    }

    pub fn set_disabled(&self, disabled: bool) {
        self.disabled.store(disabled, Ordering::SeqCst);
    }

    /// Sorted copy of the current contents.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.entries
            .read()
            .map(|entries| entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    fn check_enabled(&self) -> Result<(), StorageError> {
        if self.disabled.load(Ordering::SeqCst) {
            Err(StorageError::Unavailable)
        } else {
            Ok(())
        }
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.check_enabled()?;
        let entries = self.entries.read().map_err(|_| StorageError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.check_enabled()?;
        let mut entries = self.entries.write().map_err(|_| StorageError::Poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.check_enabled()?;
        let mut entries = self.entries.write().map_err(|_| StorageError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_set_get_remove() {
        let store = MemoryStore::new();
        assert_eq!(store.get("a").unwrap(), None);

        store.set("a", "1").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));

        store.remove("a").unwrap();
        store.remove("a").unwrap(); // absent key is fine
        assert_eq!(store.get("a").unwrap(), None);
    }

    #[test]
    fn test_disabled_store_fails_every_call() {
        let store = MemoryStore::disabled();
        assert!(matches!(store.get("a"), Err(StorageError::Unavailable)));
        assert!(matches!(store.set("a", "1"), Err(StorageError::Unavailable)));
        assert!(matches!(store.remove("a"), Err(StorageError::Unavailable)));

        store.set_disabled(false);
        store.set("a", "1").unwrap();
        assert_eq!(store.snapshot().len(), 1);
    }
}
