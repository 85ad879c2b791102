//! Key-value storage backings for persisted session state.
//!
//! This module provides:
//! - `KeyValueStore`: the small interface the token store is written against
//! - `MemoryStore`: process-local map, used in tests and as a fallback
//! - `FileStore`: JSON file in the cache directory (default)
//! - `KeyringStore`: one OS keychain entry per key
//!
//! Backings report failures as `StorageError`; deciding whether a failure
//! matters is left to the caller.

pub mod file;
pub mod keychain;
pub mod memory;

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::config::StorageBackend;

pub use self::file::FileStore;
pub use self::keychain::KeyringStore;
pub use self::memory::MemoryStore;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage is unavailable")]
    Unavailable,

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Storage lock poisoned")]
    Poisoned,
}

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove a key. Removing a key that is not present is not an error.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Open the backing selected in the configuration.
pub fn open(backend: StorageBackend, cache_dir: &Path) -> Arc<dyn KeyValueStore> {
    match backend {
        StorageBackend::File => Arc::new(FileStore::new(cache_dir)),
        StorageBackend::Keyring => Arc::new(KeyringStore::new()),
        StorageBackend::Memory => Arc::new(MemoryStore::new()),
    }
}
