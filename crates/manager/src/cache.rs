//! Domain-keyed certificate cache.
//!
//! A thin get/put/delete abstraction in front of [`Storage`] or any other
//! backend. The contract that matters: `get` returns `Ok(None)` for a miss,
//! reserving `Err` for backend failures, so the manager can tell "never
//! generated" apart from "storage is broken".

use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{CacheError, StorageError};
use crate::storage::Storage;

/// Certificate cache backend
///
/// `delete` treats an already-absent entry as success.
pub trait Cache: Send + Sync {
    /// Look up the stored bytes for a domain. `Ok(None)` is a miss.
    fn get(&self, domain: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store bytes for a domain, replacing any existing entry.
    fn put(&self, domain: &str, bytes: &[u8]) -> Result<(), CacheError>;

    /// Remove the entry for a domain; absent entries are not an error.
    fn delete(&self, domain: &str) -> Result<(), CacheError>;
}

/// Filesystem-backed cache, the default backend
///
/// Wraps [`Storage`], mapping its distinct not-found condition to a miss.
#[derive(Debug, Clone)]
pub struct DirCache {
    storage: Storage,
}

impl DirCache {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Access the underlying store
    pub fn storage(&self) -> &Storage {
        &self.storage
    }
}

impl Cache for DirCache {
    fn get(&self, domain: &str) -> Result<Option<Vec<u8>>, CacheError> {
        match self.storage.read(domain) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(StorageError::NotFound { .. }) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn put(&self, domain: &str, bytes: &[u8]) -> Result<(), CacheError> {
        self.storage.write(domain, bytes)?;
        Ok(())
    }

    fn delete(&self, domain: &str) -> Result<(), CacheError> {
        self.storage.delete(domain)?;
        Ok(())
    }
}

/// In-memory cache for tests and embedding scenarios without a filesystem
///
/// Backed by a `DashMap`; operations are infallible. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    entries: Arc<DashMap<String, Vec<u8>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Cache for MemoryCache {
    fn get(&self, domain: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.entries.get(domain).map(|entry| entry.clone()))
    }

    fn put(&self, domain: &str, bytes: &[u8]) -> Result<(), CacheError> {
        self.entries.insert(domain.to_string(), bytes.to_vec());
        Ok(())
    }

    fn delete(&self, domain: &str) -> Result<(), CacheError> {
        self.entries.remove(domain);
        Ok(())
    }
}
