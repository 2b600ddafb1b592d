//! Op output cache.
//!
//! At most one materialization is stored per fingerprint; expired entries are
//! treated as absent; writes overwrite. [`CacheLocks`] serializes concurrent
//! builds of the same fingerprint within the process so an op's execute body
//! runs exactly once for duplicate invocations (pending lookups wait on the
//! first build and then hit the stored entry).

mod file;
mod fingerprint;
mod in_memory;

pub use file::FileCache;
pub use fingerprint::{canonicalize, fingerprint};
pub use in_memory::InMemoryCache;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache io: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Key-value store for op outputs with optional expiry.
#[async_trait]
pub trait OpCache: Send + Sync {
    /// Returns the live value for `key`, or `None` when absent or expired.
    async fn get(&self, key: &str) -> Option<Value>;

    /// Stores `value` under `key`, overwriting any previous entry.
    /// `ttl = None` never expires.
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    async fn clear(&self) -> Result<(), CacheError>;
}

/// Per-fingerprint build locks.
///
/// The op runtime holds the lock for a fingerprint across probe, execute and
/// store, so concurrent duplicate invocations serialize and the later ones
/// observe the first build's entry.
pub struct CacheLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl CacheLocks {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Acquires the build lock for `key`, waiting on any in-flight build.
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }
}

impl Default for CacheLocks {
    fn default() -> Self {
        Self::new()
    }
}
