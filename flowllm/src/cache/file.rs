//! File-backed op cache: one JSON file per fingerprint with embedded expiry.
//!
//! Entries live under a directory as `<hex fingerprint>.json`. Expiry is a
//! wall-clock timestamp so entries survive process restarts.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{CacheError, OpCache};

#[derive(Serialize, Deserialize)]
struct FileEntry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

impl FileEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Utc::now() >= at)
    }
}

/// Persistent cache keyed by hex fingerprint.
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    /// Opens (and creates) the cache directory.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Fingerprints are hex, but guard against path characters anyway.
        let safe: String = key
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        self.dir.join(format!("{safe}.json"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl OpCache for FileCache {
    async fn get(&self, key: &str) -> Option<Value> {
        let path = self.path_for(key);
        let bytes = tokio::fs::read(&path).await.ok()?;
        let entry: FileEntry = serde_json::from_slice(&bytes).ok()?;
        if entry.is_expired() {
            let _ = tokio::fs::remove_file(&path).await;
            return None;
        }
        Some(entry.value)
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), CacheError> {
        let entry = FileEntry {
            value,
            expires_at: ttl.and_then(|d| {
                chrono::TimeDelta::from_std(d)
                    .ok()
                    .map(|delta| Utc::now() + delta)
            }),
        };
        let bytes = serde_json::to_vec(&entry)?;
        tokio::fs::write(self.path_for(key), bytes).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.path().extension().is_some_and(|ext| ext == "json") {
                tokio::fs::remove_file(entry.path()).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = FileCache::new(dir.path()).unwrap();
            cache.set("abc123", json!({"answer": 42}), None).await.unwrap();
        }
        let reopened = FileCache::new(dir.path()).unwrap();
        assert_eq!(
            reopened.get("abc123").await,
            Some(json!({"answer": 42}))
        );
    }

    #[tokio::test]
    async fn expiry_is_wall_clock() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path()).unwrap();
        cache
            .set("k", json!("v"), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn delete_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path()).unwrap();
        cache.delete("nope").await.unwrap();
    }

    #[tokio::test]
    async fn clear_removes_entries() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path()).unwrap();
        cache.set("a", json!(1), None).await.unwrap();
        cache.set("b", json!(2), None).await.unwrap();
        cache.clear().await.unwrap();
        assert_eq!(cache.get("a").await, None);
        assert_eq!(cache.get("b").await, None);
    }
}
