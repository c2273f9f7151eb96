//! On-disk cache store: maps a resource id to `cache/<resource>` and
//! publishes completed downloads atomically via temp-file-then-rename.
//!
//! Temp files and cache files are required to share a filesystem so the
//! rename in [`CacheStore::publish`] is atomic; both roots are taken from
//! configuration rather than hardcoded so an operator can point them at the
//! same mount.

use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

#[derive(Debug)]
pub struct CacheStore {
    cache_dir: PathBuf,
    temp_dir: PathBuf,
    temp_seq: AtomicU64,
}

impl CacheStore {
    pub fn new(cache_dir: impl Into<PathBuf>, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            temp_dir: temp_dir.into(),
            temp_seq: AtomicU64::new(0),
        }
    }

    /// Creates `cache/` and `temp/` up front so the first request doesn't
    /// race a concurrent fetch for directory creation.
    pub async fn prepare_directories(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.cache_dir).await?;
        tokio::fs::create_dir_all(&self.temp_dir).await
    }

    /// The final, published path for a resource id (no leading slash).
    pub fn resource_path(&self, resource: &str) -> PathBuf {
        self.cache_dir.join(resource)
    }

    /// A filesystem stat, per §4.B.
    pub fn exists(&self, resource: &str) -> bool {
        self.resource_path(resource).is_file()
    }

    /// A fresh scratch path under `temp/`, unique per call for the lifetime
    /// of the process.
    pub fn new_temp_path(&self) -> PathBuf {
        let seq = self.temp_seq.fetch_add(1, Ordering::Relaxed);
        self.temp_dir.join(format!("{}-{seq:x}", std::process::id()))
    }

    /// Moves a completed temp file into place, creating parent directories
    /// as needed and replacing any existing file. Must be atomic: the file
    /// at `resource_path` is never observed half-written.
    pub async fn publish(&self, temp_path: &Path, resource: &str) -> std::io::Result<PathBuf> {
        let dest = self.resource_path(resource);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(temp_path, &dest).await?;
        Ok(dest)
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_is_visible_only_after_rename() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path().join("cache"), dir.path().join("temp"));
        store.prepare_directories().await.unwrap();

        assert!(!store.exists("artifact/abc"));

        let temp = store.new_temp_path();
        tokio::fs::write(&temp, b"payload").await.unwrap();
        assert!(!store.exists("artifact/abc"));

        let published = store.publish(&temp, "artifact/abc").await.unwrap();
        assert!(store.exists("artifact/abc"));
        assert_eq!(tokio::fs::read(&published).await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn publish_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path().join("cache"), dir.path().join("temp"));
        store.prepare_directories().await.unwrap();

        let temp = store.new_temp_path();
        tokio::fs::write(&temp, b"x").await.unwrap();
        store.publish(&temp, "registry/u/h").await.unwrap();
        assert!(store.exists("registry/u/h"));
    }

    #[tokio::test]
    async fn publish_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path().join("cache"), dir.path().join("temp"));
        store.prepare_directories().await.unwrap();

        let t1 = store.new_temp_path();
        tokio::fs::write(&t1, b"first").await.unwrap();
        store.publish(&t1, "artifact/x").await.unwrap();

        let t2 = store.new_temp_path();
        tokio::fs::write(&t2, b"second").await.unwrap();
        let dest = store.publish(&t2, "artifact/x").await.unwrap();
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"second");
    }
}
