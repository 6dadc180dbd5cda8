//! On-disk store of warmed base images.
//!
//! Each image is stored as an OCI image layout under `cache_dir/<key>/`,
//! where the key is the SHA-256 of the normalized reference. Metadata sits
//! alongside as `<key>.meta.json`. New content is fetched into a staging
//! directory and renamed into place, and the metadata file is written last,
//! so an entry is only visible once it is complete.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use strata_core::error::{Result, StrataError};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::oci::reference::ImageReference;

/// Directory under the cache root holding in-progress fetches.
pub(crate) const STAGING_DIR: &str = ".staging";

const META_SUFFIX: &str = ".meta.json";

/// A cached image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarmEntry {
    /// Fully qualified image reference
    pub reference: String,
    /// OCI layout directory holding the image
    pub path: PathBuf,
    /// When the image was fetched
    pub fetched_at: DateTime<Utc>,
}

impl WarmEntry {
    /// Whether the entry is younger than `ttl`. A zero TTL is never fresh.
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.is_fresh_at(ttl, Utc::now())
    }

    fn is_fresh_at(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        // A timestamp in the future counts as just fetched
        let age = (now - self.fetched_at).to_std().unwrap_or(Duration::ZERO);
        age < ttl
    }
}

/// Store of warmed images keyed by normalized reference.
pub struct ImageCache {
    cache_dir: PathBuf,
    /// One async lock per cache key, serializing fetches of the same image
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ImageCache {
    /// Open (creating if needed) the cache rooted at `cache_dir`.
    pub fn new(cache_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(cache_dir)
            .map_err(|e| StrataError::io_at("creating cache directory", cache_dir, e))?;
        Ok(Self {
            cache_dir: cache_dir.to_path_buf(),
            locks: DashMap::new(),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Directory an image with this reference is stored in.
    pub fn entry_dir(&self, reference: &ImageReference) -> PathBuf {
        self.cache_dir.join(reference.cache_key())
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.cache_dir.join(format!("{}{}", key, META_SUFFIX))
    }

    /// Take the lock for `reference`'s key. Holders of different keys never
    /// wait on each other.
    pub async fn lock(&self, reference: &ImageReference) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(reference.cache_key())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// The complete entry for `reference`, if there is one.
    ///
    /// An entry with unreadable metadata is reported as absent so the next
    /// fetch replaces it.
    pub fn lookup(&self, reference: &ImageReference) -> Result<Option<WarmEntry>> {
        let key = reference.cache_key();
        let meta_path = self.meta_path(&key);
        let entry_dir = self.cache_dir.join(&key);

        if !meta_path.is_file() || !entry_dir.is_dir() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&meta_path)
            .map_err(|e| StrataError::io_at("reading", &meta_path, e))?;
        match serde_json::from_str::<WarmEntry>(&content) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                tracing::warn!(
                    reference = %reference,
                    path = %meta_path.display(),
                    error = %e,
                    "Ignoring corrupt cache metadata"
                );
                Ok(None)
            }
        }
    }

    /// Create an empty staging directory to fetch `reference` into.
    pub fn staging_dir(&self, reference: &ImageReference) -> Result<PathBuf> {
        let dir = self
            .cache_dir
            .join(STAGING_DIR)
            .join(format!("{}-{}", reference.cache_key(), uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).map_err(|e| StrataError::io_at("creating", &dir, e))?;
        Ok(dir)
    }

    /// Remove a staging directory after a failed fetch.
    pub fn discard(&self, staging: &Path) {
        if let Err(e) = std::fs::remove_dir_all(staging) {
            tracing::warn!(
                path = %staging.display(),
                error = %e,
                "Failed to remove staging directory"
            );
        }
    }

    /// Move a fully fetched staging directory into place as the entry for
    /// `reference`, replacing any previous entry.
    ///
    /// Callers must hold the key's lock.
    pub fn commit(&self, reference: &ImageReference, staging: &Path) -> Result<WarmEntry> {
        let key = reference.cache_key();
        let entry_dir = self.cache_dir.join(&key);
        let meta_path = self.meta_path(&key);

        // Hide the old entry before touching its content
        remove_if_exists(&meta_path)?;
        if entry_dir.exists() {
            std::fs::remove_dir_all(&entry_dir)
                .map_err(|e| StrataError::io_at("removing", &entry_dir, e))?;
        }
        std::fs::rename(staging, &entry_dir).map_err(|e| {
            StrataError::io(
                format!(
                    "moving {} to {}",
                    staging.display(),
                    entry_dir.display()
                ),
                e,
            )
        })?;

        let entry = WarmEntry {
            reference: reference.full_reference(),
            path: entry_dir,
            fetched_at: Utc::now(),
        };
        let tmp_meta = meta_path.with_extension("json.tmp");
        std::fs::write(&tmp_meta, serde_json::to_string_pretty(&entry)?)
            .map_err(|e| StrataError::io_at("writing", &tmp_meta, e))?;
        std::fs::rename(&tmp_meta, &meta_path)
            .map_err(|e| StrataError::io_at("renaming", &tmp_meta, e))?;

        tracing::debug!(
            reference = %entry.reference,
            path = %entry.path.display(),
            "Stored image in cache"
        );
        Ok(entry)
    }

    /// All complete entries, sorted by reference.
    pub fn list(&self) -> Result<Vec<WarmEntry>> {
        let read_dir = std::fs::read_dir(&self.cache_dir)
            .map_err(|e| StrataError::io_at("reading", &self.cache_dir, e))?;

        let mut entries = Vec::new();
        for dir_entry in read_dir {
            let path = dir_entry
                .map_err(|e| StrataError::io_at("reading", &self.cache_dir, e))?
                .path();
            let is_meta = path
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.ends_with(META_SUFFIX));
            if !is_meta {
                continue;
            }

            let Ok(content) = std::fs::read_to_string(&path) else {
                continue;
            };
            if let Ok(entry) = serde_json::from_str::<WarmEntry>(&content) {
                if entry.path.is_dir() {
                    entries.push(entry);
                }
            }
        }

        entries.sort_by(|a, b| a.reference.cmp(&b.reference));
        Ok(entries)
    }

    /// Remove the entry for `reference`. Returns whether one existed.
    pub fn invalidate(&self, reference: &ImageReference) -> Result<bool> {
        let key = reference.cache_key();
        let meta_path = self.meta_path(&key);
        let entry_dir = self.cache_dir.join(&key);

        let existed = meta_path.exists() || entry_dir.exists();
        remove_if_exists(&meta_path)?;
        if entry_dir.exists() {
            std::fs::remove_dir_all(&entry_dir)
                .map_err(|e| StrataError::io_at("removing", &entry_dir, e))?;
        }

        if existed {
            tracing::debug!(reference = %reference, "Invalidated cached image");
        }
        Ok(existed)
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StrataError::io_at("removing", path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn reference(s: &str) -> ImageReference {
        ImageReference::parse(s).unwrap()
    }

    fn store(cache: &ImageCache, r: &ImageReference, marker: &str) -> WarmEntry {
        let staging = cache.staging_dir(r).unwrap();
        fs::write(staging.join("index.json"), marker).unwrap();
        cache.commit(r, &staging).unwrap()
    }

    #[test]
    fn test_new_creates_directory() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("a/b/cache");
        let cache = ImageCache::new(&dir).unwrap();
        assert!(dir.is_dir());
        assert_eq!(cache.cache_dir(), dir);
    }

    #[test]
    fn test_lookup_miss() {
        let tmp = TempDir::new().unwrap();
        let cache = ImageCache::new(tmp.path()).unwrap();
        assert!(cache.lookup(&reference("alpine")).unwrap().is_none());
    }

    #[test]
    fn test_commit_then_lookup() {
        let tmp = TempDir::new().unwrap();
        let cache = ImageCache::new(tmp.path()).unwrap();
        let r = reference("alpine:3.19");

        let stored = store(&cache, &r, "v1");
        assert_eq!(stored.reference, "docker.io/library/alpine:3.19");
        assert_eq!(stored.path, cache.entry_dir(&r));
        assert_eq!(
            fs::read_to_string(stored.path.join("index.json")).unwrap(),
            "v1"
        );

        // Any spelling of the same image finds the entry
        let found = cache
            .lookup(&reference("docker.io/library/alpine:3.19"))
            .unwrap()
            .unwrap();
        assert_eq!(found, stored);
    }

    #[test]
    fn test_commit_replaces_previous_entry() {
        let tmp = TempDir::new().unwrap();
        let cache = ImageCache::new(tmp.path()).unwrap();
        let r = reference("alpine");

        let first = store(&cache, &r, "v1");
        fs::write(first.path.join("stale-blob"), "x").unwrap();
        let second = store(&cache, &r, "v2");

        assert_eq!(first.path, second.path);
        assert!(second.fetched_at >= first.fetched_at);
        assert!(!second.path.join("stale-blob").exists());
        assert_eq!(
            fs::read_to_string(second.path.join("index.json")).unwrap(),
            "v2"
        );
    }

    #[test]
    fn test_staging_dirs_are_unique_and_discardable() {
        let tmp = TempDir::new().unwrap();
        let cache = ImageCache::new(tmp.path()).unwrap();
        let r = reference("alpine");

        let a = cache.staging_dir(&r).unwrap();
        let b = cache.staging_dir(&r).unwrap();
        assert_ne!(a, b);

        cache.discard(&a);
        assert!(!a.exists());
        assert!(b.is_dir());
        assert!(cache.lookup(&r).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_metadata_is_a_miss() {
        let tmp = TempDir::new().unwrap();
        let cache = ImageCache::new(tmp.path()).unwrap();
        let r = reference("alpine");
        store(&cache, &r, "v1");

        fs::write(cache.meta_path(&r.cache_key()), "{not json").unwrap();
        assert!(cache.lookup(&r).unwrap().is_none());
    }

    #[test]
    fn test_list_and_invalidate() {
        let tmp = TempDir::new().unwrap();
        let cache = ImageCache::new(tmp.path()).unwrap();
        store(&cache, &reference("nginx:1.25"), "n");
        store(&cache, &reference("alpine"), "a");
        // Half-written fetches are not listed
        cache.staging_dir(&reference("busybox")).unwrap();

        let refs: Vec<String> = cache.list().unwrap().into_iter().map(|e| e.reference).collect();
        assert_eq!(
            refs,
            vec![
                "docker.io/library/alpine:latest",
                "docker.io/library/nginx:1.25"
            ]
        );

        assert!(cache.invalidate(&reference("alpine")).unwrap());
        assert!(!cache.invalidate(&reference("alpine")).unwrap());
        assert!(cache.lookup(&reference("alpine")).unwrap().is_none());
        assert!(!cache.entry_dir(&reference("alpine")).exists());
        assert_eq!(cache.list().unwrap().len(), 1);
    }

    #[test]
    fn test_freshness() {
        let now = Utc::now();
        let entry = WarmEntry {
            reference: "docker.io/library/alpine:latest".to_string(),
            path: PathBuf::from("/cache/x"),
            fetched_at: now - chrono::Duration::hours(2),
        };

        assert!(entry.is_fresh_at(Duration::from_secs(3 * 3600), now));
        assert!(!entry.is_fresh_at(Duration::from_secs(3600), now));
        assert!(!entry.is_fresh_at(Duration::ZERO, now));

        let future = WarmEntry {
            fetched_at: now + chrono::Duration::hours(1),
            ..entry
        };
        assert!(future.is_fresh_at(Duration::from_secs(1), now));
        assert!(!future.is_fresh_at(Duration::ZERO, now));
    }

    #[tokio::test]
    async fn test_lock_is_per_key() {
        let tmp = TempDir::new().unwrap();
        let cache = ImageCache::new(tmp.path()).unwrap();

        let _alpine = cache.lock(&reference("alpine")).await;
        // A different key is not blocked
        let _nginx = cache.lock(&reference("nginx")).await;

        // The same key is
        let same = tokio::time::timeout(
            Duration::from_millis(50),
            cache.lock(&reference("docker.io/library/alpine:latest")),
        )
        .await;
        assert!(same.is_err());
    }
}
