#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Content-addressed stage cache.
//!
//! Each pipeline stage derives a [`Fingerprint`] from everything that
//! influences its result (source bytes, run parameters) and asks the
//! [`CacheStore`] for the entry under that digest. Entries are
//! `MessagePack`-encoded files named by stage and digest, so a changed
//! input naturally lands in a fresh entry and an unchanged input reuses
//! the old one.
//!
//! The cache is advisory: a corrupt or unwritable entry is logged and
//! treated as a miss, never surfaced as a pipeline failure.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};

/// Errors surfaced by explicit cache maintenance.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// I/O error while touching the cache directory.
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Entry encoding failed.
    #[error("Cache encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
}

/// Deterministic digest over everything that feeds a stage.
///
/// Parts are hashed in the order they are added, with label and value
/// delimited so that adjacent parts cannot collide by concatenation.
#[derive(Debug, Clone, Default)]
pub struct Fingerprint {
    parts: Vec<(String, String)>,
}

impl Fingerprint {
    /// Creates an empty fingerprint.
    #[must_use]
    pub const fn new() -> Self {
        Self { parts: Vec::new() }
    }

    /// Adds a literal string part.
    #[must_use]
    pub fn with_str(mut self, label: &str, value: &str) -> Self {
        self.parts.push((label.to_string(), value.to_string()));
        self
    }

    /// Adds a byte-content part. Only the digest of the bytes is kept.
    #[must_use]
    pub fn with_bytes(mut self, label: &str, bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        self.parts
            .push((label.to_string(), hex::encode(hasher.finalize())));
        self
    }

    /// Adds the content of a file as a part.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn with_file(self, label: &str, path: &Path) -> Result<Self, std::io::Error> {
        let bytes = std::fs::read(path)?;
        Ok(self.with_bytes(label, &bytes))
    }

    /// Adds a serializable parameter block as a part.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be serialized to JSON.
    pub fn with_param<T: Serialize>(
        self,
        label: &str,
        value: &T,
    ) -> Result<Self, serde_json::Error> {
        let encoded = serde_json::to_string(value)?;
        Ok(self.with_str(label, &encoded))
    }

    /// Returns the hex-encoded SHA-256 digest over all parts.
    #[must_use]
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for (label, value) in &self.parts {
            hasher.update(label.as_bytes());
            hasher.update([0u8]);
            hasher.update(value.as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }
}

/// On-disk cache of stage results.
pub struct CacheStore {
    dir: PathBuf,
    hits: u64,
    misses: u64,
}

impl CacheStore {
    /// Creates a store rooted at `dir`. The directory is created lazily
    /// on first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            hits: 0,
            misses: 0,
        }
    }

    /// Entries served from disk so far.
    #[must_use]
    pub const fn hits(&self) -> u64 {
        self.hits
    }

    /// Entries that had to be computed so far.
    #[must_use]
    pub const fn misses(&self) -> u64 {
        self.misses
    }

    /// Returns the cached value for `fingerprint`, or runs `compute`,
    /// stores its result, and returns it.
    ///
    /// A corrupt entry is discarded and recomputed; a failed store is
    /// logged and the freshly computed value returned anyway.
    ///
    /// # Errors
    ///
    /// Returns whatever error `compute` returns. Cache machinery itself
    /// never fails this call.
    pub fn get_or_compute<T, E, F>(
        &mut self,
        stage: &str,
        fingerprint: &Fingerprint,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, E>,
    {
        let path = self.entry_path(stage, &fingerprint.digest());
        if let Some(value) = read_entry(&path) {
            self.hits += 1;
            log::debug!("Cache hit for stage {stage}");
            return Ok(value);
        }

        self.misses += 1;
        log::debug!("Cache miss for stage {stage}, computing");
        let value = compute()?;
        if let Err(e) = self.write_entry(&path, &value) {
            log::warn!("Failed to store cache entry {}: {e}", path.display());
        }
        Ok(value)
    }

    /// Removes every cached entry and resets the hit/miss counters.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache directory exists but cannot be
    /// removed.
    pub fn clear(&mut self) -> Result<(), CacheError> {
        if self.dir.exists() {
            std::fs::remove_dir_all(&self.dir)?;
        }
        self.hits = 0;
        self.misses = 0;
        Ok(())
    }

    fn entry_path(&self, stage: &str, digest: &str) -> PathBuf {
        self.dir.join(format!("{stage}-{digest}.bin"))
    }

    fn write_entry<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), CacheError> {
        std::fs::create_dir_all(&self.dir)?;
        let encoded = rmp_serde::to_vec(value)?;
        let tmp_path = path.with_extension("bin.tmp");
        std::fs::write(&tmp_path, encoded)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

/// Reads and decodes an entry, treating any failure as a miss.
fn read_entry<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let bytes = std::fs::read(path).ok()?;
    rmp_serde::from_slice(&bytes).map_or_else(
        |e| {
            log::warn!("Discarding corrupt cache entry {}: {e}", path.display());
            None
        },
        Some,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_fingerprint() -> Fingerprint {
        Fingerprint::new()
            .with_str("stage", "counts")
            .with_bytes("source", b"a,b,c\n1,2,3\n")
    }

    #[test]
    fn digest_is_deterministic() {
        assert_eq!(sample_fingerprint().digest(), sample_fingerprint().digest());
    }

    #[test]
    fn digest_separates_label_and_value() {
        let a = Fingerprint::new().with_str("ab", "c").digest();
        let b = Fingerprint::new().with_str("a", "bc").digest();
        assert_ne!(a, b);
    }

    #[test]
    fn digest_changes_with_content() {
        let a = Fingerprint::new().with_bytes("source", b"one").digest();
        let b = Fingerprint::new().with_bytes("source", b"two").digest();
        assert_ne!(a, b);
    }

    #[test]
    fn param_changes_digest() {
        let base = Fingerprint::new()
            .with_param("radius", &250.0)
            .unwrap()
            .digest();
        let changed = Fingerprint::new()
            .with_param("radius", &300.0)
            .unwrap()
            .digest();
        assert_ne!(base, changed);
    }

    #[test]
    fn computes_on_miss_and_serves_on_hit() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CacheStore::new(dir.path().join("cache"));
        let fingerprint = sample_fingerprint();

        let mut runs = 0;
        let first: Result<Vec<u64>, std::io::Error> =
            store.get_or_compute("counts", &fingerprint, || {
                runs += 1;
                Ok(vec![1, 2, 3])
            });
        assert_eq!(first.unwrap(), vec![1, 2, 3]);
        assert_eq!(store.misses(), 1);

        let second: Result<Vec<u64>, std::io::Error> =
            store.get_or_compute("counts", &fingerprint, || {
                runs += 1;
                Ok(vec![9, 9, 9])
            });
        assert_eq!(second.unwrap(), vec![1, 2, 3], "hit must serve stored value");
        assert_eq!(store.hits(), 1);
        assert_eq!(runs, 1, "compute must run exactly once");
    }

    #[test]
    fn touched_but_unchanged_file_still_hits() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("incidents.csv");
        std::fs::write(&source, b"a,b,c\n1,2,3\n").unwrap();
        let mut store = CacheStore::new(dir.path().join("cache"));

        let before = Fingerprint::new().with_file("source", &source).unwrap();
        let first: Result<u64, std::io::Error> = store.get_or_compute("counts", &before, || Ok(41));
        assert_eq!(first.unwrap(), 41);

        // Rewrite the same bytes: the mtime moves, the content does not.
        std::fs::write(&source, b"a,b,c\n1,2,3\n").unwrap();
        let after = Fingerprint::new().with_file("source", &source).unwrap();
        assert_eq!(before.digest(), after.digest());

        let second: Result<u64, std::io::Error> = store.get_or_compute("counts", &after, || Ok(99));
        assert_eq!(second.unwrap(), 41, "touched file with equal bytes must hit");
        assert_eq!(store.hits(), 1);
    }

    #[test]
    fn different_fingerprints_use_different_entries() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CacheStore::new(dir.path().join("cache"));

        let a = Fingerprint::new().with_str("source", "a");
        let b = Fingerprint::new().with_str("source", "b");
        let _: Result<u64, std::io::Error> = store.get_or_compute("stage", &a, || Ok(1));
        let got: Result<u64, std::io::Error> = store.get_or_compute("stage", &b, || Ok(2));
        assert_eq!(got.unwrap(), 2);
        assert_eq!(store.misses(), 2);
    }

    #[test]
    fn corrupt_entry_is_recomputed() {
        let dir = tempfile::tempdir().unwrap();
        let cache_dir = dir.path().join("cache");
        let mut store = CacheStore::new(&cache_dir);
        let fingerprint = sample_fingerprint();

        let _: Result<u64, std::io::Error> = store.get_or_compute("stage", &fingerprint, || Ok(7));

        let entry = std::fs::read_dir(&cache_dir)
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
            .path();
        std::fs::write(&entry, b"not messagepack").unwrap();

        let got: Result<u64, std::io::Error> =
            store.get_or_compute("stage", &fingerprint, || Ok(8));
        assert_eq!(got.unwrap(), 8, "corrupt entry must fall through to compute");
        assert_eq!(store.misses(), 2);
    }

    #[test]
    fn compute_errors_propagate_and_store_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cache_dir = dir.path().join("cache");
        let mut store = CacheStore::new(&cache_dir);
        let fingerprint = sample_fingerprint();

        let failed: Result<u64, std::io::Error> = store.get_or_compute("stage", &fingerprint, || {
            Err(std::io::Error::other("boom"))
        });
        assert!(failed.is_err());
        assert!(!cache_dir.exists() || std::fs::read_dir(&cache_dir).unwrap().next().is_none());
    }

    #[test]
    fn clear_removes_entries_and_resets_counters() {
        let dir = tempfile::tempdir().unwrap();
        let cache_dir = dir.path().join("cache");
        let mut store = CacheStore::new(&cache_dir);
        let fingerprint = sample_fingerprint();

        let _: Result<u64, std::io::Error> = store.get_or_compute("stage", &fingerprint, || Ok(1));
        assert!(cache_dir.exists());

        store.clear().unwrap();
        assert!(!cache_dir.exists());
        assert_eq!(store.misses(), 0);

        let _: Result<u64, std::io::Error> = store.get_or_compute("stage", &fingerprint, || Ok(1));
        assert_eq!(store.misses(), 1, "cleared entries must recompute");
    }
}
