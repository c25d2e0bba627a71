//! File Cache Module
//!
//! On-disk cache backend storing one JSON record per key.
//!
//! File names are the hex SHA-256 of the logical key, so keys may contain any
//! characters and any length. The record keeps the logical key to detect
//! hash collisions and to support prefix invalidation.
//!
//! Only the instance lock serializes access: several processes sharing one
//! directory are not coordinated.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::cache::{Cache, CacheEntry, CacheStats, FILE_SUFFIX};
use crate::error::Result;

// == File Record ==
#[derive(Debug, Serialize, Deserialize)]
struct FileRecord {
    key: String,
    #[serde(flatten)]
    entry: CacheEntry,
}

enum ReadOutcome {
    Missing,
    Corrupt(String),
    Found(FileRecord),
}

// == File Cache ==
/// Directory-backed cache with lazy TTL expiry.
#[derive(Debug)]
pub struct FileCache {
    dir: PathBuf,
    default_ttl: Option<Duration>,
    /// Serializes all file operations and holds the counters
    state: Mutex<CacheStats>,
}

impl FileCache {
    // == Constructor ==
    /// Opens a cache rooted at `dir`, creating the directory if needed.
    ///
    /// # Arguments
    /// * `dir` - Directory holding the entry files
    /// * `default_ttl` - TTL applied when `set` gets none (None = never expires)
    pub fn new(dir: impl Into<PathBuf>, default_ttl: Option<Duration>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        debug!(dir = %dir.display(), "File cache opened");

        Ok(Self {
            dir,
            default_ttl,
            state: Mutex::new(CacheStats::new()),
        })
    }

    /// Directory holding the entry files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file backing `key`, whether or not it exists.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.dir.join(format!("{}.{}", hex::encode(digest), FILE_SUFFIX))
    }

    /// Lists the files this cache owns. Caller holds the state lock.
    fn entry_paths(&self) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for dir_entry in fs::read_dir(&self.dir)? {
            let path = dir_entry?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == FILE_SUFFIX) {
                paths.push(path);
            }
        }
        Ok(paths)
    }

    /// Removes a file, treating an already-missing file as removed.
    fn remove_path(path: &Path) -> bool {
        match fs::remove_file(path) {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to remove cache file");
                false
            }
        }
    }

    /// Scans every owned file, removing those `should_remove` selects.
    fn sweep<F>(&self, mut should_remove: F) -> Result<usize>
    where
        F: FnMut(&Path, &ReadOutcome) -> bool,
    {
        let mut removed = 0;
        for path in self.entry_paths()? {
            let outcome = read_record(&path);
            if should_remove(&path, &outcome) && Self::remove_path(&path) {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn read_record(path: &Path) -> ReadOutcome {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return ReadOutcome::Missing,
        Err(e) => return ReadOutcome::Corrupt(e.to_string()),
    };
    match serde_json::from_slice(&bytes) {
        Ok(record) => ReadOutcome::Found(record),
        Err(e) => ReadOutcome::Corrupt(e.to_string()),
    }
}

impl Cache for FileCache {
    // == Get ==
    fn get(&self, key: &str) -> Option<Value> {
        let mut stats = self.state.lock();
        let path = self.path_for(key);

        match read_record(&path) {
            ReadOutcome::Found(record) if record.key != key => {
                debug!(key, other = %record.key, "File cache hash collision");
                stats.record_miss();
                None
            }
            ReadOutcome::Found(record) if record.entry.is_expired() => {
                Self::remove_path(&path);
                stats.record_expirations(1);
                stats.record_miss();
                debug!(key, "File cache entry expired on read");
                None
            }
            ReadOutcome::Found(record) => {
                stats.record_hit();
                Some(record.entry.value)
            }
            ReadOutcome::Missing => {
                stats.record_miss();
                None
            }
            ReadOutcome::Corrupt(reason) => {
                warn!(key, path = %path.display(), reason = %reason, "Unreadable file cache entry treated as miss");
                stats.record_miss();
                None
            }
        }
    }

    // == Set ==
    fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        let record = FileRecord {
            key: key.to_string(),
            entry: CacheEntry::new(value, ttl.or(self.default_ttl)),
        };
        let bytes = serde_json::to_vec(&record)?;

        let _guard = self.state.lock();
        let path = self.path_for(key);
        // Write beside the target and rename so readers never see a partial record
        let tmp = path.with_extension("tmp");
        if let Err(e) = fs::write(&tmp, bytes).and_then(|()| fs::rename(&tmp, &path)) {
            // clear() and cleanup() only see .cache files, so drop the temp file here
            Self::remove_path(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    // == Delete ==
    fn delete(&self, key: &str) -> Result<bool> {
        let _guard = self.state.lock();
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn clear(&self) -> Result<()> {
        let _guard = self.state.lock();
        for path in self.entry_paths()? {
            Self::remove_path(&path);
        }
        Ok(())
    }

    // == Cleanup Expired ==
    /// Removes expired entries and any file that cannot be decoded.
    fn cleanup(&self) -> Result<usize> {
        let mut stats = self.state.lock();
        let mut expired = 0;

        let removed = self.sweep(|path, outcome| match outcome {
            ReadOutcome::Found(record) if record.entry.is_expired() => {
                expired += 1;
                true
            }
            ReadOutcome::Corrupt(reason) => {
                warn!(path = %path.display(), reason = reason.as_str(), "Removing corrupt file cache entry");
                true
            }
            _ => false,
        })?;

        stats.record_expirations(expired);
        Ok(removed)
    }

    fn invalidate_prefix(&self, prefix: &str) -> Result<usize> {
        let _guard = self.state.lock();
        self.sweep(|_, outcome| matches!(outcome, ReadOutcome::Found(record) if record.key.starts_with(prefix)))
    }

    fn len(&self) -> usize {
        let _guard = self.state.lock();
        match self.entry_paths() {
            Ok(paths) => paths.len(),
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "Failed to list file cache");
                0
            }
        }
    }

    fn stats(&self) -> CacheStats {
        let total = self.len();
        self.state.lock().with_total_entries(total)
    }

    fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl
    }
}
