//! Client-side persistence
//!
//! A flat key-value store backed by one file per key under a base directory.
//! Every value is a small text-encoded record. Writes are immediate and
//! last-write-wins; the store is a cache of derivable state, never the sole
//! source of truth, so callers treat write failures as "not persisted this
//! session".

pub mod progress;

use std::fmt;
use std::path::PathBuf;

/// Well-known store keys
pub mod keys {
    /// Local unlock progress, `{"unlockedLevels": n}`
    pub const PROGRESS: &str = "progress.json";
    /// Remote completion map, list of `[id, record]` pairs
    pub const REMOTE_PROGRESS: &str = "remote_progress.json";
    /// Mapping from local level index to previously-saved remote id
    pub const REMOTE_ID_MAP: &str = "remote_ids.json";
    /// Author display name
    pub const AUTHOR_NAME: &str = "author.txt";
    /// Anonymous user identifier, generated once and reused
    pub const USER_ID: &str = "user_id.txt";
    /// Locally authored level library (RON, brotli-compressed)
    pub const LEVEL_LIBRARY: &str = "levels.ron";
}

/// Store error types
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Key has no stored value
    NotFound(String),
    /// Permission denied
    PermissionDenied(String),
    /// Other I/O error (disk full, quota, ...)
    Io(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound(key) => write!(f, "not found: {}", key),
            StoreError::PermissionDenied(msg) => write!(f, "permission denied: {}", msg),
            StoreError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => StoreError::NotFound(e.to_string()),
            std::io::ErrorKind::PermissionDenied => StoreError::PermissionDenied(e.to_string()),
            _ => StoreError::Io(e.to_string()),
        }
    }
}

/// File-backed key-value store
///
/// Cheap to clone; clones share the same base directory. All operations
/// complete immediately.
#[derive(Debug, Clone)]
pub struct KvStore {
    base_dir: PathBuf,
}

impl KvStore {
    /// Create a store rooted at the given directory
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn resolve(&self, key: &str) -> PathBuf {
        self.base_dir.join(key)
    }

    /// Read the value stored under a key
    pub fn read(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        std::fs::read(self.resolve(key)).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StoreError::NotFound(key.to_string()),
            _ => StoreError::from(e),
        })
    }

    /// Read a value as a UTF-8 string
    pub fn read_string(&self, key: &str) -> Result<String, StoreError> {
        let bytes = self.read(key)?;
        String::from_utf8(bytes).map_err(|e| StoreError::Io(e.to_string()))
    }

    /// Write a value, creating the base directory if needed
    pub fn write(&self, key: &str, data: &[u8]) -> Result<(), StoreError> {
        let path = self.resolve(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, data)?;
        Ok(())
    }

    /// Write a string value
    pub fn write_string(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.write(key, value.as_bytes())
    }

    /// Delete a key. Deleting an absent key is not an error.
    pub fn delete(&self, key: &str) -> Result<(), StoreError> {
        match std::fs::remove_file(self.resolve(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::from(e)),
        }
    }

    /// Check whether a key has a stored value
    pub fn exists(&self, key: &str) -> bool {
        self.resolve(key).exists()
    }
}
