//! Durable record storage.
//!
//! `RecordStore` is the narrow key/value seam the engines persist through.
//! Keys are slash-separated paths (`workflows/{nym}/{id}`); values are opaque
//! bytes owned by the caller. Two reference backends ship with the crate: an
//! in-memory map for tests and composition, and a file-per-record backend
//! that uses fs2 file locks so concurrent processes cannot interleave writes.
//!
//! # Thread Safety
//!
//! Both backends are `Send + Sync` and safe to share behind an `Arc`. The
//! memory backend serializes access through an `RwLock`; the file backend
//! takes an exclusive OS lock on the record file for every mutation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

pub type Result<T> = anyhow::Result<T>;

/// Key/value persistence seam used by every engine in the workspace.
pub trait RecordStore: Send + Sync {
    /// Fetch a record. `Ok(None)` when the key has never been written.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write or replace a record.
    fn put(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Remove a record. Returns whether it existed.
    fn delete(&self, key: &str) -> Result<bool>;

    /// List every stored key starting with `prefix`, in lexicographic order.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Volatile store backed by a `HashMap`.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryRecordStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records.get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        Ok(records.remove(key).is_some())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let mut keys: Vec<String> = records
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// One file per record under a base directory.
///
/// File names are the hex encoding of the record key, which keeps arbitrary
/// key bytes out of the filesystem namespace and makes `list` a pure
/// directory scan. Mutations hold an fs2 exclusive lock on the record file
/// for their duration.
pub struct FileRecordStore {
    base_path: PathBuf,
}

impl FileRecordStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        std::fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.base_path.join(hex::encode(key.as_bytes()))
    }
}

impl RecordStore for FileRecordStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.record_path(key);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(std::fs::read(path)?))
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        use fs2::FileExt;
        use std::io::Write;

        let path = self.record_path(key);
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        // Exclusive lock for the whole rewrite, released on every exit path.
        file.lock_exclusive()?;
        let result = (|| -> Result<()> {
            file.set_len(0)?;
            let mut file = &file;
            file.write_all(value)?;
            file.flush()?;
            Ok(())
        })();
        file.unlock()?;
        result
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let path = self.record_path(key);
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(path)?;
        Ok(true)
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for entry in std::fs::read_dir(&self.base_path)? {
            let entry = entry?;
            if !entry.path().is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Ok(raw) = hex::decode(name) else {
                // Not one of ours; ignore foreign files in the directory.
                continue;
            };
            let Ok(key) = String::from_utf8(raw) else {
                continue;
            };
            if key.starts_with(prefix) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}
