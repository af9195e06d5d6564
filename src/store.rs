//! Persistence interfaces and in-memory backends
//!
//! The core depends only on these traits; the storage technology behind them
//! is an external concern. The in-memory implementations back every test.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::StoreError;
use crate::types::ContentHash;

/// Append-only log storage for the trace ledger
pub trait AppendOnlyLog: Send + Sync {
    /// Append a record, returning its sequence number
    fn append(&self, bytes: &[u8]) -> Result<u64, StoreError>;

    /// Read a record by sequence number
    fn read(&self, sequence: u64) -> Result<Option<Vec<u8>>, StoreError>;

    /// Number of records appended
    fn len(&self) -> Result<u64, StoreError>;
}

/// Versioned key-value storage with compare-and-swap semantics
pub trait VersionedKvStore: Send + Sync {
    /// Read a value with its current store version
    fn get(&self, key: &str) -> Result<Option<(Vec<u8>, u64)>, StoreError>;

    /// Write a value; `expected` of `None` requires the key to be absent,
    /// otherwise the stored version must match or the put is rejected
    fn put(&self, key: &str, bytes: &[u8], expected: Option<u64>) -> Result<u64, StoreError>;

    /// All keys under a prefix
    fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

/// Content-addressed blob storage for inputs, outputs, and feature snapshots
pub trait BlobStore: Send + Sync {
    /// Store bytes under their blake3 content address
    fn put(&self, bytes: &[u8]) -> Result<ContentHash, StoreError>;

    /// Load bytes by content address
    fn get(&self, hash: &ContentHash) -> Result<Option<Vec<u8>>, StoreError>;
}

/// In-memory append-only log
#[derive(Debug, Default)]
pub struct InMemoryLog {
    records: RwLock<Vec<Vec<u8>>>,
}

impl InMemoryLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AppendOnlyLog for InMemoryLog {
    fn append(&self, bytes: &[u8]) -> Result<u64, StoreError> {
        let mut records = self.records.write().map_err(|_| StoreError::Backend {
            reason: "log lock poisoned".to_string(),
        })?;
        records.push(bytes.to_vec());
        Ok(records.len() as u64 - 1)
    }

    fn read(&self, sequence: u64) -> Result<Option<Vec<u8>>, StoreError> {
        let records = self.records.read().map_err(|_| StoreError::Backend {
            reason: "log lock poisoned".to_string(),
        })?;
        Ok(records.get(sequence as usize).cloned())
    }

    fn len(&self) -> Result<u64, StoreError> {
        let records = self.records.read().map_err(|_| StoreError::Backend {
            reason: "log lock poisoned".to_string(),
        })?;
        Ok(records.len() as u64)
    }
}

/// In-memory versioned key-value store
#[derive(Debug, Default)]
pub struct InMemoryKvStore {
    entries: RwLock<HashMap<String, (Vec<u8>, u64)>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VersionedKvStore for InMemoryKvStore {
    fn get(&self, key: &str) -> Result<Option<(Vec<u8>, u64)>, StoreError> {
        let entries = self.entries.read().map_err(|_| StoreError::Backend {
            reason: "kv lock poisoned".to_string(),
        })?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, bytes: &[u8], expected: Option<u64>) -> Result<u64, StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::Backend {
            reason: "kv lock poisoned".to_string(),
        })?;

        let found = entries.get(key).map(|(_, version)| *version);
        if found != expected {
            return Err(StoreError::VersionConflict {
                key: key.to_string(),
                expected,
                found,
            });
        }

        let next = found.map_or(0, |v| v + 1);
        entries.insert(key.to_string(), (bytes.to_vec(), next));
        Ok(next)
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let entries = self.entries.read().map_err(|_| StoreError::Backend {
            reason: "kv lock poisoned".to_string(),
        })?;
        let mut keys: Vec<String> = entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// In-memory content-addressed blob store
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<ContentHash, Vec<u8>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for InMemoryBlobStore {
    fn put(&self, bytes: &[u8]) -> Result<ContentHash, StoreError> {
        let hash = ContentHash(*blake3::hash(bytes).as_bytes());
        let mut blobs = self.blobs.write().map_err(|_| StoreError::Backend {
            reason: "blob lock poisoned".to_string(),
        })?;
        blobs.entry(hash).or_insert_with(|| bytes.to_vec());
        Ok(hash)
    }

    fn get(&self, hash: &ContentHash) -> Result<Option<Vec<u8>>, StoreError> {
        let blobs = self.blobs.read().map_err(|_| StoreError::Backend {
            reason: "blob lock poisoned".to_string(),
        })?;
        Ok(blobs.get(hash).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_append_assigns_sequences() {
        let log = InMemoryLog::new();
        assert_eq!(log.append(b"a").unwrap(), 0);
        assert_eq!(log.append(b"b").unwrap(), 1);
        assert_eq!(log.len().unwrap(), 2);
        assert_eq!(log.read(1).unwrap().unwrap(), b"b");
        assert!(log.read(5).unwrap().is_none());
    }

    #[test]
    fn test_kv_cas_rejects_stale_writes() {
        let kv = InMemoryKvStore::new();

        let v0 = kv.put("artifact/f/1.0.0", b"draft", None).unwrap();
        assert_eq!(v0, 0);

        // A second blind create must fail
        let err = kv.put("artifact/f/1.0.0", b"other", None).unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { .. }));

        let v1 = kv.put("artifact/f/1.0.0", b"pending", Some(0)).unwrap();
        assert_eq!(v1, 1);

        // Stale expected version must fail
        let err = kv.put("artifact/f/1.0.0", b"stale", Some(0)).unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { .. }));
    }

    #[test]
    fn test_kv_prefix_listing() {
        let kv = InMemoryKvStore::new();
        kv.put("artifact/a/1.0.0", b"x", None).unwrap();
        kv.put("artifact/a/1.1.0", b"y", None).unwrap();
        kv.put("index/a", b"z", None).unwrap();

        let keys = kv.keys("artifact/a/").unwrap();
        assert_eq!(keys, vec!["artifact/a/1.0.0", "artifact/a/1.1.0"]);
    }

    #[test]
    fn test_blob_store_is_content_addressed() {
        let blobs = InMemoryBlobStore::new();
        let h1 = blobs.put(b"payload").unwrap();
        let h2 = blobs.put(b"payload").unwrap();

        assert_eq!(h1, h2);
        assert_eq!(blobs.get(&h1).unwrap().unwrap(), b"payload");
        assert!(blobs.get(&ContentHash::zero()).unwrap().is_none());
    }
}
