//! Blob storage for photographic evidence.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StorageError;

/// One object to be written, with its content type and custom metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobObject {
    pub key: String,
    pub content_type: String,
    pub metadata: BTreeMap<String, String>,
    pub bytes: Vec<u8>,
}

/// Object store addressed by bucket + key.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Bucket the public URLs point into.
    fn bucket(&self) -> &str;

    /// Write and finalize one object. Overwrites are never requested: keys
    /// are generated fresh per upload.
    async fn put(&self, object: BlobObject) -> Result<(), StorageError>;
}

/// Process-local blob store.
///
/// `failing_from(n)` makes every upload after the first `n` fail, which is
/// how tests reproduce a signature upload failing after the evidence
/// upload succeeded.
#[derive(Debug)]
pub struct MemoryBlobStore {
    bucket: String,
    objects: Mutex<HashMap<String, BlobObject>>,
    attempts: AtomicUsize,
    fail_from: Option<usize>,
}

impl MemoryBlobStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: Mutex::new(HashMap::new()),
            attempts: AtomicUsize::new(0),
            fail_from: None,
        }
    }

    pub fn failing_from(mut self, successful_uploads: usize) -> Self {
        self.fail_from = Some(successful_uploads);
        self
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &str) -> Option<BlobObject> {
        self.lock().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, BlobObject>> {
        self.objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put(&self, object: BlobObject) -> Result<(), StorageError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_from.is_some_and(|limit| attempt >= limit) {
            return Err(StorageError::Write {
                key: object.key,
                reason: "injected failure".into(),
            });
        }

        self.lock().insert(object.key.clone(), object);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(key: &str) -> BlobObject {
        BlobObject {
            key: key.into(),
            content_type: "image/png".into(),
            metadata: BTreeMap::new(),
            bytes: vec![1, 2, 3],
        }
    }

    #[tokio::test]
    async fn stores_objects_by_key() {
        let store = MemoryBlobStore::new("bucket");
        store.put(object("a/1.png")).await.unwrap();
        store.put(object("a/2.png")).await.unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.keys(), vec!["a/1.png", "a/2.png"]);
        assert_eq!(store.get("a/1.png").unwrap().bytes, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn injected_failure_starts_after_budget() {
        let store = MemoryBlobStore::new("bucket").failing_from(1);
        assert!(store.put(object("first")).await.is_ok());
        assert!(matches!(
            store.put(object("second")).await,
            Err(StorageError::Write { .. })
        ));
        assert_eq!(store.keys(), vec!["first"]);
    }
}
