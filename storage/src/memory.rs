use std::collections::HashMap;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{Driver, Metadata, StorageError};

#[derive(Debug)]
struct MemoryObject {
    created: DateTime<Utc>,
    data: Vec<u8>,
}

impl From<Vec<u8>> for MemoryObject {
    fn from(data: Vec<u8>) -> Self {
        Self {
            created: Utc::now(),
            data,
        }
    }
}

impl From<&MemoryObject> for Metadata {
    fn from(value: &MemoryObject) -> Self {
        Self {
            size: value.data.len() as u64,
            created: value.created,
        }
    }
}

/// Storage driver that keeps objects in memory.
///
/// Intended for tests and ephemeral registries; contents are lost when the
/// process exits.
#[derive(Debug, Default)]
pub struct MemoryDriver {
    buckets: RwLock<HashMap<String, HashMap<Utf8PathBuf, MemoryObject>>>,
}

impl MemoryDriver {
    /// Create a new `MemoryDriver` with no buckets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new `MemoryDriver` with the given buckets.
    pub fn with_buckets(buckets: &[&str]) -> Self {
        let mut map = HashMap::new();
        for bucket in buckets {
            map.insert(bucket.to_string(), HashMap::new());
        }

        Self {
            buckets: RwLock::new(map),
        }
    }
}

#[async_trait::async_trait]
impl Driver for MemoryDriver {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn put(&self, bucket: &str, key: &Utf8Path, data: &[u8]) -> Result<(), StorageError> {
        let mut buckets = self.buckets.write().await;
        let bucket_map = buckets.entry(bucket.to_string()).or_default();
        bucket_map.insert(key.to_owned(), data.to_vec().into());
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &Utf8Path) -> Result<Vec<u8>, StorageError> {
        let buckets = self.buckets.read().await;
        let bucket_map = buckets
            .get(bucket)
            .ok_or_else(|| StorageError::not_found(self.name(), format_args!("bucket {bucket}")))?;
        let object = bucket_map
            .get(key)
            .ok_or_else(|| StorageError::not_found(self.name(), format_args!("key {key}")))?;
        Ok(object.data.clone())
    }

    async fn metadata(&self, bucket: &str, key: &Utf8Path) -> Result<Metadata, StorageError> {
        let buckets = self.buckets.read().await;
        let bucket_map = buckets
            .get(bucket)
            .ok_or_else(|| StorageError::not_found(self.name(), format_args!("bucket {bucket}")))?;
        bucket_map
            .get(key)
            .map(Metadata::from)
            .ok_or_else(|| StorageError::not_found(self.name(), format_args!("key {key}")))
    }

    async fn delete(&self, bucket: &str, key: &Utf8Path) -> Result<(), StorageError> {
        let mut buckets = self.buckets.write().await;
        let bucket_map = buckets
            .get_mut(bucket)
            .ok_or_else(|| StorageError::not_found(self.name(), format_args!("bucket {bucket}")))?;
        bucket_map.remove(key);
        Ok(())
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<Utf8PathBuf>, StorageError> {
        let buckets = self.buckets.read().await;
        let bucket_map = buckets
            .get(bucket)
            .ok_or_else(|| StorageError::not_found(self.name(), format_args!("bucket {bucket}")))?;

        let mut keys = Vec::new();
        for key in bucket_map.keys() {
            match prefix {
                Some(prefix) if !key.starts_with(prefix) => continue,
                _ => keys.push(key.clone()),
            }
        }

        Ok(keys)
    }
}
