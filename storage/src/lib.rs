//! # Content store backends
//!
//! A narrow put/get/stat/delete/list contract over durable object storage,
//! with backends selected at process wiring time. The registry protocol
//! engine depends only on the [`Driver`] trait through the cloneable
//! [`Storage`] facade and never on a concrete backend.

use std::fmt;
use std::sync::Arc;

use camino::Utf8Path;
use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use serde::Deserialize;

pub(crate) mod error;
pub(crate) mod local;
pub(crate) mod memory;

#[doc(inline)]
pub use error::{StorageError, StorageErrorKind};
#[doc(inline)]
pub use local::LocalDriver;
#[doc(inline)]
pub use memory::MemoryDriver;

/// Object metadata, generically provided by every driver.
///
/// Only the fields common to all backends are surfaced here; drivers may
/// expose richer metadata through their own APIs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Metadata {
    /// The size of the stored object in bytes.
    pub size: u64,

    /// The creation timestamp of the stored object.
    pub created: DateTime<Utc>,
}

/// A storage driver, providing the ability to interact with one backend.
///
/// Keys are relative [`Utf8Path`]s scoped to a named bucket. Objects are
/// opaque byte payloads; drivers never interpret their contents.
#[async_trait::async_trait]
pub trait Driver: fmt::Debug {
    /// The name of the driver, used in error reports and tracing spans.
    fn name(&self) -> &'static str;

    /// Store an object, replacing any existing object at the same key.
    async fn put(&self, bucket: &str, key: &Utf8Path, data: &[u8]) -> Result<(), StorageError>;

    /// Fetch the full contents of an object.
    async fn get(&self, bucket: &str, key: &Utf8Path) -> Result<Vec<u8>, StorageError>;

    /// Get the metadata for an object without fetching its contents.
    async fn metadata(&self, bucket: &str, key: &Utf8Path) -> Result<Metadata, StorageError>;

    /// Delete an object. Deleting a missing key is not an error.
    async fn delete(&self, bucket: &str, key: &Utf8Path) -> Result<(), StorageError>;

    /// List the keys in a bucket, optionally filtered by a path prefix.
    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<Utf8PathBuf>, StorageError>;
}

pub(crate) type ArcDriver = Arc<dyn Driver + Send + Sync>;

/// Cloneable handle over a storage driver.
///
/// All registry components share one `Storage`; the driver behind it is
/// read-only after wiring, so cloning is cheap and thread-safe.
#[derive(Debug, Clone)]
pub struct Storage {
    driver: ArcDriver,
}

impl<D> From<D> for Storage
where
    D: Driver + Send + Sync + 'static,
{
    fn from(value: D) -> Self {
        Storage::new(value)
    }
}

impl Storage {
    /// Wrap a driver in a shared, cloneable handle.
    pub fn new<D: Driver + Send + Sync + 'static>(driver: D) -> Self {
        Self {
            driver: Arc::new(driver),
        }
    }

    /// The name of the underlying driver.
    pub fn name(&self) -> &str {
        self.driver.name()
    }

    /// Store an object, replacing any existing object at the same key.
    #[tracing::instrument(skip(self, data), fields(driver = self.driver.name(), size = data.len()))]
    pub async fn put(&self, bucket: &str, key: &Utf8Path, data: &[u8]) -> Result<(), StorageError> {
        tracing::trace!(%key, "storing object in {bucket}/{key}");
        self.driver.put(bucket, key, data).await
    }

    /// Fetch the full contents of an object.
    #[tracing::instrument(skip(self), fields(driver = self.driver.name()))]
    pub async fn get(&self, bucket: &str, key: &Utf8Path) -> Result<Vec<u8>, StorageError> {
        tracing::trace!(%key, "fetching object from {bucket}/{key}");
        self.driver.get(bucket, key).await
    }

    /// Get the metadata for an object without fetching its contents.
    #[tracing::instrument(skip(self), fields(driver = self.driver.name()))]
    pub async fn metadata(&self, bucket: &str, key: &Utf8Path) -> Result<Metadata, StorageError> {
        self.driver.metadata(bucket, key).await
    }

    /// Delete an object.
    #[tracing::instrument(skip(self), fields(driver = self.driver.name()))]
    pub async fn delete(&self, bucket: &str, key: &Utf8Path) -> Result<(), StorageError> {
        self.driver.delete(bucket, key).await
    }

    /// List the keys in a bucket, optionally filtered by a path prefix.
    #[tracing::instrument(skip(self), fields(driver = self.driver.name()))]
    pub async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<Utf8PathBuf>, StorageError> {
        self.driver.list(bucket, prefix).await
    }

    /// Check whether an object exists at the given key.
    pub async fn exists(&self, bucket: &str, key: &Utf8Path) -> Result<bool, StorageError> {
        match self.driver.metadata(bucket, key).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }
}

/// Backend selection, deserialized from the process configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageConfig {
    /// In-memory storage, for tests and ephemeral registries.
    Memory {
        /// Initial bucket to create.
        bucket: String,
    },

    /// Local filesystem storage rooted at a directory.
    Local {
        /// Root directory under which buckets are created.
        path: Utf8PathBuf,
    },
}

impl StorageConfig {
    /// Build the configured storage backend.
    pub fn build(self) -> Storage {
        match self {
            StorageConfig::Memory { bucket } => MemoryDriver::with_buckets(&[&bucket]).into(),
            StorageConfig::Local { path } => LocalDriver::new(path).into(),
        }
    }
}
