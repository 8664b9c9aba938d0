//! Blob and upload-chunk byte storage
//!
//! Wraps the content store with the registry's key scheme. Blob bytes are
//! content-addressed registry-wide under `blobs/sha256/{hex}`; in-flight
//! upload chunks live under `uploads/{uuid}/{index}` until the session is
//! finalized or discarded.

use camino::Utf8PathBuf;
use storage::Storage;

use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};

/// Byte storage for blobs and upload sessions.
#[derive(Debug, Clone)]
pub struct RegistryStorage {
    storage: Storage,
    bucket: String,
}

impl RegistryStorage {
    /// Create a storage layer writing into the given bucket.
    pub fn new(storage: Storage, bucket: impl Into<String>) -> Self {
        Self {
            storage,
            bucket: bucket.into(),
        }
    }

    fn blob_key(digest: &Digest) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("blobs/sha256/{}", digest.hex()))
    }

    fn chunk_key(uuid: &str, index: u32) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("uploads/{uuid}/{index}"))
    }

    fn upload_prefix(uuid: &str) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("uploads/{uuid}"))
    }

    /// Fetch the bytes of a stored blob.
    pub async fn get_blob(&self, digest: &Digest) -> RegistryResult<Vec<u8>> {
        match self.storage.get(&self.bucket, &Self::blob_key(digest)).await {
            Ok(data) => Ok(data),
            Err(err) if err.is_not_found() => {
                Err(RegistryError::BlobUnknown(digest.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Whether blob bytes exist for the given digest.
    pub async fn blob_exists(&self, digest: &Digest) -> RegistryResult<bool> {
        Ok(self
            .storage
            .exists(&self.bucket, &Self::blob_key(digest))
            .await?)
    }

    /// Store blob bytes under their digest. Re-putting existing content is
    /// harmless since the key is derived from the bytes.
    pub async fn put_blob(&self, digest: &Digest, data: &[u8]) -> RegistryResult<()> {
        self.storage
            .put(&self.bucket, &Self::blob_key(digest), data)
            .await?;
        Ok(())
    }

    /// Delete blob bytes. Deleting a missing blob is not an error.
    pub async fn delete_blob(&self, digest: &Digest) -> RegistryResult<()> {
        self.storage
            .delete(&self.bucket, &Self::blob_key(digest))
            .await?;
        Ok(())
    }

    /// Store one chunk of an upload session.
    pub async fn put_chunk(&self, uuid: &str, index: u32, data: &[u8]) -> RegistryResult<()> {
        self.storage
            .put(&self.bucket, &Self::chunk_key(uuid, index), data)
            .await?;
        Ok(())
    }

    /// The size of a stored chunk, or `None` if it was never written.
    pub async fn chunk_size(&self, uuid: &str, index: u32) -> RegistryResult<Option<u64>> {
        match self
            .storage
            .metadata(&self.bucket, &Self::chunk_key(uuid, index))
            .await
        {
            Ok(metadata) => Ok(Some(metadata.size)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Walk an upload session's chunks in index order, returning the next
    /// expected chunk index and the total bytes received so far.
    pub async fn upload_progress(&self, uuid: &str) -> RegistryResult<(u32, u64)> {
        let mut index = 0;
        let mut received = 0;
        while let Some(size) = self.chunk_size(uuid, index).await? {
            received += size;
            index += 1;
        }
        Ok((index, received))
    }

    /// Merge an upload session's chunks in index order and verify the result
    /// against the digest the client declared.
    ///
    /// On success the merged bytes are stored as a blob and the session is
    /// discarded. On a digest mismatch the session is discarded and the
    /// client must restart the upload.
    pub async fn merge_chunks(&self, uuid: &str, expected: &Digest) -> RegistryResult<Vec<u8>> {
        let mut merged = Vec::new();
        let mut index = 0;
        loop {
            match self.storage.get(&self.bucket, &Self::chunk_key(uuid, index)).await {
                Ok(chunk) => {
                    merged.extend_from_slice(&chunk);
                    index += 1;
                }
                Err(err) if err.is_not_found() => break,
                Err(err) => return Err(err.into()),
            }
        }

        if index == 0 {
            return Err(RegistryError::UploadInvalid(uuid.to_string()));
        }

        let actual = Digest::compute(&merged);
        if &actual != expected {
            self.discard_upload(uuid).await?;
            return Err(RegistryError::DigestMismatch {
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }

        self.put_blob(expected, &merged).await?;
        self.discard_upload(uuid).await?;
        Ok(merged)
    }

    /// Delete every chunk of an upload session.
    pub async fn discard_upload(&self, uuid: &str) -> RegistryResult<()> {
        let prefix = Self::upload_prefix(uuid);
        for key in self.storage.list(&self.bucket, Some(&prefix)).await? {
            self.storage.delete(&self.bucket, &key).await?;
        }
        Ok(())
    }
}
