use camino::{Utf8Path, Utf8PathBuf};

use crate::{Driver, Metadata, StorageError};

/// Storage driver backed by a local filesystem directory.
///
/// Objects are regular files under `<root>/<bucket>/<key>`. Keys may contain
/// path separators; parent directories are created on demand.
#[derive(Debug)]
pub struct LocalDriver {
    root: Utf8PathBuf,
}

impl LocalDriver {
    /// Create a driver rooted at the given directory.
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, bucket: &str, key: &Utf8Path) -> Utf8PathBuf {
        let mut path = self.root.join(bucket);
        path.push(key);
        path
    }
}

#[async_trait::async_trait]
impl Driver for LocalDriver {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn put(&self, bucket: &str, key: &Utf8Path, data: &[u8]) -> Result<(), StorageError> {
        let path = self.path(bucket, key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| StorageError::from_io(self.name(), err))?;
        }
        tokio::fs::write(&path, data)
            .await
            .map_err(|err| StorageError::from_io(self.name(), err))?;
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &Utf8Path) -> Result<Vec<u8>, StorageError> {
        let path = self.path(bucket, key);
        tokio::fs::read(&path)
            .await
            .map_err(|err| StorageError::from_io(self.name(), err))
    }

    async fn metadata(&self, bucket: &str, key: &Utf8Path) -> Result<Metadata, StorageError> {
        let path = self.path(bucket, key);
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|err| StorageError::from_io(self.name(), err))?;
        if metadata.is_dir() {
            return Err(StorageError::not_found(
                self.name(),
                format_args!("key {key}"),
            ));
        }
        // Not every filesystem reports a creation time; fall back to now.
        let created = metadata
            .created()
            .map(Into::into)
            .unwrap_or_else(|_| chrono::Utc::now());
        Ok(Metadata {
            size: metadata.len(),
            created,
        })
    }

    async fn delete(&self, bucket: &str, key: &Utf8Path) -> Result<(), StorageError> {
        let path = self.path(bucket, key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StorageError::from_io(self.name(), err)),
        }
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<Utf8PathBuf>, StorageError> {
        let base = self.root.join(bucket);
        let mut start = base.clone();
        if let Some(prefix) = prefix {
            start.push(prefix);
        }

        let mut keys = Vec::new();
        let mut pending = vec![start];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(StorageError::from_io(self.name(), err)),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|err| StorageError::from_io(self.name(), err))?
            {
                let path = Utf8PathBuf::from_path_buf(entry.path()).map_err(|path| {
                    StorageError::not_found(
                        self.name(),
                        format_args!("non-UTF8 path {}", path.display()),
                    )
                })?;
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|err| StorageError::from_io(self.name(), err))?;
                if file_type.is_dir() {
                    pending.push(path);
                } else if let Ok(key) = path.strip_prefix(&base) {
                    keys.push(key.to_owned());
                }
            }
        }

        Ok(keys)
    }
}
