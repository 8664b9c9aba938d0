//! Record persistence over the content store
//!
//! Every record is one JSON object per key. Repository names contain `/`,
//! so any name used inside a key is percent-encoded into a single path
//! component first; `ns/app` and a repository literally named `ns` can then
//! never shadow each other's prefixes.
//!
//! Key layout, all under the `meta/` prefix:
//!
//! ```text
//! meta/repositories/{name}.json
//! meta/manifests/{name}/{digest}.json
//! meta/blobs/{digest}.json
//! meta/users/{username}.json
//! meta/permissions/{username}/{name}.json
//! ```

use camino::Utf8PathBuf;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::de::DeserializeOwned;
use serde::Serialize;
use storage::Storage;

use crate::error::RegistryResult;
use crate::models::{BlobRecord, ManifestRecord, Repository, RepositoryPermission, User};

/// Characters escaped when a name becomes a key component. `/` keeps names
/// to a single component, `%` keeps the encoding reversible.
const COMPONENT: &AsciiSet = &CONTROLS.add(b'/').add(b'%');

fn encode_component(name: &str) -> String {
    utf8_percent_encode(name, COMPONENT).to_string()
}

fn encode_digest(digest: &str) -> String {
    digest.replace(':', "-")
}

/// Store for the registry's metadata records.
///
/// Cloneable; all clones share the same backend.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    storage: Storage,
    bucket: String,
}

impl MetadataStore {
    /// Create a store writing records into the given bucket.
    pub fn new(storage: Storage, bucket: impl Into<String>) -> Self {
        Self {
            storage,
            bucket: bucket.into(),
        }
    }

    async fn read<T: DeserializeOwned>(&self, key: &Utf8PathBuf) -> RegistryResult<Option<T>> {
        match self.storage.get(&self.bucket, key).await {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn write<T: Serialize>(&self, key: &Utf8PathBuf, record: &T) -> RegistryResult<()> {
        let data = serde_json::to_vec(record)?;
        self.storage.put(&self.bucket, key, &data).await?;
        Ok(())
    }

    fn repository_key(name: &str) -> Utf8PathBuf {
        Utf8PathBuf::from(format!(
            "meta/repositories/{}.json",
            encode_component(name)
        ))
    }

    fn manifest_key(repository_name: &str, digest: &str) -> Utf8PathBuf {
        Utf8PathBuf::from(format!(
            "meta/manifests/{}/{}.json",
            encode_component(repository_name),
            encode_digest(digest)
        ))
    }

    fn manifest_prefix(repository_name: &str) -> Utf8PathBuf {
        Utf8PathBuf::from(format!(
            "meta/manifests/{}",
            encode_component(repository_name)
        ))
    }

    fn blob_key(digest: &str) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("meta/blobs/{}.json", encode_digest(digest)))
    }

    fn user_key(username: &str) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("meta/users/{}.json", encode_component(username)))
    }

    fn permission_key(username: &str, repository_name: &str) -> Utf8PathBuf {
        Utf8PathBuf::from(format!(
            "meta/permissions/{}/{}.json",
            encode_component(username),
            encode_component(repository_name)
        ))
    }

    /// Look up a repository by name.
    pub async fn find_repository(&self, name: &str) -> RegistryResult<Option<Repository>> {
        self.read(&Self::repository_key(name)).await
    }

    /// Persist a repository record, replacing any existing one.
    pub async fn persist_repository(&self, repository: &Repository) -> RegistryResult<()> {
        self.write(&Self::repository_key(&repository.name), repository)
            .await
    }

    /// Delete a repository record. Its manifests are deleted separately.
    pub async fn delete_repository(&self, name: &str) -> RegistryResult<()> {
        self.storage
            .delete(&self.bucket, &Self::repository_key(name))
            .await?;
        Ok(())
    }

    /// Load every repository record in the registry.
    pub async fn list_repositories(&self) -> RegistryResult<Vec<Repository>> {
        let prefix = Utf8PathBuf::from("meta/repositories");
        let keys = self.storage.list(&self.bucket, Some(&prefix)).await?;
        let mut repositories = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(repository) = self.read(&key).await? {
                repositories.push(repository);
            }
        }
        Ok(repositories)
    }

    /// Look up a manifest by its content digest.
    pub async fn find_manifest_by_digest(
        &self,
        repository_name: &str,
        digest: &str,
    ) -> RegistryResult<Option<ManifestRecord>> {
        self.read(&Self::manifest_key(repository_name, digest))
            .await
    }

    /// Resolve a tag to its live manifest.
    ///
    /// Tags are mutable pointers; if stale holders exist the most recently
    /// updated record wins.
    pub async fn find_manifest_by_tag(
        &self,
        repository_name: &str,
        tag: &str,
    ) -> RegistryResult<Option<ManifestRecord>> {
        let manifests = self.list_manifests(repository_name).await?;
        Ok(manifests
            .into_iter()
            .filter(|manifest| manifest.tag.as_deref() == Some(tag))
            .max_by_key(|manifest| manifest.updated_at))
    }

    /// Load every manifest record in a repository.
    pub async fn list_manifests(
        &self,
        repository_name: &str,
    ) -> RegistryResult<Vec<ManifestRecord>> {
        let prefix = Self::manifest_prefix(repository_name);
        let keys = self.storage.list(&self.bucket, Some(&prefix)).await?;
        let mut manifests = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(manifest) = self.read(&key).await? {
                manifests.push(manifest);
            }
        }
        Ok(manifests)
    }

    /// Persist a manifest record, replacing any existing one for the same
    /// (repository, digest) pair.
    pub async fn persist_manifest(&self, manifest: &ManifestRecord) -> RegistryResult<()> {
        self.write(
            &Self::manifest_key(&manifest.repository_name, &manifest.digest),
            manifest,
        )
        .await
    }

    /// Delete a manifest record. Deleting a missing record is not an error.
    pub async fn delete_manifest(
        &self,
        repository_name: &str,
        digest: &str,
    ) -> RegistryResult<()> {
        self.storage
            .delete(&self.bucket, &Self::manifest_key(repository_name, digest))
            .await?;
        Ok(())
    }

    /// Count the tagged manifests in a repository.
    pub async fn count_tagged(&self, repository_name: &str) -> RegistryResult<usize> {
        let manifests = self.list_manifests(repository_name).await?;
        Ok(manifests
            .iter()
            .filter(|manifest| manifest.tag.is_some())
            .count())
    }

    /// Look up a blob record by digest.
    pub async fn find_blob(&self, digest: &str) -> RegistryResult<Option<BlobRecord>> {
        self.read(&Self::blob_key(digest)).await
    }

    /// Persist a blob record.
    pub async fn persist_blob(&self, blob: &BlobRecord) -> RegistryResult<()> {
        self.write(&Self::blob_key(&blob.digest), blob).await
    }

    /// Delete a blob record. Deleting a missing record is not an error.
    pub async fn delete_blob(&self, digest: &str) -> RegistryResult<()> {
        self.storage
            .delete(&self.bucket, &Self::blob_key(digest))
            .await?;
        Ok(())
    }

    /// Look up a user by username.
    pub async fn find_user(&self, username: &str) -> RegistryResult<Option<User>> {
        self.read(&Self::user_key(username)).await
    }

    /// Persist a user record.
    pub async fn persist_user(&self, user: &User) -> RegistryResult<()> {
        self.write(&Self::user_key(&user.username), user).await
    }

    /// Look up the pull/push grant for a (user, repository) pair.
    pub async fn find_permission(
        &self,
        username: &str,
        repository_name: &str,
    ) -> RegistryResult<Option<RepositoryPermission>> {
        self.read(&Self::permission_key(username, repository_name))
            .await
    }

    /// Persist a permission grant, upserting on the (user, repository) pair.
    pub async fn persist_permission(
        &self,
        permission: &RepositoryPermission,
    ) -> RegistryResult<()> {
        self.write(
            &Self::permission_key(&permission.username, &permission.repository_name),
            permission,
        )
        .await
    }
}
