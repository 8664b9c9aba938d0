//! Persisted metadata records and the manifest document model
//!
//! Records are stored as one JSON object per file through the content store;
//! the shapes here are the persistence format, so field renames are breaking.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Annotation key consulted as a tag fallback when a manifest is pushed by
/// digest but carries a version annotation.
pub const VERSION_ANNOTATION: &str = "org.opencontainers.image.version";

/// Role granting unrestricted access to every repository.
pub const ADMIN_ROLE: &str = "ADMIN";

/// A repository record, created lazily on first push.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    /// Slash-structured repository name, e.g. `ns/app`.
    pub name: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the most recent manifest push.
    pub updated_at: DateTime<Utc>,
}

impl Repository {
    /// Create a fresh repository record.
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Bump the updated timestamp.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// A descriptor embedded in a manifest (config, layer, or subject).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Media type of the referenced content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    /// Digest of the referenced content.
    #[serde(default)]
    pub digest: Option<String>,
    /// Size in bytes of the referenced content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// A stored manifest.
///
/// `content` is the verbatim request body; it is never re-serialized so the
/// digest recomputed on GET always matches the stored digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestRecord {
    /// Name of the owning repository.
    pub repository_name: String,
    /// Content digest, the primary key within a repository.
    pub digest: String,
    /// Media type, from the Content-Type header or the document itself.
    pub media_type: String,
    /// OCI artifact type, when the document declares one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,
    /// Raw manifest bytes, exactly as pushed.
    #[serde(with = "raw_content")]
    pub content: Vec<u8>,
    /// Length of `content` in bytes.
    pub content_length: u64,
    /// Mutable tag pointer; at most one live record per (repository, tag).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// The referrers graph edge, when the manifest declares a subject.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Descriptor>,
    /// Manifest annotations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
    /// Digest of the config descriptor, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_digest: Option<String>,
    /// Digests of the layer descriptors.
    #[serde(default)]
    pub layer_digests: Vec<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the most recent update (tag moves included).
    pub updated_at: DateTime<Utc>,
}

/// A blob record. Blobs are content-addressed registry-wide, so records are
/// not scoped to a repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobRecord {
    /// Content digest, globally unique.
    pub digest: String,
    /// Size of the stored bytes.
    pub content_length: u64,
    /// Media type, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// A registry user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Unique login name.
    pub username: String,
    /// bcrypt hash of the password.
    pub password_hash: String,
    /// Contact address, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Disabled users cannot authenticate or act.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Role names; `ADMIN` grants everything.
    #[serde(default)]
    pub roles: Vec<String>,
    /// Repository allow-list; empty means unrestricted.
    #[serde(default)]
    pub allowed_repositories: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

impl User {
    /// Whether this user carries the admin role.
    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|role| role == ADMIN_ROLE)
    }

    /// Whether this user may touch the named repository at all.
    ///
    /// Admins always may; otherwise an empty allow-list is unrestricted.
    pub fn has_access_to_repository(&self, repository_name: &str) -> bool {
        if self.is_admin() {
            return true;
        }
        if self.allowed_repositories.is_empty() {
            return true;
        }
        self.allowed_repositories
            .iter()
            .any(|name| name == repository_name)
    }
}

/// Per-user, per-repository pull/push grant. At most one record per
/// (username, repository) pair; persists with upsert semantics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryPermission {
    /// Grantee.
    pub username: String,
    /// Repository the grant applies to.
    pub repository_name: String,
    /// Whether reads are allowed.
    pub can_pull: bool,
    /// Whether writes are allowed.
    pub can_push: bool,
}

/// The subset of a manifest document the registry inspects.
///
/// The raw body stays authoritative; this is parse-only and never written
/// back, so unknown fields are ignored rather than dropped.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ManifestDocument {
    /// Declared media type.
    pub media_type: Option<String>,
    /// Declared artifact type.
    pub artifact_type: Option<String>,
    /// Config descriptor.
    pub config: Option<Descriptor>,
    /// Layer descriptors.
    pub layers: Vec<Descriptor>,
    /// Subject descriptor (referrers edge).
    pub subject: Option<Descriptor>,
    /// Annotations.
    pub annotations: BTreeMap<String, String>,
}

impl ManifestDocument {
    /// Parse a manifest body. Unparseable bodies yield the empty document;
    /// the raw bytes are still stored verbatim either way.
    pub fn parse(content: &[u8]) -> Self {
        serde_json::from_slice(content).unwrap_or_default()
    }
}

mod raw_content {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
