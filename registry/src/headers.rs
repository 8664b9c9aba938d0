//! Protocol header names shared across handlers

use axum::http::header::HeaderName;

/// Digest of the returned or created content.
pub const DOCKER_CONTENT_DIGEST: HeaderName = HeaderName::from_static("docker-content-digest");

/// Upload session id echoed on upload responses.
pub const DOCKER_UPLOAD_UUID: HeaderName = HeaderName::from_static("docker-upload-uuid");

/// Minimum chunk size the registry asks clients to honor.
pub const OCI_CHUNK_MIN_LENGTH: HeaderName = HeaderName::from_static("oci-chunk-min-length");

/// Digest of the subject a pushed manifest refers to.
pub const OCI_SUBJECT: HeaderName = HeaderName::from_static("oci-subject");

/// Set on referrers responses when an artifactType filter was applied.
pub const OCI_FILTERS_APPLIED: HeaderName = HeaderName::from_static("oci-filters-applied");

/// Advertised minimum chunk length in bytes (16 MiB).
pub const CHUNK_MIN_BYTES: u64 = 1 << 24;
