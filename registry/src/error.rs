//! Error types for the registry protocol engine

use axum::http::{header::HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::digest::InvalidDigest;

/// Header attached to the version probe and to every error response, so
/// clients can tell a registry failure from a generic gateway failure.
pub const API_VERSION_HEADER: HeaderName =
    HeaderName::from_static("docker-distribution-api-version");

/// Value of the [`API_VERSION_HEADER`] header.
pub const API_VERSION: &str = "registry/2.0";

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Error type for registry operations, mapping onto the OCI error codes.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Repository name not known to the registry
    #[error("repository name not known to registry: {0}")]
    NameUnknown(String),

    /// Manifest reference did not resolve
    #[error("manifest unknown: {0}")]
    ManifestUnknown(String),

    /// Blob digest not known to the registry
    #[error("blob unknown to registry: {0}")]
    BlobUnknown(String),

    /// Malformed digest reference
    #[error(transparent)]
    InvalidDigest(#[from] InvalidDigest),

    /// Finalized content hashed to a different digest than the client declared
    #[error("provided digest did not match uploaded content")]
    DigestMismatch {
        /// Digest declared by the client
        expected: String,
        /// Digest computed from the uploaded bytes
        actual: String,
    },

    /// A finalizing upload call arrived without the required digest parameter
    #[error("digest query parameter is required")]
    MissingDigest,

    /// Manifest body was empty or structurally unusable
    #[error("manifest invalid: {0}")]
    InvalidManifest(String),

    /// Manifest media type is not one the registry accepts
    #[error("unsupported manifest type: {0}")]
    UnsupportedManifestType(String),

    /// Repository name failed validation
    #[error("invalid repository name: {0}")]
    InvalidRepository(String),

    /// Upload session state did not permit the requested operation
    #[error("blob upload invalid: {0}")]
    UploadInvalid(String),

    /// Chunk bytes did not line up with the declared Content-Range
    #[error("range not satisfiable")]
    RangeNotSatisfiable,

    /// No route matched the request path
    #[error("not found")]
    RouteNotFound,

    /// Missing or unverifiable credentials
    #[error("authentication required")]
    Unauthorized {
        /// `WWW-Authenticate` challenge to send with the response, if any
        challenge: Option<String>,
    },

    /// Authenticated, but the identity lacks permission for this operation
    #[error("requested access to the resource is denied")]
    Denied,

    /// Storage backend failure
    #[error("storage error: {0}")]
    Storage(#[from] storage::StorageError),

    /// A persisted metadata record failed to encode or decode
    #[error("metadata record error: {0}")]
    Record(#[from] serde_json::Error),

    /// A response failed to assemble
    #[error("response error: {0}")]
    Http(#[from] axum::http::Error),

    /// Internal failure with no client-actionable detail
    #[error("internal error: {0}")]
    Internal(String),
}

impl RegistryError {
    /// The HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            RegistryError::NameUnknown(_)
            | RegistryError::ManifestUnknown(_)
            | RegistryError::BlobUnknown(_)
            | RegistryError::RouteNotFound => StatusCode::NOT_FOUND,
            RegistryError::InvalidDigest(_)
            | RegistryError::DigestMismatch { .. }
            | RegistryError::MissingDigest
            | RegistryError::InvalidManifest(_)
            | RegistryError::InvalidRepository(_)
            | RegistryError::UploadInvalid(_) => StatusCode::BAD_REQUEST,
            RegistryError::UnsupportedManifestType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            RegistryError::RangeNotSatisfiable => StatusCode::RANGE_NOT_SATISFIABLE,
            RegistryError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            RegistryError::Denied => StatusCode::FORBIDDEN,
            RegistryError::Storage(_)
            | RegistryError::Record(_)
            | RegistryError::Http(_)
            | RegistryError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The OCI error code for this error, when one applies.
    pub fn error_code(&self) -> Option<&'static str> {
        match self {
            RegistryError::NameUnknown(_) => Some("NAME_UNKNOWN"),
            RegistryError::ManifestUnknown(_) => Some("MANIFEST_UNKNOWN"),
            RegistryError::BlobUnknown(_) => Some("BLOB_UNKNOWN"),
            RegistryError::InvalidDigest(_)
            | RegistryError::DigestMismatch { .. }
            | RegistryError::MissingDigest => Some("DIGEST_INVALID"),
            RegistryError::InvalidManifest(_) | RegistryError::UnsupportedManifestType(_) => {
                Some("MANIFEST_INVALID")
            }
            RegistryError::InvalidRepository(_) => Some("NAME_INVALID"),
            RegistryError::UploadInvalid(_) => Some("BLOB_UPLOAD_INVALID"),
            RegistryError::Unauthorized { .. } => Some("UNAUTHORIZED"),
            RegistryError::Denied => Some("DENIED"),
            // 416 and plain 404 responses carry no structured body, and
            // backend failures must not leak internal detail.
            RegistryError::RangeNotSatisfiable
            | RegistryError::RouteNotFound
            | RegistryError::Storage(_)
            | RegistryError::Record(_)
            | RegistryError::Http(_)
            | RegistryError::Internal(_) => None,
        }
    }

    fn detail(&self) -> Option<String> {
        match self {
            RegistryError::NameUnknown(name) => Some(name.clone()),
            RegistryError::ManifestUnknown(reference) => Some(reference.clone()),
            RegistryError::BlobUnknown(digest) => Some(digest.clone()),
            RegistryError::DigestMismatch { expected, .. } => Some(expected.clone()),
            _ => None,
        }
    }
}

/// OCI error response body shape.
#[derive(Debug, serde::Serialize)]
struct ErrorResponse {
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, serde::Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
    detail: Option<String>,
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let mut response = match self.error_code() {
            Some(code) => {
                let body = ErrorResponse {
                    errors: vec![ErrorDetail {
                        code,
                        message: self.to_string(),
                        detail: self.detail(),
                    }],
                };
                (status, axum::Json(body)).into_response()
            }
            None => status.into_response(),
        };

        if let RegistryError::Unauthorized {
            challenge: Some(challenge),
        } = &self
        {
            if let Ok(value) = challenge.parse() {
                response
                    .headers_mut()
                    .insert(axum::http::header::WWW_AUTHENTICATE, value);
            }
        }

        response
            .headers_mut()
            .insert(API_VERSION_HEADER, HeaderValue::from_static(API_VERSION));

        response
    }
}
