//! API server builder and router
//!
//! The `/v2` surface cannot be routed with path templates because
//! repository names contain `/`; a catch-all route captures the tail and
//! [`crate::routes::resolve`] picks the operation. Only the version probe
//! and the token endpoint are routed statically.

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;

use crate::auth::{self, AuthConfig, Authenticator};
use crate::error::{RegistryError, API_VERSION, API_VERSION_HEADER};
use crate::metadata::MetadataStore;
use crate::routes::{resolve, Route};
use crate::storage::RegistryStorage;
use crate::{blob, manifest, referrers, repo, tags, token};

/// Uploads arrive fully buffered; cap request bodies at 1 GiB.
const MAX_BODY_BYTES: usize = 1 << 30;

/// Shared state behind every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    pub(crate) storage: RegistryStorage,
    pub(crate) metadata: MetadataStore,
    pub(crate) auth: Option<Arc<Authenticator>>,
}

/// Registry builder for configuring and creating the registry service
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    storage: Option<storage::Storage>,
    bucket: Option<String>,
    auth: Option<AuthConfig>,
}

impl RegistryBuilder {
    /// Create a new registry builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the storage backend
    pub fn storage(mut self, storage: storage::Storage) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Set the bucket name for storage
    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    /// Set the authentication configuration. Without one the registry is
    /// open, which is only appropriate for tests and local use.
    pub fn auth(mut self, auth: AuthConfig) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Build the registry service
    ///
    /// Returns a Router that can be served with any tower-compatible
    /// server. Generates the token signing key when authentication is
    /// configured, so this can be slow.
    pub fn build(self) -> Result<Router, RegistryError> {
        let storage = self.storage.expect("storage backend must be configured");
        let bucket = self.bucket.unwrap_or_else(|| "registry".to_string());

        let auth = match self.auth {
            Some(config) => config.build()?.map(Arc::new),
            None => None,
        };

        let state = AppState {
            storage: RegistryStorage::new(storage.clone(), bucket.clone()),
            metadata: MetadataStore::new(storage, bucket),
            auth,
        };

        Ok(Router::new()
            .route("/v2", get(api_version_check))
            .route("/v2/", get(api_version_check))
            .route("/v2/token", get(token_endpoint).post(token_endpoint))
            .route("/v2/{*path}", any(dispatch))
            .layer(middleware::from_fn_with_state(
                state.clone(),
                auth::authenticate,
            ))
            .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
            .with_state(state))
    }
}

/// Query parameters used across the `/v2` surface.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ApiParams {
    digest: Option<String>,
    mount: Option<String>,
    from: Option<String>,
    n: Option<usize>,
    last: Option<String>,
    scope: Option<String>,
    #[serde(rename = "artifactType")]
    artifact_type: Option<String>,
}

/// API version check endpoint
///
/// Returns 200 OK to indicate the registry is available
async fn api_version_check() -> Response {
    let mut response = (StatusCode::OK, Json(json!({}))).into_response();
    response.headers_mut().insert(
        API_VERSION_HEADER,
        axum::http::HeaderValue::from_static(API_VERSION),
    );
    response
}

async fn token_endpoint(
    State(state): State<AppState>,
    Query(params): Query<ApiParams>,
    headers: HeaderMap,
) -> Result<Response, RegistryError> {
    token::issue_token(&state, &headers, params.scope.as_deref()).await
}

/// Resolve and dispatch a `/v2/{...}` request.
async fn dispatch(
    State(state): State<AppState>,
    method: Method,
    Path(path): Path<String>,
    Query(params): Query<ApiParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, RegistryError> {
    let route = resolve(&method, &path).ok_or(RegistryError::RouteNotFound)?;
    tracing::debug!(%method, path, ?route, "dispatching");

    match route {
        Route::VersionProbe => Ok(api_version_check().await),
        Route::ListRepositories => repo::list_repositories(&state).await,
        Route::RepositoryDelete { name } => repo::delete_repository(&state, &name).await,

        Route::ManifestGet { name, reference } => {
            manifest::get_manifest(&state, &name, &reference).await
        }
        Route::ManifestHead { name, reference } => {
            manifest::head_manifest(&state, &name, &reference).await
        }
        Route::ManifestPut { name, reference } => {
            manifest::put_manifest(&state, &name, &reference, &headers, body).await
        }
        Route::ManifestDelete { name, reference } => {
            manifest::delete_manifest(&state, &name, &reference).await
        }
        Route::ManifestInfo { name, reference } => {
            manifest::manifest_info(&state, &name, &reference).await
        }

        Route::TagList { name } => {
            tags::list_tags(&state, &name, params.n, params.last.as_deref()).await
        }
        Route::Referrers { name, digest } => {
            referrers::list_referrers(&state, &name, &digest, params.artifact_type.as_deref())
                .await
        }

        Route::BlobGet { name, digest } => blob::get_blob(&state, &name, &digest).await,
        Route::BlobHead { name, digest } => blob::head_blob(&state, &name, &digest).await,
        Route::BlobDelete { name, digest } => blob::delete_blob(&state, &name, &digest).await,

        Route::UploadStart { name } => {
            blob::start_upload(
                &state,
                &name,
                params.digest.as_deref(),
                params.mount.as_deref(),
                params.from.as_deref(),
                body,
            )
            .await
        }
        Route::UploadChunk { name, uuid, chunk } => {
            blob::patch_chunk(&state, &name, &uuid, chunk, &headers, body).await
        }
        Route::UploadStatus { name, uuid } => blob::upload_status(&state, &name, &uuid).await,
        Route::UploadComplete { name, uuid, chunk } => {
            blob::finalize_upload(&state, &name, &uuid, chunk, params.digest.as_deref(), body)
                .await
        }
    }
}
