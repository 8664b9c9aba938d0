//! Repository lifecycle: validation, lazy creation, listing and deletion

use axum::body::Body;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::api::AppState;
use crate::error::{RegistryError, RegistryResult};
use crate::models::Repository;

/// Validate a repository name: non-empty slash-separated segments of
/// lowercase alphanumerics plus `.`, `_` and `-`, each starting with an
/// alphanumeric.
pub fn validate_name(name: &str) -> RegistryResult<()> {
    let valid = !name.is_empty()
        && name.split('/').all(|segment| {
            segment
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
                && segment
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "._-".contains(c))
        });
    if valid {
        Ok(())
    } else {
        Err(RegistryError::InvalidRepository(name.to_string()))
    }
}

/// Load a repository, creating the record on first use. Pushes create
/// repositories lazily; there is no explicit create operation.
pub async fn ensure_repository(state: &AppState, name: &str) -> RegistryResult<Repository> {
    validate_name(name)?;
    if let Some(repository) = state.metadata.find_repository(name).await? {
        return Ok(repository);
    }
    tracing::info!(repository = name, "creating repository");
    let repository = Repository::new(name);
    state.metadata.persist_repository(&repository).await?;
    Ok(repository)
}

/// Load a repository that must already exist.
pub async fn require_repository(state: &AppState, name: &str) -> RegistryResult<Repository> {
    state
        .metadata
        .find_repository(name)
        .await?
        .ok_or_else(|| RegistryError::NameUnknown(name.to_string()))
}

/// One entry of the registry-wide repository listing.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RepositorySummary {
    name: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    tag_count: usize,
}

/// `GET /v2/repositories`
pub async fn list_repositories(state: &AppState) -> RegistryResult<Response> {
    let mut repositories = state.metadata.list_repositories().await?;
    repositories.sort_by(|a, b| a.name.cmp(&b.name));

    let mut summaries = Vec::with_capacity(repositories.len());
    for repository in repositories {
        let tag_count = state.metadata.count_tagged(&repository.name).await?;
        summaries.push(RepositorySummary {
            name: repository.name,
            created_at: repository.created_at,
            updated_at: repository.updated_at,
            tag_count,
        });
    }

    Ok(Json(summaries).into_response())
}

/// `DELETE /v2/{name}`
///
/// Removes the repository record and all of its manifest records. Blob
/// bytes are content-addressed registry-wide and stay behind; other
/// repositories may still reference them.
pub async fn delete_repository(state: &AppState, name: &str) -> RegistryResult<Response> {
    require_repository(state, name).await?;

    for manifest in state.metadata.list_manifests(name).await? {
        state.metadata.delete_manifest(name, &manifest.digest).await?;
    }
    state.metadata.delete_repository(name).await?;
    tracing::info!(repository = name, "deleted repository");

    Ok(Response::builder()
        .status(StatusCode::ACCEPTED)
        .body(Body::empty())?)
}
