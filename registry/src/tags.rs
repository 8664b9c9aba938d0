//! Tag listing

use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::api::AppState;
use crate::error::RegistryResult;
use crate::repo::require_repository;

const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Debug, Serialize)]
struct TagList {
    name: String,
    tags: Vec<String>,
}

/// `GET /v2/{name}/tags/list?n=...&last=...`
///
/// Keyset pagination: `last` excludes tags lexicographically at or before
/// it, `n` caps the page size. Tags are ordered by most recent update.
pub async fn list_tags(
    state: &AppState,
    name: &str,
    n: Option<usize>,
    last: Option<&str>,
) -> RegistryResult<Response> {
    require_repository(state, name).await?;

    let mut tagged: Vec<_> = state
        .metadata
        .list_manifests(name)
        .await?
        .into_iter()
        .filter_map(|manifest| manifest.tag.map(|tag| (tag, manifest.updated_at)))
        .filter(|(tag, _)| last.is_none_or(|last| tag.as_str() > last))
        .collect();

    tagged.sort_by(|a, b| b.1.cmp(&a.1));
    tagged.truncate(n.unwrap_or(DEFAULT_PAGE_SIZE));

    Ok(Json(TagList {
        name: name.to_string(),
        tags: tagged.into_iter().map(|(tag, _)| tag).collect(),
    })
    .into_response())
}
