//! Referrers listing
//!
//! Manifests that declare a `subject` form edges of a referrers graph. The
//! listing for a digest returns every manifest in the repository whose
//! subject points at it, rendered as an OCI image index.

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::Response;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::api::AppState;
use crate::digest::Digest;
use crate::error::RegistryResult;
use crate::headers::OCI_FILTERS_APPLIED;
use crate::repo::require_repository;

const IMAGE_INDEX_MEDIA_TYPE: &str = "application/vnd.oci.image.index.v1+json";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReferrerDescriptor {
    media_type: String,
    digest: String,
    size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    artifact_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    annotations: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReferrersIndex {
    schema_version: u32,
    media_type: &'static str,
    manifests: Vec<ReferrerDescriptor>,
}

/// `GET /v2/{name}/referrers/{digest}?artifactType=...`
pub async fn list_referrers(
    state: &AppState,
    name: &str,
    digest: &str,
    artifact_type: Option<&str>,
) -> RegistryResult<Response> {
    let digest = Digest::parse(digest)?;
    require_repository(state, name).await?;

    let manifests = state
        .metadata
        .list_manifests(name)
        .await?
        .into_iter()
        .filter(|manifest| {
            manifest
                .subject
                .as_ref()
                .and_then(|subject| subject.digest.as_deref())
                == Some(digest.as_str())
        })
        .filter(|manifest| {
            artifact_type.is_none_or(|filter| manifest.artifact_type.as_deref() == Some(filter))
        })
        .map(|manifest| ReferrerDescriptor {
            media_type: manifest.media_type,
            digest: manifest.digest,
            size: manifest.content_length,
            artifact_type: manifest.artifact_type,
            annotations: manifest.annotations,
        })
        .collect();

    let index = ReferrersIndex {
        schema_version: 2,
        media_type: IMAGE_INDEX_MEDIA_TYPE,
        manifests,
    };

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, IMAGE_INDEX_MEDIA_TYPE);
    if artifact_type.is_some() {
        builder = builder.header(OCI_FILTERS_APPLIED, "artifactType");
    }
    Ok(builder.body(Body::from(serde_json::to_vec(&index)?))?)
}
