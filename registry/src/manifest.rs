//! Manifest push, pull and delete
//!
//! The raw body bytes are authoritative: they are stored verbatim and the
//! digest is always computed server-side from them, never taken from the
//! client. A tag names at most one live manifest per repository; pushing a
//! tag that already points elsewhere moves it and untags the prior holder.

use std::collections::BTreeMap;

use axum::body::Body;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::api::AppState;
use crate::digest::{is_digest_reference, Digest};
use crate::error::{RegistryError, RegistryResult};
use crate::headers::{DOCKER_CONTENT_DIGEST, OCI_SUBJECT};
use crate::models::{
    Descriptor, ManifestDocument, ManifestRecord, VERSION_ANNOTATION,
};
use crate::repo::{ensure_repository, require_repository};

const DEFAULT_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";

/// Manifests are JSON documents; any non-JSON content type is rejected
/// before the body is inspected.
fn validate_media_type(media_type: &str) -> RegistryResult<()> {
    if media_type.contains("json") {
        Ok(())
    } else {
        Err(RegistryError::UnsupportedManifestType(
            media_type.to_string(),
        ))
    }
}

/// Resolve a tag or digest reference to its manifest record.
async fn resolve_manifest(
    state: &AppState,
    name: &str,
    reference: &str,
) -> RegistryResult<ManifestRecord> {
    let record = if is_digest_reference(reference) {
        let digest = Digest::parse(reference)?;
        state
            .metadata
            .find_manifest_by_digest(name, digest.as_str())
            .await?
    } else {
        state.metadata.find_manifest_by_tag(name, reference).await?
    };
    record.ok_or_else(|| RegistryError::ManifestUnknown(reference.to_string()))
}

/// Move `tag` off whichever manifest currently holds it, other than
/// `keep_digest`.
async fn untag_prior_holder(
    state: &AppState,
    name: &str,
    tag: &str,
    keep_digest: &str,
) -> RegistryResult<()> {
    if let Some(mut holder) = state.metadata.find_manifest_by_tag(name, tag).await? {
        if holder.digest != keep_digest {
            tracing::debug!(repository = name, tag, from = %holder.digest, "moving tag");
            holder.tag = None;
            holder.updated_at = Utc::now();
            state.metadata.persist_manifest(&holder).await?;
        }
    }
    Ok(())
}

fn put_response(
    name: &str,
    digest: &Digest,
    subject: Option<&Descriptor>,
) -> RegistryResult<Response> {
    let mut builder = Response::builder()
        .status(StatusCode::CREATED)
        .header(
            header::LOCATION,
            format!("/v2/{name}/manifests/{digest}"),
        )
        .header(DOCKER_CONTENT_DIGEST, digest.as_str());
    if let Some(subject_digest) = subject.and_then(|subject| subject.digest.as_deref()) {
        builder = builder.header(OCI_SUBJECT, subject_digest);
    }
    Ok(builder.body(Body::empty())?)
}

/// `PUT /v2/{name}/manifests/{reference}`
pub async fn put_manifest(
    state: &AppState,
    name: &str,
    reference: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> RegistryResult<Response> {
    if body.is_empty() {
        return Err(RegistryError::InvalidManifest("empty body".to_string()));
    }

    let mut repository = ensure_repository(state, name).await?;
    let digest = Digest::compute(&body);
    let document = ManifestDocument::parse(&body);

    let media_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| document.media_type.clone())
        .unwrap_or_else(|| DEFAULT_MEDIA_TYPE.to_string());
    validate_media_type(&media_type)?;

    if let Some(mut existing) = state
        .metadata
        .find_manifest_by_digest(name, digest.as_str())
        .await?
    {
        // Same content pushed again; only the tag pointer can change.
        if !is_digest_reference(reference) && existing.tag.as_deref() != Some(reference) {
            untag_prior_holder(state, name, reference, digest.as_str()).await?;
            existing.tag = Some(reference.to_string());
            existing.updated_at = Utc::now();
            state.metadata.persist_manifest(&existing).await?;
        }
        return put_response(name, &digest, existing.subject.as_ref());
    }

    let tag = if is_digest_reference(reference) {
        document.annotations.get(VERSION_ANNOTATION).cloned()
    } else {
        Some(reference.to_string())
    };
    if let Some(tag) = &tag {
        untag_prior_holder(state, name, tag, digest.as_str()).await?;
    }

    let now = Utc::now();
    let record = ManifestRecord {
        repository_name: name.to_string(),
        digest: digest.to_string(),
        media_type,
        artifact_type: document.artifact_type.clone(),
        content: body.to_vec(),
        content_length: body.len() as u64,
        tag,
        subject: document.subject.clone(),
        annotations: (!document.annotations.is_empty()).then(|| document.annotations.clone()),
        config_digest: document.config.as_ref().and_then(|c| c.digest.clone()),
        layer_digests: document
            .layers
            .iter()
            .filter_map(|layer| layer.digest.clone())
            .collect(),
        created_at: now,
        updated_at: now,
    };
    state.metadata.persist_manifest(&record).await?;

    repository.touch();
    state.metadata.persist_repository(&repository).await?;
    tracing::info!(repository = name, digest = %digest, reference, "manifest pushed");

    put_response(name, &digest, record.subject.as_ref())
}

/// `GET /v2/{name}/manifests/{reference}`
pub async fn get_manifest(
    state: &AppState,
    name: &str,
    reference: &str,
) -> RegistryResult<Response> {
    require_repository(state, name).await?;
    let record = resolve_manifest(state, name, reference).await?;

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, record.media_type)
        .header(DOCKER_CONTENT_DIGEST, record.digest)
        .body(Body::from(record.content))?)
}

/// `HEAD /v2/{name}/manifests/{reference}`
pub async fn head_manifest(
    state: &AppState,
    name: &str,
    reference: &str,
) -> RegistryResult<Response> {
    require_repository(state, name).await?;
    let record = resolve_manifest(state, name, reference).await?;

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, record.media_type)
        .header(header::CONTENT_LENGTH, record.content_length)
        .header(DOCKER_CONTENT_DIGEST, record.digest)
        .body(Body::empty())?)
}

/// `DELETE /v2/{name}/manifests/{reference}`
///
/// The reference, tag or digest, resolves to a record and that record is
/// deleted outright.
pub async fn delete_manifest(
    state: &AppState,
    name: &str,
    reference: &str,
) -> RegistryResult<Response> {
    require_repository(state, name).await?;
    let record = resolve_manifest(state, name, reference).await?;
    state.metadata.delete_manifest(name, &record.digest).await?;
    tracing::info!(repository = name, digest = %record.digest, reference, "manifest deleted");

    Ok(Response::builder()
        .status(StatusCode::ACCEPTED)
        .body(Body::empty())?)
}

/// Metadata view of a manifest, without the raw content.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ManifestInfo {
    repository_name: String,
    digest: String,
    media_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    artifact_type: Option<String>,
    content_length: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    subject: Option<Descriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    annotations: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    config_digest: Option<String>,
    layer_digests: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// `GET /v2/{name}/manifests/{reference}/info`
pub async fn manifest_info(
    state: &AppState,
    name: &str,
    reference: &str,
) -> RegistryResult<Response> {
    require_repository(state, name).await?;
    let record = resolve_manifest(state, name, reference).await?;

    Ok(Json(ManifestInfo {
        repository_name: record.repository_name,
        digest: record.digest,
        media_type: record.media_type,
        artifact_type: record.artifact_type,
        content_length: record.content_length,
        tag: record.tag,
        subject: record.subject,
        annotations: record.annotations,
        config_digest: record.config_digest,
        layer_digests: record.layer_digests,
        created_at: record.created_at,
        updated_at: record.updated_at,
    })
    .into_response())
}
