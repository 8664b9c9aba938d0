//! Blob pulls and the resumable upload state machine
//!
//! Uploads are sessions of indexed chunks. A session starts with a POST
//! (returning the session id), receives chunks via PATCH carrying a
//! compound `{index}_{startBytes}` path argument, and is finalized by a PUT
//! with the client's digest. The finalize step merges the chunks in index
//! order and verifies the digest server-side before any blob becomes
//! visible; a mismatch discards the whole session.

use axum::body::Body;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use chrono::Utc;
use uuid::Uuid;

use crate::api::AppState;
use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};
use crate::headers::{
    CHUNK_MIN_BYTES, DOCKER_CONTENT_DIGEST, DOCKER_UPLOAD_UUID, OCI_CHUNK_MIN_LENGTH,
};
use crate::models::BlobRecord;
use crate::repo::{ensure_repository, require_repository};

/// Persist a blob record if none exists yet. Blobs are content-addressed,
/// so concurrent writers of the same digest converge on the same record.
async fn record_blob(state: &AppState, digest: &Digest, size: u64) -> RegistryResult<()> {
    if state.metadata.find_blob(digest.as_str()).await?.is_none() {
        state
            .metadata
            .persist_blob(&BlobRecord {
                digest: digest.to_string(),
                content_length: size,
                media_type: None,
                created_at: Utc::now(),
            })
            .await?;
    }
    Ok(())
}

fn created_response(name: &str, digest: &Digest) -> RegistryResult<Response> {
    Ok(Response::builder()
        .status(StatusCode::CREATED)
        .header(header::LOCATION, format!("/v2/{name}/blobs/{digest}"))
        .header(DOCKER_CONTENT_DIGEST, digest.as_str())
        .header(OCI_CHUNK_MIN_LENGTH, CHUNK_MIN_BYTES)
        .body(Body::empty())?)
}

/// The Content-Range value a chunk starting at `start` must declare.
fn expected_content_range(start: u64, len: usize) -> Option<String> {
    if len == 0 {
        return None;
    }
    Some(format!("{start}-{}", start + len as u64 - 1))
}

/// `POST /v2/{name}/blobs/uploads/`
///
/// Three shapes: a cross-repository mount (`?mount=...&from=...`), a
/// single-request monolithic push (`?digest=...` with the body), or opening
/// a chunked session (no parameters).
pub async fn start_upload(
    state: &AppState,
    name: &str,
    digest: Option<&str>,
    mount: Option<&str>,
    from: Option<&str>,
    body: Bytes,
) -> RegistryResult<Response> {
    ensure_repository(state, name).await?;

    if let Some(mount) = mount {
        let mount = Digest::parse(mount)?;
        if state.storage.blob_exists(&mount).await? {
            // `from` is a hint only; the blob is content-addressed and the
            // response always points at the target repository.
            tracing::debug!(repository = name, source = ?from, digest = %mount, "mounted existing blob");
            return created_response(name, &mount);
        }
        // Nothing to mount; fall through and open a session.
    }

    if let Some(digest) = digest {
        let expected = Digest::parse(digest)?;
        let actual = Digest::compute(&body);
        if actual != expected {
            return Err(RegistryError::DigestMismatch {
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }
        state.storage.put_blob(&expected, &body).await?;
        record_blob(state, &expected, body.len() as u64).await?;
        return created_response(name, &expected);
    }

    let uuid = Uuid::new_v4();
    Ok(Response::builder()
        .status(StatusCode::ACCEPTED)
        .header(
            header::LOCATION,
            format!("/v2/{name}/blobs/uploads/{uuid}"),
        )
        .header(DOCKER_UPLOAD_UUID, uuid.to_string())
        .header(header::RANGE, "0-0")
        .header(OCI_CHUNK_MIN_LENGTH, CHUNK_MIN_BYTES)
        .body(Body::empty())?)
}

/// `PATCH /v2/{name}/blobs/uploads/{uuid}/{index}_{startBytes}`
///
/// Stores one chunk. Retransmitting a chunk index that already holds bytes
/// is rejected with 416, as is a Content-Range that disagrees with the
/// declared start offset and the body length.
pub async fn patch_chunk(
    state: &AppState,
    name: &str,
    uuid: &str,
    chunk: Option<(u32, u64)>,
    headers: &HeaderMap,
    body: Bytes,
) -> RegistryResult<Response> {
    require_repository(state, name).await?;
    let (index, start) = chunk.unwrap_or((0, 0));

    if state
        .storage
        .chunk_size(uuid, index)
        .await?
        .is_some_and(|size| size > 0)
    {
        tracing::debug!(uuid, index, "rejecting retransmitted chunk");
        return Err(RegistryError::RangeNotSatisfiable);
    }

    if let Some(declared) = headers.get(header::CONTENT_RANGE) {
        let expected = expected_content_range(start, body.len());
        if declared.to_str().ok() != expected.as_deref() {
            return Err(RegistryError::RangeNotSatisfiable);
        }
    }

    state.storage.put_chunk(uuid, index, &body).await?;
    let end = start + body.len() as u64;

    Ok(Response::builder()
        .status(StatusCode::ACCEPTED)
        .header(
            header::LOCATION,
            format!("/v2/{name}/blobs/uploads/{uuid}/{}_{end}", index + 1),
        )
        .header(DOCKER_UPLOAD_UUID, uuid)
        .header(header::RANGE, format!("0-{}", end.saturating_sub(1)))
        .header(OCI_CHUNK_MIN_LENGTH, CHUNK_MIN_BYTES)
        .body(Body::empty())?)
}

/// `GET /v2/{name}/blobs/uploads/{uuid}` resume-status probe.
///
/// The Location names the next chunk a resuming client should send.
pub async fn upload_status(state: &AppState, name: &str, uuid: &str) -> RegistryResult<Response> {
    require_repository(state, name).await?;
    let (next, received) = state.storage.upload_progress(uuid).await?;

    Ok(Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header(
            header::LOCATION,
            format!("/v2/{name}/blobs/uploads/{uuid}/{next}_{received}"),
        )
        .header(DOCKER_UPLOAD_UUID, uuid)
        .header(header::RANGE, format!("0-{}", received.saturating_sub(1)))
        .header(OCI_CHUNK_MIN_LENGTH, CHUNK_MIN_BYTES)
        .body(Body::empty())?)
}

/// `PUT /v2/{name}/blobs/uploads/{uuid}[/{index}_{startBytes}]?digest=...`
///
/// Finalizes an upload session. A non-empty body is stored as the final
/// chunk first; the session's chunks are then merged in index order and
/// the result must hash to the digest the client declared.
pub async fn finalize_upload(
    state: &AppState,
    name: &str,
    uuid: &str,
    chunk: Option<(u32, u64)>,
    digest: Option<&str>,
    body: Bytes,
) -> RegistryResult<Response> {
    let digest = digest.ok_or(RegistryError::MissingDigest)?;
    let expected = Digest::parse(digest)?;
    ensure_repository(state, name).await?;

    let size = if body.is_empty() {
        let (next, _) = state.storage.upload_progress(uuid).await?;
        if next > 0 {
            state.storage.merge_chunks(uuid, &expected).await?.len()
        } else if state.storage.blob_exists(&expected).await? {
            // Already finalized; the retry is idempotent.
            state.storage.get_blob(&expected).await?.len()
        } else {
            return Err(RegistryError::UploadInvalid(uuid.to_string()));
        }
    } else {
        match chunk {
            Some((index, _)) => {
                state.storage.put_chunk(uuid, index, &body).await?;
                state.storage.merge_chunks(uuid, &expected).await?.len()
            }
            None => {
                let (next, _) = state.storage.upload_progress(uuid).await?;
                if next > 0 {
                    state.storage.put_chunk(uuid, next, &body).await?;
                    state.storage.merge_chunks(uuid, &expected).await?.len()
                } else {
                    let actual = Digest::compute(&body);
                    if actual != expected {
                        return Err(RegistryError::DigestMismatch {
                            expected: expected.to_string(),
                            actual: actual.to_string(),
                        });
                    }
                    state.storage.put_blob(&expected, &body).await?;
                    body.len()
                }
            }
        }
    };

    record_blob(state, &expected, size as u64).await?;
    tracing::info!(repository = name, digest = %expected, size, "blob upload complete");
    created_response(name, &expected)
}

/// `GET /v2/{name}/blobs/{digest}`
pub async fn get_blob(state: &AppState, name: &str, digest: &str) -> RegistryResult<Response> {
    let digest = Digest::parse(digest)?;
    require_repository(state, name).await?;

    let record = state.metadata.find_blob(digest.as_str()).await?;
    let data = state.storage.get_blob(&digest).await?;
    let media_type = record
        .and_then(|record| record.media_type)
        .unwrap_or_else(|| "application/octet-stream".to_string());

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, media_type)
        .header(DOCKER_CONTENT_DIGEST, digest.as_str())
        .body(Body::from(data))?)
}

/// `HEAD /v2/{name}/blobs/{digest}`
pub async fn head_blob(state: &AppState, name: &str, digest: &str) -> RegistryResult<Response> {
    let digest = Digest::parse(digest)?;
    require_repository(state, name).await?;

    let length = match state.metadata.find_blob(digest.as_str()).await? {
        Some(record) => record.content_length,
        None => state.storage.get_blob(&digest).await?.len() as u64,
    };

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_LENGTH, length)
        .header(DOCKER_CONTENT_DIGEST, digest.as_str())
        .body(Body::empty())?)
}

/// `DELETE /v2/{name}/blobs/{digest}`
pub async fn delete_blob(state: &AppState, name: &str, digest: &str) -> RegistryResult<Response> {
    let digest = Digest::parse(digest)?;
    require_repository(state, name).await?;

    // The metadata record decides existence; byte deletion is idempotent
    // so the two can never disagree afterwards.
    if state.metadata.find_blob(digest.as_str()).await?.is_none() {
        return Err(RegistryError::BlobUnknown(digest.to_string()));
    }
    state.storage.delete_blob(&digest).await?;
    state.metadata.delete_blob(digest.as_str()).await?;

    Ok(Response::builder()
        .status(StatusCode::ACCEPTED)
        .body(Body::empty())?)
}
