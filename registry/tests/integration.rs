//! Integration tests for the OCI registry

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use http_body_util::BodyExt;
use registry::{AuthConfig, MetadataStore, RegistryBuilder, RepositoryPermission, User};
use serde_json::Value;
use sha2::{Digest, Sha256};
use storage::{MemoryDriver, Storage};
use tower::ServiceExt;

const MANIFEST_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

/// Helper to create a test registry without authentication
fn test_registry() -> axum::Router {
    let storage = MemoryDriver::with_buckets(&["test-registry"]);
    RegistryBuilder::new()
        .storage(storage.into())
        .bucket("test-registry")
        .build()
        .unwrap()
}

fn sha256(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

/// Push `data` as a blob through the monolithic POST-then-PUT flow and
/// return its digest.
async fn push_blob(app: &axum::Router, repo: &str, data: &[u8]) -> String {
    let digest = sha256(data);
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/v2/{repo}/blobs/uploads/"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let location = response.headers()[header::LOCATION].to_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(format!("{location}?digest={digest}"))
                .body(Body::from(data.to_vec()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    digest
}

/// Push a manifest and return its digest.
async fn push_manifest(app: &axum::Router, repo: &str, reference: &str, body: &[u8]) -> String {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(format!("/v2/{repo}/manifests/{reference}"))
                .header(header::CONTENT_TYPE, MANIFEST_TYPE)
                .body(Body::from(body.to_vec()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    response.headers()["docker-content-digest"]
        .to_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn test_api_version_check() {
    let app = test_registry();

    let response = app
        .oneshot(Request::builder().uri("/v2/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["docker-distribution-api-version"],
        "registry/2.0"
    );
}

#[tokio::test]
async fn test_unmatched_routes_are_not_found() {
    let app = test_registry();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/v2/some-repo")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        response.headers()["docker-distribution-api-version"],
        "registry/2.0"
    );
}

#[tokio::test]
async fn test_blob_upload_and_download() {
    let app = test_registry();
    let data = b"Hello, OCI Registry!";
    let digest = push_blob(&app, "test-repo", data).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/v2/test-repo/blobs/{digest}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["docker-content-digest"], digest.as_str());
    assert_eq!(body_bytes(response).await, data);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("HEAD")
                .uri(format!("/v2/test-repo/blobs/{digest}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_LENGTH],
        data.len().to_string().as_str()
    );
}

#[tokio::test]
async fn test_single_post_upload() {
    let app = test_registry();
    let data = b"one-shot blob";
    let digest = sha256(data);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/v2/repo/blobs/uploads/?digest={digest}"))
                .body(Body::from(data.to_vec()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(response.headers()["docker-content-digest"], digest.as_str());
}

#[tokio::test]
async fn test_chunked_upload() {
    let app = test_registry();
    let part_one = b"0123456789";
    let part_two = b"abcde";
    let digest = sha256(b"0123456789abcde");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v2/repo/blobs/uploads/")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(
        response.headers()["oci-chunk-min-length"],
        (1u64 << 24).to_string().as_str()
    );
    let location = response.headers()[header::LOCATION].to_str().unwrap().to_string();

    // First chunk, at the bare session location.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PATCH")
                .uri(&location)
                .header(header::CONTENT_RANGE, "0-9")
                .body(Body::from(part_one.to_vec()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(response.headers()[header::RANGE], "0-9");
    let location = response.headers()[header::LOCATION].to_str().unwrap().to_string();
    assert!(location.ends_with("/1_10"));

    // Second chunk, at the compound location the registry handed back.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PATCH")
                .uri(&location)
                .header(header::CONTENT_RANGE, "10-14")
                .body(Body::from(part_two.to_vec()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(response.headers()[header::RANGE], "0-14");
    let location = response.headers()[header::LOCATION].to_str().unwrap().to_string();

    // Finalize with an empty body; the digest covers the merged chunks.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(format!("{location}?digest={digest}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/v2/repo/blobs/{digest}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"0123456789abcde");
}

#[tokio::test]
async fn test_chunk_retransmission_is_rejected() {
    let app = test_registry();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v2/repo/blobs/uploads/")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let location = response.headers()[header::LOCATION].to_str().unwrap().to_string();

    for expected in [StatusCode::ACCEPTED, StatusCode::RANGE_NOT_SATISFIABLE] {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("PATCH")
                    .uri(&location)
                    .body(Body::from(&b"same chunk"[..]))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), expected);
    }
}

#[tokio::test]
async fn test_mismatched_content_range_is_rejected() {
    let app = test_registry();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v2/repo/blobs/uploads/")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let location = response.headers()[header::LOCATION].to_str().unwrap().to_string();

    // Ten bytes starting at zero cannot span 5-9.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PATCH")
                .uri(&location)
                .header(header::CONTENT_RANGE, "5-9")
                .body(Body::from(&b"0123456789"[..]))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
}

#[tokio::test]
async fn test_first_chunk_content_range_must_start_at_zero() {
    let app = test_registry();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v2/repo/blobs/uploads/")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let location = response.headers()[header::LOCATION].to_str().unwrap().to_string();

    // Off by one: ten bytes at offset zero are 0-9, never 1-10.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PATCH")
                .uri(&location)
                .header(header::CONTENT_RANGE, "1-10")
                .body(Body::from(&b"0123456789"[..]))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
}

#[tokio::test]
async fn test_upload_status_probe() {
    let app = test_registry();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v2/repo/blobs/uploads/")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let location = response.headers()[header::LOCATION].to_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PATCH")
                .uri(&location)
                .body(Body::from(&b"0123456789"[..]))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(&location)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(response.headers()[header::RANGE], "0-9");
    // The Location names the next chunk a resuming client should send.
    let resume = response.headers()[header::LOCATION].to_str().unwrap();
    assert!(resume.ends_with("/1_10"));
}

#[tokio::test]
async fn test_digest_mismatch_discards_the_upload() {
    let app = test_registry();
    let wrong = sha256(b"something else entirely");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v2/repo/blobs/uploads/")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let location = response.headers()[header::LOCATION].to_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PATCH")
                .uri(&location)
                .body(Body::from(&b"actual bytes"[..]))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(format!("{location}?digest={wrong}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["errors"][0]["code"], "DIGEST_INVALID");

    // Nothing became visible under the declared digest.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/v2/repo/blobs/{wrong}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_blob_mount_short_circuits() {
    let app = test_registry();
    let digest = push_blob(&app, "source", b"shared layer").await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!(
                    "/v2/target/blobs/uploads/?mount={digest}&from=source"
                ))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(response.headers()["docker-content-digest"], digest.as_str());
    // The mount points at the target repository, not the source.
    assert_eq!(
        response.headers()[header::LOCATION],
        format!("/v2/target/blobs/{digest}").as_str()
    );
}

fn manifest_body(layer_digest: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "schemaVersion": 2,
        "mediaType": MANIFEST_TYPE,
        "config": {"mediaType": "application/vnd.oci.image.config.v1+json", "digest": layer_digest, "size": 2},
        "layers": [{"mediaType": "application/octet-stream", "digest": layer_digest, "size": 2}]
    }))
    .unwrap()
}

#[tokio::test]
async fn test_manifest_push_and_pull() {
    let app = test_registry();
    let layer = push_blob(&app, "ns/app", b"xx").await;
    let body = manifest_body(&layer);
    let digest = push_manifest(&app, "ns/app", "latest", &body).await;
    assert_eq!(digest, sha256(&body));

    for reference in ["latest", digest.as_str()] {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/v2/ns/app/manifests/{reference}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["docker-content-digest"], digest.as_str());
        assert_eq!(response.headers()[header::CONTENT_TYPE], MANIFEST_TYPE);
        assert_eq!(body_bytes(response).await, body);
    }

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("HEAD")
                .uri("/v2/ns/app/manifests/latest")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_LENGTH],
        body.len().to_string().as_str()
    );

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/v2/ns/app/tags/list")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let tags = body_json(response).await;
    assert_eq!(tags["name"], "ns/app");
    assert_eq!(tags["tags"], serde_json::json!(["latest"]));
}

#[tokio::test]
async fn test_empty_manifest_is_rejected() {
    let app = test_registry();

    let response = app
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/v2/repo/manifests/latest")
                .header(header::CONTENT_TYPE, MANIFEST_TYPE)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["errors"][0]["code"], "MANIFEST_INVALID");
}

#[tokio::test]
async fn test_tag_moves_to_the_newest_manifest() {
    let app = test_registry();
    let first = push_manifest(&app, "repo", "latest", &manifest_body(&sha256(b"a"))).await;
    let second = push_manifest(&app, "repo", "latest", &manifest_body(&sha256(b"b"))).await;
    assert_ne!(first, second);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/v2/repo/manifests/latest")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.headers()["docker-content-digest"], second.as_str());

    // Exactly one manifest holds the tag.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/v2/repo/tags/list")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let tags = body_json(response).await;
    assert_eq!(tags["tags"], serde_json::json!(["latest"]));
}

#[tokio::test]
async fn test_version_annotation_becomes_the_tag_on_digest_push() {
    let app = test_registry();
    let body = serde_json::to_vec(&serde_json::json!({
        "schemaVersion": 2,
        "mediaType": MANIFEST_TYPE,
        "annotations": {"org.opencontainers.image.version": "1.2.3"}
    }))
    .unwrap();
    let digest = sha256(&body);
    push_manifest(&app, "repo", &digest, &body).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/v2/repo/tags/list")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let tags = body_json(response).await;
    assert_eq!(tags["tags"], serde_json::json!(["1.2.3"]));
}

#[tokio::test]
async fn test_tag_listing_pagination() {
    let app = test_registry();
    for tag in ["alpha", "beta", "gamma"] {
        let body = manifest_body(&sha256(tag.as_bytes()));
        push_manifest(&app, "repo", tag, &body).await;
    }

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/v2/repo/tags/list?n=2")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let tags = body_json(response).await;
    assert_eq!(tags["tags"].as_array().unwrap().len(), 2);

    // Keyset exclusion: only tags lexicographically after `beta` remain.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/v2/repo/tags/list?last=beta")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let tags = body_json(response).await;
    assert_eq!(tags["tags"], serde_json::json!(["gamma"]));
}

#[tokio::test]
async fn test_tag_listing_for_unknown_repository() {
    let app = test_registry();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/v2/missing/tags/list")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["errors"][0]["code"], "NAME_UNKNOWN");
}

#[tokio::test]
async fn test_referrers_listing_and_filter() {
    let app = test_registry();
    let subject_body = manifest_body(&sha256(b"base"));
    let subject_digest = sha256(&subject_body);
    push_manifest(&app, "repo", "base", &subject_body).await;

    let referrer = serde_json::to_vec(&serde_json::json!({
        "schemaVersion": 2,
        "mediaType": MANIFEST_TYPE,
        "artifactType": "application/vnd.example.sbom",
        "subject": {"mediaType": MANIFEST_TYPE, "digest": subject_digest, "size": subject_body.len()}
    }))
    .unwrap();
    let referrer_digest = sha256(&referrer);
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(format!("/v2/repo/manifests/{referrer_digest}"))
                .header(header::CONTENT_TYPE, MANIFEST_TYPE)
                .body(Body::from(referrer.clone()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(response.headers()["oci-subject"], subject_digest.as_str());

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/v2/repo/referrers/{subject_digest}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/vnd.oci.image.index.v1+json"
    );
    let index = body_json(response).await;
    assert_eq!(index["schemaVersion"], 2);
    assert_eq!(index["manifests"][0]["digest"], referrer_digest);

    // A non-matching filter empties the list and flags itself.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!(
                    "/v2/repo/referrers/{subject_digest}?artifactType=application/vnd.other"
                ))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.headers()["oci-filters-applied"], "artifactType");
    let index = body_json(response).await;
    assert_eq!(index["manifests"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_manifest_info() {
    let app = test_registry();
    let body = manifest_body(&sha256(b"layer"));
    let digest = push_manifest(&app, "repo", "v1", &body).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/v2/repo/manifests/v1/info")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let info = body_json(response).await;
    assert_eq!(info["digest"], digest);
    assert_eq!(info["tag"], "v1");
    assert_eq!(info["repositoryName"], "repo");
    assert_eq!(info["contentLength"], body.len() as u64);
}

#[tokio::test]
async fn test_delete_by_tag_removes_the_manifest() {
    let app = test_registry();
    let body = manifest_body(&sha256(b"layer"));
    let digest = push_manifest(&app, "repo", "v1", &body).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/v2/repo/manifests/v1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    // The record is gone under both the tag and the digest.
    for reference in ["v1", digest.as_str()] {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/v2/repo/manifests/{reference}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["errors"][0]["code"], "MANIFEST_UNKNOWN");
    }
}

#[tokio::test]
async fn test_blob_delete_is_keyed_on_the_record() {
    let app = test_registry();
    let digest = push_blob(&app, "repo", b"deletable layer").await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/v2/repo/blobs/{digest}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/v2/repo/blobs/{digest}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // A second delete finds no record and reports BLOB_UNKNOWN.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/v2/repo/blobs/{digest}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["errors"][0]["code"], "BLOB_UNKNOWN");
}

#[tokio::test]
async fn test_repository_listing_and_delete() {
    let app = test_registry();
    push_manifest(&app, "ns/app", "v1", &manifest_body(&sha256(b"x"))).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/v2/repositories")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let repositories = body_json(response).await;
    assert_eq!(repositories[0]["name"], "ns/app");
    assert_eq!(repositories[0]["tagCount"], 1);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/v2/ns/app")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/v2/ns/app/manifests/v1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["errors"][0]["code"], "NAME_UNKNOWN");
}

// --- authentication ---

/// Bcrypt cost for test fixtures; the default cost is far too slow here.
const TEST_COST: u32 = 4;

async fn seed_user(metadata: &MetadataStore, username: &str, roles: &[&str], allowed: &[&str]) {
    metadata
        .persist_user(&User {
            username: username.to_string(),
            password_hash: bcrypt::hash("s3cret", TEST_COST).unwrap(),
            email: None,
            enabled: true,
            roles: roles.iter().map(|s| s.to_string()).collect(),
            allowed_repositories: allowed.iter().map(|s| s.to_string()).collect(),
        })
        .await
        .unwrap();
}

/// Helper to create a registry with authentication plus seeded users.
async fn auth_registry(anonymous_pull: bool) -> (axum::Router, MetadataStore) {
    let storage: Storage = MemoryDriver::with_buckets(&["test-registry"]).into();
    let metadata = MetadataStore::new(storage.clone(), "test-registry");
    seed_user(&metadata, "admin", &["ADMIN"], &[]).await;
    seed_user(&metadata, "dev", &[], &["ns/app"]).await;

    let app = RegistryBuilder::new()
        .storage(storage)
        .bucket("test-registry")
        .auth(AuthConfig {
            anonymous_pull,
            ..Default::default()
        })
        .build()
        .unwrap();
    (app, metadata)
}

/// Fetch a bearer token from the token endpoint.
async fn fetch_token(
    app: &axum::Router,
    credentials: Option<(&str, &str)>,
    scope: Option<&str>,
) -> String {
    let uri = match scope {
        Some(scope) => format!("/v2/token?scope={scope}"),
        None => "/v2/token".to_string(),
    };
    let mut request = Request::builder().uri(uri);
    if let Some((username, password)) = credentials {
        let encoded = STANDARD.encode(format!("{username}:{password}"));
        request = request.header(header::AUTHORIZATION, format!("Basic {encoded}"));
    }
    let response = app
        .clone()
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    body["token"].as_str().unwrap().to_string()
}

fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

#[tokio::test]
async fn test_missing_token_is_challenged() {
    let (app, _) = auth_registry(false).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/v2/ns/app/manifests/latest")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let challenge = response.headers()[header::WWW_AUTHENTICATE].to_str().unwrap();
    assert!(challenge.contains("realm=\"/v2/token\""));
    assert!(challenge.contains("scope=\"repository:ns/app:pull,push\""));
}

#[tokio::test]
async fn test_bad_password_is_unauthorized() {
    let (app, _) = auth_registry(false).await;

    let encoded = STANDARD.encode("admin:wrong");
    let response = app
        .oneshot(
            Request::builder()
                .uri("/v2/token")
                .header(header::AUTHORIZATION, format!("Basic {encoded}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_token_can_push_anywhere() {
    let (app, _) = auth_registry(false).await;
    let token = fetch_token(&app, Some(("admin", "s3cret")), None).await;

    let response = app
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/v2/any/repo/manifests/latest")
                .header(header::AUTHORIZATION, bearer(&token))
                .header(header::CONTENT_TYPE, MANIFEST_TYPE)
                .body(Body::from(manifest_body(&sha256(b"x"))))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn test_anonymous_tokens_are_pull_only() {
    let (app, _) = auth_registry(true).await;

    // Seed content as admin first.
    let admin = fetch_token(&app, Some(("admin", "s3cret")), None).await;
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/v2/ns/app/manifests/latest")
                .header(header::AUTHORIZATION, bearer(&admin))
                .header(header::CONTENT_TYPE, MANIFEST_TYPE)
                .body(Body::from(manifest_body(&sha256(b"x"))))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let token = fetch_token(&app, None, Some("repository:ns/app:pull")).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/v2/ns/app/manifests/latest")
                .header(header::AUTHORIZATION, bearer(&token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/v2/ns/app/manifests/latest")
                .header(header::AUTHORIZATION, bearer(&token))
                .header(header::CONTENT_TYPE, MANIFEST_TYPE)
                .body(Body::from(manifest_body(&sha256(b"y"))))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_anonymous_pull_disabled_rejects_token_requests() {
    let (app, _) = auth_registry(false).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/v2/token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    // The token endpoint wants Basic credentials, not another bearer token.
    assert_eq!(
        response.headers()[header::WWW_AUTHENTICATE],
        "Basic realm=\"registry\""
    );
}

#[tokio::test]
async fn test_token_denied_for_inaccessible_repository() {
    let (app, _) = auth_registry(false).await;

    // dev's allow-list covers ns/app only.
    let encoded = STANDARD.encode("dev:s3cret");
    let response = app
        .oneshot(
            Request::builder()
                .uri("/v2/token?scope=repository:other/repo:pull")
                .header(header::AUTHORIZATION, format!("Basic {encoded}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_disabled_user_loses_access_immediately() {
    let (app, metadata) = auth_registry(false).await;
    let token = fetch_token(&app, Some(("admin", "s3cret")), None).await;

    let mut user = metadata.find_user("admin").await.unwrap().unwrap();
    user.enabled = false;
    metadata.persist_user(&user).await.unwrap();

    // The outstanding token no longer authorizes anything.
    let response = app
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/v2/ns/app/manifests/latest")
                .header(header::AUTHORIZATION, bearer(&token))
                .header(header::CONTENT_TYPE, MANIFEST_TYPE)
                .body(Body::from(manifest_body(&sha256(b"x"))))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_repository_delete_requires_a_push_grant() {
    let (app, _) = auth_registry(false).await;

    // Seed the repository as admin.
    let admin = fetch_token(&app, Some(("admin", "s3cret")), None).await;
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/v2/ns/app/manifests/latest")
                .header(header::AUTHORIZATION, bearer(&admin))
                .header(header::CONTENT_TYPE, MANIFEST_TYPE)
                .body(Body::from(manifest_body(&sha256(b"x"))))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    // A token without push actions may not delete the repository.
    let pull_only = fetch_token(&app, Some(("dev", "s3cret")), Some("repository:ns/app:pull")).await;
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/v2/ns/app")
                .header(header::AUTHORIZATION, bearer(&pull_only))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // With a push action in the token the delete goes through.
    let push = fetch_token(&app, Some(("dev", "s3cret")), Some("repository:ns/app:push")).await;
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/v2/ns/app")
                .header(header::AUTHORIZATION, bearer(&push))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_permission_grant_caps_actions() {
    let (app, metadata) = auth_registry(false).await;
    metadata
        .persist_permission(&RepositoryPermission {
            username: "dev".to_string(),
            repository_name: "ns/app".to_string(),
            can_pull: true,
            can_push: false,
        })
        .await
        .unwrap();

    // Seed content as admin.
    let admin = fetch_token(&app, Some(("admin", "s3cret")), None).await;
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/v2/ns/app/manifests/latest")
                .header(header::AUTHORIZATION, bearer(&admin))
                .header(header::CONTENT_TYPE, MANIFEST_TYPE)
                .body(Body::from(manifest_body(&sha256(b"x"))))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let token = fetch_token(&app, Some(("dev", "s3cret")), Some("repository:ns/app:pull,push")).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/v2/ns/app/manifests/latest")
                .header(header::AUTHORIZATION, bearer(&token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/v2/ns/app/manifests/v2")
                .header(header::AUTHORIZATION, bearer(&token))
                .header(header::CONTENT_TYPE, MANIFEST_TYPE)
                .body(Body::from(manifest_body(&sha256(b"y"))))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["errors"][0]["code"], "DENIED");
}

#[tokio::test]
async fn test_allow_list_denies_other_repositories() {
    let (app, _) = auth_registry(false).await;
    let token = fetch_token(&app, Some(("dev", "s3cret")), None).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/v2/other/repo/manifests/latest")
                .header(header::AUTHORIZATION, bearer(&token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
