//! Path resolution for the `/v2` API surface
//!
//! OCI repository names legally contain `/`, so the API cannot be matched
//! with template-style route patterns. Instead the catch-all tail after
//! `/v2/` is split at the rightmost occurrence of a reserved sub-resource
//! marker (`/manifests/`, `/blobs/`, `/tags/`, `/referrers/`): everything to
//! the left is the repository name, everything to the right is the
//! sub-resource argument. Resolution here is pure and independent of the
//! HTTP framework so it can be tested directly.

use axum::http::Method;

const MANIFESTS: &str = "/manifests/";
const BLOBS: &str = "/blobs/";
const TAGS: &str = "/tags/";
const REFERRERS: &str = "/referrers/";
const UPLOADS: &str = "uploads/";

/// A resolved `/v2` route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// `GET /v2/` version probe.
    VersionProbe,
    /// `GET /v2/repositories` registry-wide listing.
    ListRepositories,
    /// `GET /v2/{name}/manifests/{reference}`.
    ManifestGet {
        /// Repository name.
        name: String,
        /// Tag or digest reference.
        reference: String,
    },
    /// `HEAD /v2/{name}/manifests/{reference}`.
    ManifestHead {
        /// Repository name.
        name: String,
        /// Tag or digest reference.
        reference: String,
    },
    /// `PUT /v2/{name}/manifests/{reference}`.
    ManifestPut {
        /// Repository name.
        name: String,
        /// Tag or digest reference.
        reference: String,
    },
    /// `DELETE /v2/{name}/manifests/{reference}`.
    ManifestDelete {
        /// Repository name.
        name: String,
        /// Tag or digest reference.
        reference: String,
    },
    /// `GET /v2/{name}/manifests/{reference}/info` (non-standard).
    ManifestInfo {
        /// Repository name.
        name: String,
        /// Tag or digest reference.
        reference: String,
    },
    /// `GET /v2/{name}/tags/list`.
    TagList {
        /// Repository name.
        name: String,
    },
    /// `GET /v2/{name}/blobs/{digest}`.
    BlobGet {
        /// Repository name.
        name: String,
        /// Blob digest.
        digest: String,
    },
    /// `HEAD /v2/{name}/blobs/{digest}`.
    BlobHead {
        /// Repository name.
        name: String,
        /// Blob digest.
        digest: String,
    },
    /// `DELETE /v2/{name}/blobs/{digest}`.
    BlobDelete {
        /// Repository name.
        name: String,
        /// Blob digest.
        digest: String,
    },
    /// `POST /v2/{name}/blobs/uploads/`.
    UploadStart {
        /// Repository name.
        name: String,
    },
    /// `PATCH /v2/{name}/blobs/uploads/{uuid}[/{index}_{start}]`.
    UploadChunk {
        /// Repository name.
        name: String,
        /// Upload session id.
        uuid: String,
        /// Chunk index and starting byte offset, when the compound path
        /// argument is present.
        chunk: Option<(u32, u64)>,
    },
    /// `GET /v2/{name}/blobs/uploads/{uuid}/` resume-status probe.
    UploadStatus {
        /// Repository name.
        name: String,
        /// Upload session id.
        uuid: String,
    },
    /// `PUT`/`POST` finalizing an upload session.
    UploadComplete {
        /// Repository name.
        name: String,
        /// Upload session id.
        uuid: String,
        /// Final chunk index and starting byte offset for chunk-aware
        /// finalization.
        chunk: Option<(u32, u64)>,
    },
    /// `GET /v2/{name}[/_oci]/referrers/{digest}`.
    Referrers {
        /// Repository name.
        name: String,
        /// Subject digest being queried.
        digest: String,
    },
    /// `DELETE /v2/{name}` repository delete.
    RepositoryDelete {
        /// Repository name.
        name: String,
    },
}

/// Split `path` at the rightmost occurrence of `marker`, returning the
/// repository name on the left and the sub-resource argument on the right.
fn split_at_marker<'p>(path: &'p str, marker: &str) -> Option<(&'p str, &'p str)> {
    let index = path.rfind(marker)?;
    Some((&path[..index], &path[index + marker.len()..]))
}

/// Parse the compound `{index}_{startBytes}` upload path argument.
fn parse_chunk(arg: &str) -> Option<(u32, u64)> {
    let (index, start) = arg.split_once('_')?;
    Some((index.parse().ok()?, start.parse().ok()?))
}

/// Resolve a request to a route, or `None` for a 404.
///
/// `path` is the decoded tail after `/v2/`, without a leading slash.
pub fn resolve(method: &Method, path: &str) -> Option<Route> {
    match *method {
        Method::GET => resolve_get(path),
        Method::HEAD => resolve_head(path),
        Method::PUT => resolve_put(path),
        Method::POST => resolve_post(path),
        Method::PATCH => resolve_patch(path),
        Method::DELETE => resolve_delete(path),
        _ => None,
    }
}

fn resolve_get(path: &str) -> Option<Route> {
    match path {
        "" => return Some(Route::VersionProbe),
        "repositories" => return Some(Route::ListRepositories),
        _ => {}
    }

    if let Some((name, suffix)) = split_at_marker(path, MANIFESTS) {
        if !suffix.contains('/') {
            return Some(Route::ManifestGet {
                name: name.to_string(),
                reference: suffix.to_string(),
            });
        }
        if let Some(reference) = suffix.strip_suffix("/info") {
            if !reference.contains('/') {
                return Some(Route::ManifestInfo {
                    name: name.to_string(),
                    reference: reference.to_string(),
                });
            }
        }
    }

    if let Some((name, suffix)) = split_at_marker(path, TAGS) {
        if suffix == "list" {
            return Some(Route::TagList {
                name: name.to_string(),
            });
        }
    }

    if let Some((name, suffix)) = split_at_marker(path, BLOBS) {
        if let Some(rest) = suffix.strip_prefix(UPLOADS) {
            let uuid = rest.strip_suffix('/').unwrap_or(rest);
            if !uuid.is_empty() && !uuid.contains('/') {
                return Some(Route::UploadStatus {
                    name: name.to_string(),
                    uuid: uuid.to_string(),
                });
            }
        }
        return Some(Route::BlobGet {
            name: name.to_string(),
            digest: suffix.to_string(),
        });
    }

    if let Some((name, digest)) = split_at_marker(path, REFERRERS) {
        let name = name.strip_suffix("/_oci").unwrap_or(name);
        if !digest.is_empty() {
            return Some(Route::Referrers {
                name: name.to_string(),
                digest: digest.to_string(),
            });
        }
    }

    None
}

fn resolve_head(path: &str) -> Option<Route> {
    if let Some((name, suffix)) = split_at_marker(path, MANIFESTS) {
        if !suffix.contains('/') {
            return Some(Route::ManifestHead {
                name: name.to_string(),
                reference: suffix.to_string(),
            });
        }
    }

    if let Some((name, suffix)) = split_at_marker(path, BLOBS) {
        return Some(Route::BlobHead {
            name: name.to_string(),
            digest: suffix.to_string(),
        });
    }

    None
}

fn resolve_post(path: &str) -> Option<Route> {
    let (name, suffix) = split_at_marker(path, BLOBS)?;

    if suffix == "uploads" || suffix == "uploads/" {
        return Some(Route::UploadStart {
            name: name.to_string(),
        });
    }

    if let Some(uuid) = suffix.strip_prefix(UPLOADS) {
        if !uuid.is_empty() && !uuid.contains('/') {
            return Some(Route::UploadComplete {
                name: name.to_string(),
                uuid: uuid.to_string(),
                chunk: None,
            });
        }
    }

    None
}

fn resolve_put(path: &str) -> Option<Route> {
    if let Some((name, suffix)) = split_at_marker(path, MANIFESTS) {
        if !suffix.contains('/') {
            return Some(Route::ManifestPut {
                name: name.to_string(),
                reference: suffix.to_string(),
            });
        }
    }

    if let Some((name, suffix)) = split_at_marker(path, BLOBS) {
        if let Some(rest) = suffix.strip_prefix(UPLOADS) {
            if !rest.is_empty() && !rest.contains('/') {
                return Some(Route::UploadComplete {
                    name: name.to_string(),
                    uuid: rest.to_string(),
                    chunk: None,
                });
            }
            if let Some((uuid, arg)) = rest.split_once('/') {
                if !uuid.is_empty() && !arg.contains('/') {
                    return Some(Route::UploadComplete {
                        name: name.to_string(),
                        uuid: uuid.to_string(),
                        chunk: parse_chunk(arg),
                    });
                }
            }
        }
    }

    None
}

fn resolve_patch(path: &str) -> Option<Route> {
    let (name, suffix) = split_at_marker(path, BLOBS)?;
    let rest = suffix.strip_prefix(UPLOADS)?;

    if !rest.is_empty() && !rest.contains('/') {
        return Some(Route::UploadChunk {
            name: name.to_string(),
            uuid: rest.to_string(),
            chunk: None,
        });
    }

    if let Some((uuid, arg)) = rest.split_once('/') {
        if !uuid.is_empty() && !arg.contains('/') {
            return Some(Route::UploadChunk {
                name: name.to_string(),
                uuid: uuid.to_string(),
                chunk: parse_chunk(arg),
            });
        }
    }

    None
}

fn resolve_delete(path: &str) -> Option<Route> {
    if let Some((name, suffix)) = split_at_marker(path, MANIFESTS) {
        if !suffix.contains('/') {
            return Some(Route::ManifestDelete {
                name: name.to_string(),
                reference: suffix.to_string(),
            });
        }
    }

    if let Some((name, suffix)) = split_at_marker(path, BLOBS) {
        return Some(Route::BlobDelete {
            name: name.to_string(),
            digest: suffix.to_string(),
        });
    }

    if !path.is_empty() && path != "repositories" && path != "token" {
        return Some(Route::RepositoryDelete {
            name: path.to_string(),
        });
    }

    None
}

/// Extract the repository name a request path is scoped to, for building
/// `WWW-Authenticate` challenges and permission checks.
///
/// Uses the same rightmost-marker rule as [`resolve`]; paths without a
/// sub-resource marker have no repository scope.
pub fn repository_scope(path: &str) -> Option<&str> {
    let index = [MANIFESTS, BLOBS, TAGS, REFERRERS]
        .iter()
        .filter_map(|marker| path.rfind(marker))
        .max()?;
    if index == 0 {
        return None;
    }
    let name = &path[..index];
    Some(name.strip_suffix("/_oci").unwrap_or(name))
}
