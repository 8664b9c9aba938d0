//! # OCI Container Registry
//!
//! This crate implements an OCI-compliant container registry server
//! following the [OCI Distribution Specification](https://github.com/opencontainers/distribution-spec).
//!
//! ## Features
//!
//! - Full OCI registry API: blobs, resumable chunked uploads, manifests,
//!   tags, and referrers
//! - Server-side digest verification before any content becomes visible
//! - JWT bearer authentication with per-repository permissions
//! - Pluggable storage backend via the `storage` crate
//! - Builder pattern for configuration
//!
//! ## Example
//!
//! ```no_run
//! use registry::RegistryBuilder;
//! use storage::MemoryDriver;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = MemoryDriver::with_buckets(&["registry"]);
//! let registry = RegistryBuilder::new()
//!     .storage(storage.into())
//!     .bucket("registry")
//!     .build()?;
//!
//! // Serve the router with axum or any tower-compatible server
//! # Ok(())
//! # }
//! ```

mod api;
mod auth;
mod blob;
mod digest;
mod error;
mod headers;
mod jwt;
mod manifest;
mod metadata;
mod models;
mod referrers;
mod repo;
mod routes;
mod storage;
mod tags;
mod token;

pub use api::RegistryBuilder;
pub use auth::AuthConfig;
pub use digest::Digest;
pub use error::{RegistryError, RegistryResult};
pub use metadata::MetadataStore;
pub use models::{RepositoryPermission, User};
