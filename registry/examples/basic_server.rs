//! Minimal registry server over in-memory storage.
//!
//! Runs without authentication so it can be poked with curl or a container
//! client right away. Wire an [`AuthConfig`] with `enabled: true` (and seed
//! users through [`registry::MetadataStore`]) for a protected registry.
//!
//! ```sh
//! cargo run --example basic_server
//! curl -v http://127.0.0.1:5000/v2/
//! ```

use registry::{AuthConfig, RegistryBuilder};
use storage::MemoryDriver;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let storage = MemoryDriver::with_buckets(&["registry"]);
    let app = RegistryBuilder::new()
        .storage(storage.into())
        .bucket("registry")
        .auth(AuthConfig {
            enabled: false,
            ..Default::default()
        })
        .build()?;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:5000").await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
