//! `pagewright-store` binary entrypoint.
//!
//! Loads configuration from environment variables and serves the artifact
//! store over HTTP.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};

use pagewright_core::api::shutdown_signal;
use pagewright_core::observability::{LogFormat, init_logging};
use pagewright_store::backend::FsArtifactStore;
use pagewright_store::server::create_router;

#[tokio::main]
async fn main() -> Result<()> {
    let debug = std::env::var("PAGEWRIGHT_DEBUG").is_ok_and(|v| v == "1" || v == "true");
    init_logging(if debug {
        LogFormat::Pretty
    } else {
        LogFormat::Json
    });

    let port: u16 = match std::env::var("PAGEWRIGHT_STORE_HTTP_PORT") {
        Ok(value) => value
            .parse()
            .context("PAGEWRIGHT_STORE_HTTP_PORT must be a port number")?,
        Err(_) => 8082,
    };
    let data_dir =
        std::env::var("PAGEWRIGHT_STORE_DATA_DIR").unwrap_or_else(|_| "/var/lib/pagewright".into());

    let store = Arc::new(FsArtifactStore::new(&data_dir)?);
    let router = create_router(store);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(port, data_dir = %data_dir, "starting artifact store");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}
