//! `pagewright-serving` binary entrypoint.
//!
//! Loads configuration from environment variables and serves the runner's
//! HTTP surface until SIGINT/SIGTERM.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};

use pagewright_core::api::shutdown_signal;
use pagewright_core::observability::{LogFormat, init_logging};
use pagewright_serving::deploy::DeployManager;
use pagewright_serving::edge::EdgeManager;
use pagewright_serving::layout::SiteLayout;
use pagewright_serving::server::create_router;
use pagewright_store::client::StoreClient;

#[tokio::main]
async fn main() -> Result<()> {
    let debug = std::env::var("PAGEWRIGHT_DEBUG").is_ok_and(|v| v == "1" || v == "true");
    init_logging(if debug {
        LogFormat::Pretty
    } else {
        LogFormat::Json
    });

    let port: u16 = match std::env::var("PAGEWRIGHT_SERVING_HTTP_PORT") {
        Ok(value) => value
            .parse()
            .context("PAGEWRIGHT_SERVING_HTTP_PORT must be a port number")?,
        Err(_) => 8083,
    };
    let web_root = std::env::var("PAGEWRIGHT_WEB_ROOT").unwrap_or_else(|_| "/var/www".into());
    let sites_dir = std::env::var("PAGEWRIGHT_SITES_DIR")
        .unwrap_or_else(|_| "/etc/nginx/sites-enabled".into());
    let reload_command = std::env::var("PAGEWRIGHT_RELOAD_COMMAND").ok();
    let maintenance_dir = std::env::var("PAGEWRIGHT_MAINTENANCE_DIR")
        .unwrap_or_else(|_| "/var/www/maintenance".into());
    let storage_url =
        std::env::var("PAGEWRIGHT_STORAGE_URL").unwrap_or_else(|_| "http://localhost:8082".into());
    let max_versions: usize = match std::env::var("PAGEWRIGHT_MAX_VERSIONS_PER_SITE") {
        Ok(value) => value
            .parse()
            .context("PAGEWRIGHT_MAX_VERSIONS_PER_SITE must be an integer")?,
        Err(_) => 10,
    };

    if reload_command.is_none() {
        tracing::warn!("PAGEWRIGHT_RELOAD_COMMAND not set; edge reloads are skipped");
    }

    let layout = SiteLayout::new(&web_root);
    let deploy = Arc::new(DeployManager::new(
        layout.clone(),
        StoreClient::new(storage_url),
        max_versions,
    ));
    let edge = Arc::new(EdgeManager::new(
        layout,
        &sites_dir,
        reload_command,
        &maintenance_dir,
    ));

    let router = create_router(deploy, edge);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(port, web_root = %web_root, "starting serving runner");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}
