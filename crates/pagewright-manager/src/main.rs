//! `pagewright-manager` binary entrypoint.
//!
//! Loads configuration from environment variables, wires the lock, queue,
//! and spawner backends, starts the timeout sweeper, and serves HTTP until
//! SIGINT/SIGTERM.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use pagewright_core::api::shutdown_signal;
use pagewright_core::lock::MemoryLockBackend;
use pagewright_core::observability::{LogFormat, init_logging};
use pagewright_manager::config::Config;
use pagewright_manager::queue::MemoryJobQueue;
use pagewright_manager::server::create_router;
use pagewright_manager::service::JobService;
use pagewright_manager::spawner::{CommandSpawner, NoopSpawner, Spawner, WorkerContext};
use pagewright_manager::sweeper::TimeoutSweeper;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_logging(if config.debug {
        LogFormat::Pretty
    } else {
        LogFormat::Json
    });

    let spawner: Arc<dyn Spawner> = match config.worker_command.as_deref() {
        Some(command) => {
            let context = WorkerContext {
                manager_url: config.manager_url.clone(),
                storage_url: config.storage_url.clone(),
                llm_key: config.llm_key.clone(),
                llm_base_url: config.llm_base_url.clone(),
            };
            Arc::new(CommandSpawner::new(command, context)?)
        }
        None => {
            tracing::warn!("PAGEWRIGHT_WORKER_COMMAND not set; spawns are recorded only (debug)");
            Arc::new(NoopSpawner::new())
        }
    };

    let service = Arc::new(JobService::new(
        Arc::new(MemoryLockBackend::new()),
        Arc::new(MemoryJobQueue::new()),
        spawner,
        config.lock_ttl(),
    ));

    let shutdown = CancellationToken::new();
    let sweeper =
        TimeoutSweeper::new(Arc::clone(&service), config.worker_timeout()).spawn(shutdown.clone());

    let router = create_router(service);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    tracing::info!(port = config.http_port, "starting manager");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // Stop the sweeper after the listener has drained.
    shutdown.cancel();
    let _ = sweeper.await;
    Ok(())
}
