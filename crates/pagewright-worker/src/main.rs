//! `pagewright-worker` binary entrypoint.
//!
//! The spawner passes the entire job context through the environment:
//! `JOB` (full job JSON), `MANAGER_URL`, `WORKER_ID`, `LLM_KEY`,
//! `LLM_BASE_URL`, `STORAGE_URL`. The control server and the pipeline run
//! concurrently; the process exits once the final callback is delivered
//! (the exit code is ignored by the manager).

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use pagewright_core::job::Job;
use pagewright_core::observability::{LogFormat, init_logging};
use pagewright_store::client::StoreClient;
use pagewright_worker::callback::ManagerClient;
use pagewright_worker::executor::{Executor, LlmEnv};
use pagewright_worker::run::JobRunner;
use pagewright_worker::server::{StatusBoard, create_router};

fn required_env(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("{name} environment variable not set"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let debug = std::env::var("PAGEWRIGHT_DEBUG").is_ok_and(|v| v == "1" || v == "true");
    init_logging(if debug {
        LogFormat::Pretty
    } else {
        LogFormat::Json
    });

    let job_json = required_env("JOB")?;
    let manager_url = required_env("MANAGER_URL")?;
    let worker_id = required_env("WORKER_ID")?;
    let storage_url = required_env("STORAGE_URL")?;
    let llm = LlmEnv {
        key: std::env::var("LLM_KEY").ok(),
        base_url: std::env::var("LLM_BASE_URL").ok(),
    };
    let generator_binary =
        std::env::var("PAGEWRIGHT_GENERATOR_BINARY").unwrap_or_else(|_| "codex".to_string());
    let control_port: u16 = match std::env::var("PAGEWRIGHT_WORKER_PORT") {
        Ok(value) => value
            .parse()
            .context("PAGEWRIGHT_WORKER_PORT must be a port number")?,
        Err(_) => 8081,
    };

    let job: Job = serde_json::from_str(&job_json).context("failed to parse JOB")?;
    tracing::info!(
        worker_id = %worker_id,
        job_id = %job.job_id,
        site_id = %job.site_id,
        fencing_token = job.fencing_token,
        target_version = %job.target_version,
        "worker starting"
    );

    let executor = Arc::new(Executor::new(generator_binary, llm));
    let status = Arc::new(StatusBoard::new());

    // Control surface for /status and /kill, alive for the whole run.
    let router = create_router(Arc::clone(&executor), Arc::clone(&status));
    let addr = SocketAddr::from(([0, 0, 0, 0], control_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind control server to {addr}"))?;
    let server_shutdown = CancellationToken::new();
    let server_handle = {
        let shutdown = server_shutdown.clone();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
        })
    };

    let runner = JobRunner::new(
        job,
        StoreClient::new(storage_url),
        ManagerClient::new(manager_url),
        executor,
        status,
    );
    let outcome = runner.run().await;

    server_shutdown.cancel();
    let _ = server_handle.await;

    match outcome {
        Ok(()) => {
            tracing::info!("callback delivered, worker exiting");
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to deliver final callback");
            Err(e.into())
        }
    }
}
