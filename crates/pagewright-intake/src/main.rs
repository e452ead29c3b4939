//! `pagewright-intake` binary entrypoint.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use pagewright_core::api::shutdown_signal;
use pagewright_core::observability::{LogFormat, init_logging};
use pagewright_intake::clarify::{
    ConversationMap, LlmClassifier, PassthroughClassifier, PromptClassifier,
};
use pagewright_intake::clients::{ManagerApi, ServingApi};
use pagewright_intake::server::create_router;
use pagewright_intake::service::IntakeService;

#[tokio::main]
async fn main() -> Result<()> {
    let debug = std::env::var("PAGEWRIGHT_DEBUG").is_ok_and(|v| v == "1" || v == "true");
    init_logging(if debug {
        LogFormat::Pretty
    } else {
        LogFormat::Json
    });

    let port: u16 = match std::env::var("PAGEWRIGHT_INTAKE_HTTP_PORT") {
        Ok(value) => value
            .parse()
            .context("PAGEWRIGHT_INTAKE_HTTP_PORT must be a port number")?,
        Err(_) => 8084,
    };
    let manager_url =
        std::env::var("PAGEWRIGHT_MANAGER_URL").unwrap_or_else(|_| "http://localhost:8080".into());
    let serving_url =
        std::env::var("PAGEWRIGHT_SERVING_URL").unwrap_or_else(|_| "http://localhost:8083".into());

    let classifier: Arc<dyn PromptClassifier> = match std::env::var("PAGEWRIGHT_LLM_KEY") {
        Ok(key) if !key.trim().is_empty() => {
            let base_url = std::env::var("PAGEWRIGHT_LLM_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".into());
            let model =
                std::env::var("PAGEWRIGHT_LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into());
            Arc::new(LlmClassifier::new(base_url, key, model))
        }
        _ => {
            tracing::warn!("PAGEWRIGHT_LLM_KEY not set; prompts pass through unclassified");
            Arc::new(PassthroughClassifier)
        }
    };

    let conversations = Arc::new(ConversationMap::default());
    let shutdown = CancellationToken::new();
    let sweeper = Arc::clone(&conversations).spawn_sweeper(shutdown.clone());

    let service = Arc::new(IntakeService::new(
        classifier,
        conversations,
        ManagerApi::new(manager_url),
        ServingApi::new(serving_url),
    ));
    let router = create_router(service);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(port, "starting intake");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    shutdown.cancel();
    let _ = sweeper.await;
    Ok(())
}
