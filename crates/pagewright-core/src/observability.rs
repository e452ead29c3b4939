//! Observability infrastructure for PageWright.
//!
//! Structured logging with consistent spans across all services. Services
//! pick JSON output in production and pretty output in debug mode.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Call once at service startup. Safe to call multiple times; subsequent
/// calls are no-ops. `RUST_LOG` controls levels (default `info`).
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .init();
            }
        }
    });
}

/// Creates a span for job lifecycle operations with standard fields.
#[must_use]
pub fn job_span(operation: &str, site_id: &str, job_id: &str) -> Span {
    tracing::info_span!("job", op = operation, site_id = site_id, job_id = job_id)
}

/// Creates a span for deploy/activation operations.
#[must_use]
pub fn deploy_span(operation: &str, fqdn: &str, version: &str) -> Span {
    tracing::info_span!("deploy", op = operation, fqdn = fqdn, version = version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_is_idempotent() {
        init_logging(LogFormat::Pretty);
        init_logging(LogFormat::Pretty);
    }

    #[test]
    fn span_helpers_create_spans() {
        let span = job_span("create", "S", "J1");
        let _guard = span.enter();
        tracing::info!("test message in span");

        let span = deploy_span("activate", "a.example.com", "V1");
        let _guard = span.enter();
    }
}
