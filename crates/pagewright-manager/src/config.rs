//! Manager configuration.
//!
//! Loaded from `PAGEWRIGHT_*` environment variables; every variable is
//! optional with a default except the ones a production deployment cannot
//! run without (validated at startup).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use pagewright_core::error::{Error, Result};

/// Configuration for the manager service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server port.
    pub http_port: u16,

    /// Callback base URL handed to spawned workers (`MANAGER_URL`).
    pub manager_url: String,

    /// Artifact store base URL handed to spawned workers (`STORAGE_URL`).
    pub storage_url: String,

    /// Site lock lease, sized for the full worker lifetime plus margin.
    pub lock_ttl_secs: u64,

    /// How long a running job may go without a record update before the
    /// sweeper fails it (must be below the lock TTL).
    pub worker_timeout_secs: u64,

    /// Worker launch command (binary or container invocation). When unset
    /// the manager records spawns without launching (debug only).
    pub worker_command: Option<String>,

    /// LLM credential forwarded to workers (`LLM_KEY`).
    pub llm_key: Option<String>,

    /// LLM endpoint override forwarded to workers (`LLM_BASE_URL`).
    pub llm_base_url: Option<String>,

    /// Enable debug mode (pretty logs, in-memory backends allowed).
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 8080,
            manager_url: "http://localhost:8080".to_string(),
            storage_url: "http://localhost:8082".to_string(),
            lock_ttl_secs: 300,
            worker_timeout_secs: 240,
            worker_command: None,
            llm_key: None,
            llm_base_url: None,
            debug: false,
        }
    }
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any variable is present but cannot be parsed, or
    /// if the validated invariants do not hold.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(port) = env_u16("PAGEWRIGHT_HTTP_PORT")? {
            config.http_port = port;
        }
        if let Some(url) = env_string("PAGEWRIGHT_MANAGER_URL") {
            config.manager_url = url;
        }
        if let Some(url) = env_string("PAGEWRIGHT_STORAGE_URL") {
            config.storage_url = url;
        }
        if let Some(ttl) = env_u64("PAGEWRIGHT_LOCK_TTL_SECS")? {
            config.lock_ttl_secs = ttl;
        }
        if let Some(timeout) = env_u64("PAGEWRIGHT_WORKER_TIMEOUT_SECS")? {
            config.worker_timeout_secs = timeout;
        }
        config.worker_command = env_string("PAGEWRIGHT_WORKER_COMMAND");
        config.llm_key = env_string("PAGEWRIGHT_LLM_KEY");
        config.llm_base_url = env_string("PAGEWRIGHT_LLM_BASE_URL");
        if let Some(debug) = env_bool("PAGEWRIGHT_DEBUG")? {
            config.debug = debug;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates cross-field invariants.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when an invariant does not hold.
    pub fn validate(&self) -> Result<()> {
        if self.lock_ttl_secs == 0 {
            return Err(Error::InvalidInput(
                "PAGEWRIGHT_LOCK_TTL_SECS must be greater than 0".to_string(),
            ));
        }
        // The lock must outlive a healthy worker, otherwise every job
        // loses its lease mid-flight.
        if self.worker_timeout_secs >= self.lock_ttl_secs {
            return Err(Error::InvalidInput(
                "PAGEWRIGHT_WORKER_TIMEOUT_SECS must be below PAGEWRIGHT_LOCK_TTL_SECS".to_string(),
            ));
        }
        if !self.debug && self.worker_command.is_none() {
            return Err(Error::InvalidInput(
                "PAGEWRIGHT_WORKER_COMMAND is required when PAGEWRIGHT_DEBUG=false".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the lock TTL as a [`Duration`].
    #[must_use]
    pub const fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    /// Returns the worker timeout as a [`Duration`].
    #[must_use]
    pub const fn worker_timeout(&self) -> Duration {
        Duration::from_secs(self.worker_timeout_secs)
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_u16(name: &str) -> Result<Option<u16>> {
    env_string(name)
        .map(|v| {
            v.parse()
                .map_err(|_| Error::InvalidInput(format!("{name} must be a 16-bit integer: {v}")))
        })
        .transpose()
}

fn env_u64(name: &str) -> Result<Option<u64>> {
    env_string(name)
        .map(|v| {
            v.parse()
                .map_err(|_| Error::InvalidInput(format!("{name} must be an integer: {v}")))
        })
        .transpose()
}

fn env_bool(name: &str) -> Result<Option<bool>> {
    env_string(name)
        .map(|v| match v.as_str() {
            "1" | "true" | "TRUE" => Ok(true),
            "0" | "false" | "FALSE" => Ok(false),
            other => Err(Error::InvalidInput(format!(
                "{name} must be a boolean: {other}"
            ))),
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_in_debug() {
        let config = Config {
            debug: true,
            ..Config::default()
        };
        config.validate().expect("valid");
    }

    #[test]
    fn worker_timeout_must_stay_below_lock_ttl() {
        let config = Config {
            debug: true,
            lock_ttl_secs: 60,
            worker_timeout_secs: 60,
            ..Config::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn production_requires_worker_command() {
        let config = Config::default();
        let err = config.validate().unwrap_err();
        let Error::InvalidInput(message) = err else {
            panic!("unexpected error: {err:?}");
        };
        assert!(message.contains("PAGEWRIGHT_WORKER_COMMAND"));
    }
}
