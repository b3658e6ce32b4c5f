//! Configuration for the controller.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use eac_reconcile::{BackoffPolicy, DEFAULT_RECONCILE_INTERVAL};

use crate::api::RuntimeRef;

/// Controller configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Runtime this controller reconciles.
    pub runtime: RuntimeRef,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Interval between reconciliation passes.
    pub reconcile_interval: Duration,

    /// Base URL of the quota service, if any.
    pub quota_endpoint: Option<String>,

    /// JSON cluster snapshot seeding the in-memory backends.
    pub state_file: Option<PathBuf>,

    /// Backoff applied to every conflicting status/config write.
    pub backoff: BackoffPolicy,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let name = std::env::var("EAC_RUNTIME_NAME").context("EAC_RUNTIME_NAME must be set")?;
        let namespace = std::env::var("EAC_NAMESPACE").unwrap_or_else(|_| "default".to_string());

        let log_level = std::env::var("EAC_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let reconcile_interval = Duration::from_secs(env_or(
            "EAC_RECONCILE_INTERVAL_SECS",
            DEFAULT_RECONCILE_INTERVAL.as_secs(),
        )?);

        let quota_endpoint = std::env::var("EAC_QUOTA_ENDPOINT")
            .ok()
            .filter(|s| !s.is_empty());
        let state_file = std::env::var("EAC_STATE_FILE").ok().map(PathBuf::from);

        let defaults = BackoffPolicy::default();
        let backoff = BackoffPolicy {
            initial: Duration::from_millis(env_or(
                "EAC_BACKOFF_INITIAL_MS",
                defaults.initial.as_millis() as u64,
            )?),
            max: Duration::from_millis(env_or(
                "EAC_BACKOFF_MAX_MS",
                defaults.max.as_millis() as u64,
            )?),
            factor: env_or("EAC_BACKOFF_FACTOR", defaults.factor)?,
            steps: env_or("EAC_BACKOFF_STEPS", defaults.steps)?,
            jitter: defaults.jitter,
        };

        Ok(Self {
            runtime: RuntimeRef::new(namespace, name),
            log_level,
            reconcile_interval,
            quota_endpoint,
            state_file,
            backoff,
        })
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("Invalid {key}: {raw}")),
        Err(_) => Ok(default),
    }
}
