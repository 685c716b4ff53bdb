//! Environment-provided orchestrator configuration.
//!
//! Read once at startup; malformed values are startup errors (exit 1), not
//! silently defaulted.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Runtime configuration for every orchestrator component.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Directory holding durable state. `PAGESMITH_DATA_DIR`.
    pub data_dir: PathBuf,
    /// Path of the pipeline database. `PAGESMITH_DB`.
    pub db_path: PathBuf,
    /// HTTP listen port. `PAGESMITH_HTTP_PORT`.
    pub http_port: u16,
    /// How long a claimed queue message stays invisible before redelivery.
    /// `PAGESMITH_VISIBILITY_TIMEOUT_SECS`.
    pub visibility_timeout: Duration,
    /// Terminal jobs older than this are evicted. `PAGESMITH_REAP_TTL_HOURS`.
    pub reap_ttl: Duration,
    /// Reaper tick interval. `PAGESMITH_REAP_INTERVAL_SECS`.
    pub reap_interval: Duration,
    /// Optional staleness deadline forcing stuck `in_progress` jobs to
    /// `failed`. Unset means jobs wait forever. `PAGESMITH_STAGE_DEADLINE_SECS`.
    pub stage_deadline: Option<Duration>,
    /// Accept hyphen-form result keys (`product-manager-result.json`) on
    /// read. `PAGESMITH_LEGACY_HYPHEN_KEYS`.
    pub legacy_hyphen_keys: bool,
    /// Sliding window for the per-IP submission limit.
    /// `PAGESMITH_RATE_LIMIT_SECS`.
    pub rate_limit_window: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        let data_dir = PathBuf::from(".pagesmith");
        Self {
            db_path: data_dir.join("pagesmith.db"),
            data_dir,
            http_port: 8080,
            visibility_timeout: Duration::from_secs(300),
            reap_ttl: Duration::from_secs(24 * 3600),
            reap_interval: Duration::from_secs(3600),
            stage_deadline: None,
            legacy_hyphen_keys: true,
            rate_limit_window: Duration::from_secs(60),
        }
    }
}

impl OrchestratorConfig {
    /// Build the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(dir) = env_var("PAGESMITH_DATA_DIR") {
            config.data_dir = PathBuf::from(&dir);
            config.db_path = config.data_dir.join("pagesmith.db");
        }
        if let Some(path) = env_var("PAGESMITH_DB") {
            config.db_path = PathBuf::from(path);
        }
        if let Some(port) = env_var("PAGESMITH_HTTP_PORT") {
            config.http_port = port
                .parse()
                .with_context(|| format!("invalid PAGESMITH_HTTP_PORT '{port}'"))?;
        }
        if let Some(secs) = env_var("PAGESMITH_VISIBILITY_TIMEOUT_SECS") {
            config.visibility_timeout = Duration::from_secs(
                secs.parse()
                    .with_context(|| format!("invalid PAGESMITH_VISIBILITY_TIMEOUT_SECS '{secs}'"))?,
            );
        }
        if let Some(hours) = env_var("PAGESMITH_REAP_TTL_HOURS") {
            let hours: u64 = hours
                .parse()
                .with_context(|| format!("invalid PAGESMITH_REAP_TTL_HOURS '{hours}'"))?;
            config.reap_ttl = Duration::from_secs(hours * 3600);
        }
        if let Some(secs) = env_var("PAGESMITH_REAP_INTERVAL_SECS") {
            config.reap_interval = Duration::from_secs(
                secs.parse()
                    .with_context(|| format!("invalid PAGESMITH_REAP_INTERVAL_SECS '{secs}'"))?,
            );
        }
        if let Some(secs) = env_var("PAGESMITH_STAGE_DEADLINE_SECS") {
            config.stage_deadline = Some(Duration::from_secs(
                secs.parse()
                    .with_context(|| format!("invalid PAGESMITH_STAGE_DEADLINE_SECS '{secs}'"))?,
            ));
        }
        if let Some(flag) = env_var("PAGESMITH_LEGACY_HYPHEN_KEYS") {
            config.legacy_hyphen_keys = matches!(flag.as_str(), "1" | "true" | "yes");
        }
        if let Some(secs) = env_var("PAGESMITH_RATE_LIMIT_SECS") {
            config.rate_limit_window = Duration::from_secs(
                secs.parse()
                    .with_context(|| format!("invalid PAGESMITH_RATE_LIMIT_SECS '{secs}'"))?,
            );
        }

        Ok(config)
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.visibility_timeout, Duration::from_secs(300));
        assert_eq!(config.reap_ttl, Duration::from_secs(86400));
        assert!(config.stage_deadline.is_none());
        assert!(config.legacy_hyphen_keys);
        assert!(config.db_path.ends_with("pagesmith.db"));
    }
}
