//! Configuration Management
//!
//! Loads `<config_dir>/cloudsweep/config.json`, then applies environment
//! overrides. CLI flags are applied on top by the binary.

use crate::breaker::{CircuitBreakerConfig, DEFAULT_COOLDOWN_SECS, DEFAULT_FAILURE_THRESHOLD};
use crate::gcp::client::Endpoints;
use crate::metrics::collector::DEFAULT_BATCH_CONCURRENCY;
use crate::pipeline::{PipelineSettings, FALLBACK_REGION};
use crate::store::postgres::PoolConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_DATABASE_URL: &str = "CLOUDSWEEP_DATABASE_URL";
pub const ENV_DEFAULT_REGION: &str = "CLOUDSWEEP_DEFAULT_REGION";

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Postgres connection string; none means results are kept in memory
    pub database_url: Option<String>,
    /// Region scanned when an account has no configured regions
    pub default_region: Option<String>,
    /// Configured regions per account (GCP project id)
    pub accounts: HashMap<String, Vec<String>>,
    pub endpoints: Endpoints,
    pub breaker_failure_threshold: u32,
    pub breaker_cooldown_secs: u64,
    pub metric_batch_concurrency: usize,
    /// Regions scanned at once; 0 scans all requested regions together
    pub region_width: usize,
    pub http_timeout_secs: u64,
    pub db_max_connections: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            default_region: None,
            accounts: HashMap::new(),
            endpoints: Endpoints::default(),
            breaker_failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            breaker_cooldown_secs: DEFAULT_COOLDOWN_SECS,
            metric_batch_concurrency: DEFAULT_BATCH_CONCURRENCY,
            region_width: 0,
            http_timeout_secs: 30,
            db_max_connections: 5,
        }
    }
}

impl Config {
    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("cloudsweep").join("config.json"))
    }

    /// Load configuration from disk (explicit path or the default location)
    /// and apply environment overrides.
    ///
    /// A missing file yields defaults; an unreadable or malformed file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).or_else(Self::config_path);

        let mut config = match path {
            Some(path) if path.exists() => Self::load_from(&path)?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Apply overrides from an environment lookup
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_DATABASE_URL).filter(|v| !v.trim().is_empty()) {
            self.database_url = Some(url);
        }
        if let Some(region) = lookup(ENV_DEFAULT_REGION).filter(|v| !v.trim().is_empty()) {
            self.default_region = Some(region.trim().to_string());
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.endpoints.validate()?;
        if self.breaker_failure_threshold == 0 {
            anyhow::bail!("breaker_failure_threshold must be at least 1");
        }
        if self.http_timeout_secs == 0 {
            anyhow::bail!("http_timeout_secs must be at least 1");
        }
        Ok(())
    }

    /// Get effective default region (config > gcloud default > us-central1)
    pub fn effective_default_region(&self) -> String {
        self.default_region
            .clone()
            .or_else(crate::gcp::auth::get_default_region)
            .unwrap_or_else(|| FALLBACK_REGION.to_string())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn pool(&self) -> PoolConfig {
        PoolConfig {
            max_connections: self.db_max_connections.max(1),
            ..PoolConfig::default()
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            default_region: self.effective_default_region(),
            region_width: self.region_width,
            metric_batch_concurrency: self.metric_batch_concurrency,
            breaker: CircuitBreakerConfig {
                failure_threshold: self.breaker_failure_threshold,
                cooldown: Duration::from_secs(self.breaker_cooldown_secs),
            },
        }
    }
}
