use perk_core::{CacheTtl, RetryPolicy};
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            base_delay_secs: default_base_delay_secs(),
        }
    }
}

impl WorkerConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_secs(self.base_delay_secs),
        }
    }
}

/// Read-path TTL pair; kept as explicit configuration rather than constants
/// buried in the read path.
#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_positive_ttl_secs")]
    pub positive_ttl_secs: u64,
    #[serde(default = "default_empty_ttl_secs")]
    pub empty_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            positive_ttl_secs: default_positive_ttl_secs(),
            empty_ttl_secs: default_empty_ttl_secs(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> CacheTtl {
        CacheTtl {
            positive_secs: self.positive_ttl_secs,
            empty_secs: self.empty_ttl_secs,
        }
    }
}

fn default_concurrency() -> usize {
    5
}
fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_secs() -> u64 {
    2
}
fn default_positive_ttl_secs() -> u64 {
    300
}
fn default_empty_ttl_secs() -> u64 {
    60
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            // Start off by merging in the "default" configuration file
            .add_source(config::File::with_name("config/default"))
            // Add in the current environment file (optional)
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Local overrides, not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // Eg. `PERK__WORKER__CONCURRENCY=8`
            .add_source(config::Environment::with_prefix("PERK").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
