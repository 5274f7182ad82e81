use std::path::PathBuf;
use std::time::Duration;

use garde::Validate;
use serde::Deserialize;

use crate::services::submitter::{SubmitSettings, WaitStrategy};
use crate::services::worker::WorkerSettings;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Unused by worker processes.
    #[serde(default = "default_bind_addr")]
    #[garde(length(min = 1))]
    pub bind_addr: String,

    /// Redis connection string for the job queue and result store
    #[garde(length(min = 1))]
    pub redis_url: String,

    /// Bound on connecting to Redis and on each reply (blocking pops add
    /// their own wait on top)
    #[serde(default = "default_redis_timeout_ms")]
    #[garde(range(min = 1, max = 600_000))]
    pub redis_timeout_ms: u64,

    /// Prefix for every Redis key this service touches
    #[serde(default = "default_key_namespace")]
    #[garde(length(min = 1, max = 64))]
    pub key_namespace: String,

    /// Name of the pending-job list within the namespace
    #[serde(default = "default_queue_name")]
    #[garde(length(min = 1, max = 128))]
    pub queue_name: String,

    /// Root directory of the content-addressed upload store
    #[serde(default = "default_upload_dir")]
    #[garde(skip)]
    pub upload_dir: PathBuf,

    #[serde(default)]
    #[garde(skip)]
    pub wait_strategy: WaitStrategy,

    /// Interval between result polls when `wait_strategy=poll`
    #[serde(default = "default_poll_interval_ms")]
    #[garde(range(min = 1, max = 60_000))]
    pub poll_interval_ms: u64,

    /// Upper bound on how long a submitter waits for its result
    #[serde(default = "default_max_wait_ms")]
    #[garde(range(min = 1))]
    pub max_wait_ms: u64,

    /// Expiry of unconsumed result records
    #[serde(default = "default_result_ttl_secs")]
    #[garde(range(min = 1, max = 2_592_000))]
    pub result_ttl_secs: u64,

    /// Blocking pop bound for workers; also bounds shutdown latency
    #[serde(default = "default_dequeue_timeout_secs")]
    #[garde(range(min = 1, max = 3600))]
    pub dequeue_timeout_secs: u64,

    #[serde(default = "default_inference_timeout_secs")]
    #[garde(range(min = 1))]
    pub inference_timeout_secs: u64,

    /// Number of worker loops per worker process
    #[serde(default = "default_worker_concurrency")]
    #[garde(range(min = 1, max = 64))]
    pub worker_concurrency: usize,

    /// Model service endpoint used by the worker's remote classifier
    #[serde(default)]
    #[garde(skip)]
    pub model_url: Option<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_redis_timeout_ms() -> u64 {
    5_000
}

fn default_key_namespace() -> String {
    "predict".to_string()
}

fn default_queue_name() -> String {
    "service_queue".to_string()
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_poll_interval_ms() -> u64 {
    50
}

fn default_max_wait_ms() -> u64 {
    30_000
}

fn default_result_ttl_secs() -> u64 {
    300
}

fn default_dequeue_timeout_secs() -> u64 {
    5
}

fn default_inference_timeout_secs() -> u64 {
    60
}

fn default_worker_concurrency() -> usize {
    1
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config: Self = envy::from_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn queue_key(&self) -> String {
        format!("{}:{}", self.key_namespace, self.queue_name)
    }

    pub fn redis_timeout(&self) -> Duration {
        Duration::from_millis(self.redis_timeout_ms)
    }

    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_secs)
    }

    pub fn submit_settings(&self) -> SubmitSettings {
        SubmitSettings {
            strategy: self.wait_strategy,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_wait: Duration::from_millis(self.max_wait_ms),
        }
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            dequeue_timeout: Duration::from_secs(self.dequeue_timeout_secs),
            inference_timeout: Duration::from_secs(self.inference_timeout_secs),
            ..WorkerSettings::default()
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration from environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] garde::Report),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(extra: &[(&str, &str)]) -> Vec<(String, String)> {
        let mut v = vec![("REDIS_URL".to_string(), "redis://127.0.0.1/".to_string())];
        v.extend(extra.iter().map(|(k, val)| (k.to_string(), val.to_string())));
        v
    }

    #[test]
    fn test_defaults_applied() {
        let config: AppConfig = envy::from_iter(vars(&[])).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.queue_key(), "predict:service_queue");
        assert_eq!(config.wait_strategy, WaitStrategy::Blocking);
        assert_eq!(config.submit_settings().max_wait, Duration::from_secs(30));
        assert!(config.model_url.is_none());
    }

    #[test]
    fn test_poll_strategy_parsed() {
        let config: AppConfig = envy::from_iter(vars(&[
            ("WAIT_STRATEGY", "poll"),
            ("POLL_INTERVAL_MS", "250"),
        ]))
        .unwrap();
        let settings = config.submit_settings();
        assert_eq!(settings.strategy, WaitStrategy::Poll);
        assert_eq!(settings.poll_interval, Duration::from_millis(250));
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let config: AppConfig = envy::from_iter(vars(&[("POLL_INTERVAL_MS", "0")])).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_result_ttl_bounded() {
        let config: AppConfig =
            envy::from_iter(vars(&[("RESULT_TTL_SECS", "18446744073709551615")])).unwrap();
        assert!(config.validate().is_err());

        let config: AppConfig = envy::from_iter(vars(&[("RESULT_TTL_SECS", "86400")])).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.redis_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_missing_redis_url_fails() {
        let result: Result<AppConfig, _> = envy::from_iter(Vec::<(String, String)>::new());
        assert!(result.is_err());
    }
}
