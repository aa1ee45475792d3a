use serde::{Deserialize, Serialize};
use std::{collections::HashMap, time::Duration};
use thiserror::Error;

use crate::jobs::retry_policy::RetryPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tracing: TracingConfig,
    pub database: DatabaseConfig,
    pub jobs: JobsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracingConfig {
    pub log_level: String,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    /// Connections kept open per process (default: 5)
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    /// Extra connections allowed above `pool_size` under load (default: 10)
    #[serde(default = "default_max_overflow")]
    pub max_overflow: u32,
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_seconds: u64,
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,
    #[serde(default = "default_connect_retry_delay")]
    pub connect_retry_delay_seconds: u64,
    /// Apply pending migrations before workers start (default: true)
    #[serde(default = "default_true")]
    pub migrate_on_start: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub reaper: ReaperConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
    /// Tries granted to jobs enqueued without an explicit `max_tries` (default: 3)
    #[serde(default = "default_max_tries")]
    pub default_max_tries: i32,
    #[serde(default)]
    pub workers: WorkersConfig,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            reaper: ReaperConfig::default(),
            cleanup: CleanupConfig::default(),
            default_max_tries: default_max_tries(),
            workers: WorkersConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Backoff unit in milliseconds; attempt `n` waits about `base * 2^n` (default: 1000)
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    /// Upper bound on a single backoff in milliseconds (default: 3600000 = 1 hour)
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    /// Jitter as a fraction of the delay, in `[0, 1)` (default: 0.2)
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            jitter_ratio: default_jitter_ratio(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            self.jitter_ratio,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaperConfig {
    /// Seconds between expired-lease scans (default: 15)
    #[serde(default = "default_reaper_interval")]
    pub interval_seconds: u64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_reaper_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Interval between cleanup runs in seconds (default: 3600 = 1 hour)
    #[serde(default = "default_cleanup_interval")]
    pub interval_seconds: u64,
    /// Retention period for completed jobs in seconds (default: 604800 = 7 days)
    #[serde(default = "default_completed_retention")]
    pub completed_retention_seconds: u64,
    /// Retention period for failed and dead jobs in seconds (default: 2592000 = 30 days)
    #[serde(default = "default_failed_retention")]
    pub failed_retention_seconds: u64,
    /// Maximum number of jobs to delete in a single batch (default: 1000)
    #[serde(default = "default_cleanup_batch_size")]
    pub batch_size: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_cleanup_interval(),
            completed_retention_seconds: default_completed_retention(),
            failed_retention_seconds: default_failed_retention(),
            batch_size: default_cleanup_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkersConfig {
    #[serde(flatten)]
    pub workers: HashMap<String, WorkerQueueConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerQueueConfig {
    /// Queue names this pool polls
    pub queues: Vec<String>,
    /// Worker instances in this pool
    pub count: u32,
    /// Jobs one worker runs concurrently (default: 3)
    #[serde(default = "default_capacity")]
    pub capacity: u32,
    /// Most jobs claimed in one poll (default: 3)
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Job execution timeout in seconds (default: 300)
    #[serde(default = "default_job_timeout")]
    pub job_timeout: u32,
    /// Lease granted per claim in seconds, renewed while the job runs (default: 60)
    #[serde(default = "default_lease_duration")]
    pub lease_duration_seconds: u64,
    /// Delay between polls in milliseconds (default: 1000)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Ceiling for the idle poll delay in milliseconds (default: 30000)
    #[serde(default = "default_max_poll_interval")]
    pub max_poll_interval_ms: u64,
    /// Growth of the idle poll delay per empty poll (default: 1.5)
    #[serde(default = "default_poll_backoff_factor")]
    pub poll_backoff_factor: f64,
    /// Time given to running jobs after shutdown is requested (default: 60)
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,
}

impl WorkerQueueConfig {
    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_duration_seconds)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.job_timeout))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_poll_interval(&self) -> Duration {
        Duration::from_millis(self.max_poll_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("no worker pools configured")]
    NoWorkerPools,
    #[error("worker pool '{pool}': {reason}")]
    InvalidWorkerPool { pool: String, reason: String },
    #[error("retry policy: {0}")]
    InvalidRetryPolicy(String),
    #[error("default_max_tries must be at least 1, got {0}")]
    InvalidDefaultMaxTries(i32),
    #[error("scheduled job '{name}': {reason}")]
    InvalidSchedule { name: String, reason: String },
}

impl JobsConfig {
    /// Reject configurations that would leave the runtime unable to make progress.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_max_tries < 1 {
            return Err(ConfigError::InvalidDefaultMaxTries(self.default_max_tries));
        }

        if self.retry.base_delay_ms == 0 {
            return Err(ConfigError::InvalidRetryPolicy(
                "base_delay_ms must be greater than zero".to_string(),
            ));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(ConfigError::InvalidRetryPolicy(
                "max_delay_ms must not be below base_delay_ms".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.retry.jitter_ratio) {
            return Err(ConfigError::InvalidRetryPolicy(format!(
                "jitter_ratio must be in [0, 1), got {}",
                self.retry.jitter_ratio
            )));
        }

        if self.workers.workers.is_empty() {
            return Err(ConfigError::NoWorkerPools);
        }

        for (pool, worker_config) in &self.workers.workers {
            let invalid = |reason: &str| ConfigError::InvalidWorkerPool {
                pool: pool.clone(),
                reason: reason.to_string(),
            };

            if worker_config.queues.is_empty() {
                return Err(invalid("no queues configured"));
            }
            if worker_config.count == 0 {
                return Err(invalid("count must be at least 1"));
            }
            if worker_config.capacity == 0 {
                return Err(invalid("capacity must be at least 1"));
            }
            if worker_config.batch_size == 0 {
                return Err(invalid("batch_size must be at least 1"));
            }
            if worker_config.lease_duration_seconds == 0 {
                return Err(invalid("lease_duration_seconds must be greater than zero"));
            }
            if worker_config.poll_backoff_factor < 1.0 {
                return Err(invalid("poll_backoff_factor must be at least 1.0"));
            }
        }

        Ok(())
    }
}

const fn default_true() -> bool {
    true
}

const fn default_pool_size() -> u32 {
    5
}

const fn default_max_overflow() -> u32 {
    10
}

const fn default_acquire_timeout() -> u64 {
    30
}

const fn default_connect_retries() -> u32 {
    5
}

const fn default_connect_retry_delay() -> u64 {
    3
}

const fn default_max_tries() -> i32 {
    3
}

const fn default_base_delay() -> u64 {
    1000
}

const fn default_max_delay() -> u64 {
    3_600_000 // 1 hour
}

const fn default_jitter_ratio() -> f64 {
    0.2
}

const fn default_reaper_interval() -> u64 {
    15
}

const fn default_capacity() -> u32 {
    3
}

const fn default_batch_size() -> u32 {
    3
}

const fn default_job_timeout() -> u32 {
    300 // 5 minutes
}

const fn default_lease_duration() -> u64 {
    60
}

const fn default_poll_interval() -> u64 {
    1000
}

const fn default_max_poll_interval() -> u64 {
    30_000
}

const fn default_poll_backoff_factor() -> f64 {
    1.5
}

const fn default_shutdown_grace() -> u64 {
    60
}

const fn default_cleanup_interval() -> u64 {
    3600 // 1 hour
}

const fn default_completed_retention() -> u64 {
    604_800 // 7 days
}

const fn default_failed_retention() -> u64 {
    2_592_000 // 30 days
}

const fn default_cleanup_batch_size() -> u64 {
    1000
}

#[cfg(test)]
pub(crate) fn test_worker_config(queues: &[&str]) -> WorkerQueueConfig {
    WorkerQueueConfig {
        queues: queues.iter().map(ToString::to_string).collect(),
        count: 1,
        capacity: default_capacity(),
        batch_size: default_batch_size(),
        job_timeout: default_job_timeout(),
        lease_duration_seconds: default_lease_duration(),
        poll_interval_ms: 10,
        max_poll_interval_ms: 50,
        poll_backoff_factor: default_poll_backoff_factor(),
        shutdown_grace_seconds: 5,
    }
}
