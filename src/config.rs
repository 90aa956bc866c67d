//! Configuration types for docbatch

use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Hard upper bound on concurrent source fetches within one group
pub const MAX_FETCH_CONCURRENCY: usize = 10;

/// Main configuration for [`BatchEngine`](crate::BatchEngine)
///
/// Every section has defaults, so an empty JSON object deserializes into a
/// working configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Output storage and retention
    #[serde(default)]
    pub storage: StorageConfig,

    /// Source retrieval (timeouts, concurrency, retry policy)
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Worker loop polling
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Expiry and orphan sweep
    #[serde(default)]
    pub reaper: ReaperConfig,

    /// Webhook delivery
    #[serde(default)]
    pub notifications: NotificationConfig,
}

impl Config {
    /// Check values that serde cannot constrain on its own
    pub fn validate(&self) -> crate::Result<()> {
        if self.fetch.concurrency == 0 {
            return Err(crate::Error::Config {
                message: "fetch concurrency must be at least 1".to_string(),
                key: Some("fetch.concurrency".to_string()),
            });
        }

        if self.fetch.request_timeout.is_zero() {
            return Err(crate::Error::Config {
                message: "request timeout must be greater than zero".to_string(),
                key: Some("fetch.request_timeout".to_string()),
            });
        }

        if self.worker.poll_interval.is_zero() {
            return Err(crate::Error::Config {
                message: "poll interval must be greater than zero".to_string(),
                key: Some("worker.poll_interval".to_string()),
            });
        }

        if self.reaper.interval.is_zero() {
            return Err(crate::Error::Config {
                message: "reaper interval must be greater than zero".to_string(),
                key: Some("reaper.interval".to_string()),
            });
        }

        if url::Url::parse(&self.storage.public_base_url).is_err() {
            return Err(crate::Error::Config {
                message: format!(
                    "public base URL is not a valid URL: {}",
                    self.storage.public_base_url
                ),
                key: Some("storage.public_base_url".to_string()),
            });
        }

        Ok(())
    }
}

/// Where merged outputs and job state live
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root of the per-job output directories (default: "./batch-storage")
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// SQLite database path (default: "./batch.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// How long outputs stay retrievable after a job finishes (default: 24 hours)
    #[serde(default = "default_retention", with = "duration_serde")]
    pub retention: Duration,

    /// Prefix for retrieval references handed to callers (default: "http://localhost:3000")
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            database_path: default_database_path(),
            retention: default_retention(),
            public_base_url: default_public_base_url(),
        }
    }
}

/// Source retrieval settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Per-request timeout (default: 10 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// Concurrent fetches per group (default: 1, capped at [`MAX_FETCH_CONCURRENCY`])
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Skip TLS certificate validation for every source (default: false)
    #[serde(default)]
    pub accept_invalid_certs: bool,

    /// Redirects followed before giving up (default: 5)
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    /// Retry policy for transient failures (default: 3 retries, fixed 5 second delay)
    #[serde(default = "default_fetch_retry")]
    pub retry: RetryConfig,
}

impl FetchConfig {
    /// Pool size actually used, clamped into `1..=MAX_FETCH_CONCURRENCY`
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.clamp(1, MAX_FETCH_CONCURRENCY)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            request_timeout: default_request_timeout(),
            concurrency: default_concurrency(),
            accept_invalid_certs: false,
            max_redirects: default_max_redirects(),
            retry: default_fetch_retry(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first try (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl RetryConfig {
    /// Fixed-delay policy: `retries` extra attempts, `delay` apart, no backoff
    pub fn fixed(retries: u32, delay: Duration) -> Self {
        Self {
            max_attempts: retries,
            initial_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Worker loop settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// How often the worker looks for a queued job (default: 5 seconds)
    #[serde(default = "default_poll_interval", with = "duration_serde")]
    pub poll_interval: Duration,

    /// Put jobs left in `processing` by a previous process back in the queue (default: true)
    #[serde(default = "default_true")]
    pub requeue_stale_on_start: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            requeue_stale_on_start: true,
        }
    }
}

/// Reaper settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReaperConfig {
    /// Time between sweeps (default: 1 hour)
    #[serde(default = "default_reaper_interval", with = "duration_serde")]
    pub interval: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: default_reaper_interval(),
        }
    }
}

/// Webhook delivery settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Send timeout for the completion callback (default: 10 seconds)
    #[serde(default = "default_webhook_timeout", with = "duration_serde")]
    pub webhook_timeout: Duration,

    /// Value for the `Authorization` header on callbacks
    #[serde(default)]
    pub auth_header: Option<String>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            webhook_timeout: default_webhook_timeout(),
            auth_header: None,
        }
    }
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("./batch-storage")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./batch.db")
}

fn default_retention() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_public_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_concurrency() -> usize {
    1
}

fn default_max_redirects() -> usize {
    5
}

fn default_fetch_retry() -> RetryConfig {
    RetryConfig::fixed(3, Duration::from_secs(5))
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_reaper_interval() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_webhook_timeout() -> Duration {
    Duration::from_secs(10)
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
