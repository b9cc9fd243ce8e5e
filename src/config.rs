//! Configuration types for zip-export

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::Path, path::PathBuf, time::Duration};

/// Export behavior configuration (endpoint, batching, concurrency, output)
///
/// Groups settings related to how batches are formed, submitted and stored.
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Bulk zip export endpoint
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Storage provider tag sent with every request (default: "spo")
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Value for the `Origin` header, if the endpoint requires one
    #[serde(default)]
    pub origin: Option<String>,

    /// Base URL of the drive that owns the files
    ///
    /// When set, each item's document id is expanded into
    /// `{drive_items_url}/items/{id}?version=Published&access_token={token}`.
    /// When unset, ids are sent as-is.
    #[serde(default)]
    pub drive_items_url: Option<String>,

    /// Maximum files per export request (default: 100)
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Maximum batches in flight at once (default: 4)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Time budget for a single export call (default: 300 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// Directory receiving the archives (default: "./exports")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Archive name prefix (default: "OneDrive")
    #[serde(default = "default_archive_prefix")]
    pub archive_prefix: String,

    /// Include the run id in archive names so separate runs never overwrite
    /// each other's output (default: true)
    #[serde(default = "default_true")]
    pub include_run_id_in_name: bool,

    /// Number of leading outcomes that must all be auth failures before the
    /// credential is treated as globally broken (default: the concurrency
    /// limit, never fewer than 2)
    #[serde(default)]
    pub auth_failure_sample: Option<usize>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            provider: default_provider(),
            origin: None,
            drive_items_url: None,
            max_batch_size: default_max_batch_size(),
            concurrency: default_concurrency(),
            request_timeout: default_request_timeout(),
            output_dir: default_output_dir(),
            archive_prefix: default_archive_prefix(),
            include_run_id_in_name: true,
            auth_failure_sample: None,
        }
    }
}

impl ExportConfig {
    /// Effective auth-failure sample size
    ///
    /// At least 2, so one rejected batch alone never stops a run. A run with
    /// fewer batches samples all of them.
    pub fn auth_failure_sample(&self) -> usize {
        self.auth_failure_sample.unwrap_or(self.concurrency).max(2)
    }
}

/// Retry configuration for transient export failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per batch, first call included (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 2 seconds)
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

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Main configuration for an export run
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Endpoint, batching and output settings
    #[serde(default)]
    pub export: ExportConfig,

    /// Retry behavior for transient failures
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Config {
    /// Load configuration from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("failed to read {}: {}", path.display(), e),
            key: None,
        })?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values that would make a run meaningless
    pub fn validate(&self) -> Result<()> {
        let export = &self.export;

        if export.max_batch_size == 0 {
            return Err(Error::config(
                "export.max_batch_size",
                "batch size must be at least 1",
            ));
        }
        if export.concurrency == 0 {
            return Err(Error::config(
                "export.concurrency",
                "concurrency must be at least 1",
            ));
        }
        if export.request_timeout.is_zero() {
            return Err(Error::config(
                "export.request_timeout",
                "request timeout must be non-zero",
            ));
        }
        if export.archive_prefix.trim().is_empty() {
            return Err(Error::config(
                "export.archive_prefix",
                "archive prefix must not be empty",
            ));
        }
        if export.archive_prefix.contains(['/', '\\']) {
            return Err(Error::config(
                "export.archive_prefix",
                "archive prefix must not contain path separators",
            ));
        }
        url::Url::parse(&export.endpoint).map_err(|e| {
            Error::config(
                "export.endpoint",
                format!("invalid endpoint URL '{}': {}", export.endpoint, e),
            )
        })?;
        if let Some(base) = &export.drive_items_url {
            url::Url::parse(base).map_err(|e| {
                Error::config(
                    "export.drive_items_url",
                    format!("invalid drive URL '{}': {}", base, e),
                )
            })?;
        }

        if self.retry.max_attempts == 0 {
            return Err(Error::config(
                "retry.max_attempts",
                "at least one attempt is required",
            ));
        }
        if !self.retry.backoff_multiplier.is_finite() || self.retry.backoff_multiplier < 1.0 {
            return Err(Error::config(
                "retry.backoff_multiplier",
                "backoff multiplier must be a finite number >= 1.0",
            ));
        }

        Ok(())
    }
}

fn default_endpoint() -> String {
    "https://ukwest1-mediap.svc.ms/transform/zip".to_string()
}

fn default_provider() -> String {
    "spo".to_string()
}

fn default_max_batch_size() -> usize {
    100
}

fn default_concurrency() -> usize {
    4
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./exports")
}

fn default_archive_prefix() -> String {
    "OneDrive".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
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
