//! Test configuration helpers pointing exporters at a mock endpoint

use std::path::Path;
use std::time::Duration;
use zip_export::{Config, RetryConfig};

/// Config targeting `server_uri` and writing archives into `output_dir`
///
/// Retries are near-instant so retry paths stay fast.
pub fn mock_config(server_uri: &str, output_dir: &Path) -> Config {
    let mut config = Config::default();
    config.export.endpoint = format!("{}/transform/zip", server_uri);
    config.export.origin = Some("https://tenant.sharepoint.com".to_string());
    config.export.output_dir = output_dir.to_path_buf();
    config.export.request_timeout = Duration::from_secs(5);
    config.retry = RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        backoff_multiplier: 2.0,
        jitter: false,
    };
    config
}
