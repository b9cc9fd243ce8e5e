//! Shared test helpers: scripted export clients and credential providers.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::client::ExportClient;
use crate::config::{Config, RetryConfig};
use crate::credentials::{Credential, CredentialProvider};
use crate::error::{ExportError, Result};
use crate::request::ExportRequest;
use crate::types::FileDescriptor;

type Script =
    dyn Fn(u32, u32, &Credential) -> std::result::Result<Vec<u8>, ExportError> + Send + Sync;

/// Fake [`ExportClient`] whose answer is decided by a closure of
/// `(batch_number, call_number_for_batch, credential)`
pub(crate) struct ScriptedClient {
    script: Box<Script>,
    delay: Duration,
    calls: Mutex<HashMap<u32, u32>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedClient {
    pub(crate) fn new(
        script: impl Fn(u32, u32, &Credential) -> std::result::Result<Vec<u8>, ExportError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            script: Box::new(script),
            delay: Duration::ZERO,
            calls: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Client that succeeds for every batch with a payload naming the batch
    pub(crate) fn always_ok() -> Self {
        Self::new(|batch, _, _| Ok(payload(batch)))
    }

    /// Sleep `delay` inside every call
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Calls made for `batch`
    pub(crate) fn calls_for(&self, batch: u32) -> u32 {
        self.calls.lock().unwrap().get(&batch).copied().unwrap_or(0)
    }

    /// Calls made across all batches
    pub(crate) fn total_calls(&self) -> u32 {
        self.calls.lock().unwrap().values().sum()
    }

    /// Highest number of calls observed running at once
    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExportClient for ScriptedClient {
    async fn export(
        &self,
        request: &ExportRequest,
        credential: &Credential,
    ) -> std::result::Result<Vec<u8>, ExportError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(request.batch_number).or_insert(0);
            *count += 1;
            *count
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        (self.script)(request.batch_number, call, credential)
    }
}

/// Payload returned for `batch` by scripted clients
pub(crate) fn payload(batch: u32) -> Vec<u8> {
    format!("PK\x03\x04batch-{batch}").into_bytes()
}

/// Provider handing out `token-N`, bumping N on every refresh
pub(crate) struct RotatingCredential {
    pub(crate) refreshes: AtomicU32,
}

impl RotatingCredential {
    pub(crate) fn new() -> Self {
        Self {
            refreshes: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl CredentialProvider for RotatingCredential {
    async fn current_token(&self) -> Result<Credential> {
        Ok(Credential::new("token-0"))
    }

    async fn refresh(&self) -> Result<Credential> {
        let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Credential::new(format!("token-{n}")))
    }
}

/// Config writing into `output_dir` with near-instant retries
pub(crate) fn test_config(output_dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.export.output_dir = output_dir.to_path_buf();
    config.export.request_timeout = Duration::from_secs(5);
    config.retry = RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        backoff_multiplier: 2.0,
        jitter: false,
    };
    config
}

/// `count` distinct descriptors
pub(crate) fn files(count: usize) -> Vec<FileDescriptor> {
    (0..count)
        .map(|i| {
            FileDescriptor::new(
                format!("GP_Right ({i}).JPG"),
                1000 + i as u64,
                format!("01ITEM{i:05}"),
            )
        })
        .collect()
}

/// Auth failure as returned by the endpoint
pub(crate) fn unauthorized() -> ExportError {
    ExportError::Auth {
        status: Some(401),
        message: "session expired".to_string(),
    }
}
