//! Per-batch lifecycle -- build the request, call the endpoint with retry,
//! refresh the credential on auth failures and persist the archive.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::client::ExportClient;
use crate::config::RetryConfig;
use crate::credentials::CredentialManager;
use crate::error::{ExportError, FailureReason};
use crate::request::{ExportContext, ExportRequest};
use crate::retry::retry_with_backoff;
use crate::types::{Batch, BatchOutcome, Event};
use crate::writer::ArchiveWriter;

/// State shared by every batch task of one run
pub(super) struct BatchTaskContext {
    pub(super) client: Arc<dyn ExportClient>,
    pub(super) credentials: Arc<CredentialManager>,
    pub(super) export_ctx: ExportContext,
    pub(super) writer: ArchiveWriter,
    pub(super) retry: RetryConfig,
    pub(super) request_timeout: Duration,
    pub(super) event_tx: broadcast::Sender<Event>,
    /// Run-level token; once cancelled, batches not yet started are skipped
    pub(super) cancel: CancellationToken,
}

/// Terminal outcome of one batch plus what its auth handling achieved
pub(super) struct BatchResult {
    pub(super) outcome: BatchOutcome,
    /// A newer credential generation than the one this batch used is available
    pub(super) credential_refreshed: bool,
}

impl From<BatchOutcome> for BatchResult {
    fn from(outcome: BatchOutcome) -> Self {
        Self {
            outcome,
            credential_refreshed: false,
        }
    }
}

/// Drive one batch to a terminal outcome
///
/// Never fails: every error is folded into a [`BatchOutcome::Failure`].
pub(super) async fn process_batch(ctx: Arc<BatchTaskContext>, batch: Batch) -> BatchResult {
    let batch_number = batch.number();

    if ctx.cancel.is_cancelled() {
        tracing::debug!(batch = batch_number, "Run cancelled, batch not dispatched");
        return BatchOutcome::Failure {
            batch_number,
            reason: FailureReason::Cancelled,
            attempts: 0,
        }
        .into();
    }

    tracing::debug!(
        batch = batch_number,
        files = batch.len(),
        bytes = batch.total_size(),
        "Starting batch"
    );
    ctx.event_tx
        .send(Event::BatchStarted {
            batch: batch_number,
            files: batch.len(),
        })
        .ok();

    // Generation of the credential used by the latest attempt
    let generation = AtomicU64::new(0);

    let attempted = retry_with_backoff(
        &ctx.retry,
        &ctx.cancel,
        |attempt| attempt_export(&ctx, &batch, &generation, attempt),
        |attempt, error, delay| {
            tracing::debug!(
                batch = batch_number,
                attempt,
                delay_ms = delay.as_millis(),
                "Batch will be retried"
            );
            ctx.event_tx
                .send(Event::BatchRetrying {
                    batch: batch_number,
                    attempt,
                    error: error.to_string(),
                })
                .ok();
        },
    )
    .await;
    let attempts = attempted.attempts;

    match attempted.result {
        Ok(payload) => match ctx.writer.write(batch_number, &payload).await {
            Ok(path) => BatchOutcome::Success {
                batch_number,
                bytes_written: payload.len() as u64,
                path,
                attempts,
            }
            .into(),
            Err(e) => {
                tracing::error!(batch = batch_number, error = %e, "Failed to persist archive");
                BatchOutcome::Failure {
                    batch_number,
                    reason: FailureReason::from(&e),
                    attempts,
                }
                .into()
            }
        },
        Err(e) => {
            let credential_refreshed = if matches!(e, ExportError::Auth { .. }) {
                refresh_credential(&ctx, batch_number, generation.load(Ordering::SeqCst)).await
            } else {
                false
            };
            BatchResult {
                outcome: BatchOutcome::Failure {
                    batch_number,
                    reason: FailureReason::from(e),
                    attempts,
                },
                credential_refreshed,
            }
        }
    }
}

/// One export call with a freshly built request and the current credential
async fn attempt_export(
    ctx: &BatchTaskContext,
    batch: &Batch,
    generation: &AtomicU64,
    attempt: u32,
) -> Result<Vec<u8>, ExportError> {
    let current = ctx
        .credentials
        .current()
        .await
        .map_err(|e| ExportError::Auth {
            status: None,
            message: format!("no credential available: {}", e),
        })?;
    generation.store(current.generation, Ordering::SeqCst);

    let request = ExportRequest::build(batch, &ctx.export_ctx, &current.credential)
        .map_err(|e| ExportError::InvalidRequest(e.to_string()))?;

    tracing::debug!(
        batch = batch.number(),
        attempt,
        generation = current.generation,
        zip_file_name = %request.zip_file_name,
        "Exporting batch"
    );

    match tokio::time::timeout(
        ctx.request_timeout,
        ctx.client.export(&request, &current.credential),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(ExportError::Timeout(ctx.request_timeout)),
    }
}

/// Ask for a fresh credential after `generation` was rejected
///
/// Returns whether a newer generation is now in use. A failed refresh only
/// affects later attempts; the batch outcome is already decided.
async fn refresh_credential(ctx: &BatchTaskContext, batch_number: u32, generation: u64) -> bool {
    match ctx.credentials.refresh_after(generation).await {
        Ok(refreshed) => {
            tracing::info!(
                batch = batch_number,
                generation = refreshed.generation,
                "Credential refreshed after auth failure"
            );
            refreshed.generation > generation
        }
        Err(e) => {
            tracing::warn!(
                batch = batch_number,
                error = %e,
                "Credential refresh failed, later batches keep the current token"
            );
            false
        }
    }
}
