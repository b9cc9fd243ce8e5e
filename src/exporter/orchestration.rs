//! Run orchestration -- validate batches, dispatch them with bounded
//! concurrency and fold outcomes into the [`RunReport`].

use futures::stream::{self, StreamExt};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::request::ExportRequest;
use crate::types::{Batch, BatchOutcome, Event, RunReport};

use super::batch_task::{BatchResult, BatchTaskContext, process_batch};
use super::{Exporter, RunOptions};

impl Exporter {
    /// Export `batches` and return the run report
    ///
    /// At most `concurrency` batches are in flight; a failing batch never
    /// stops its siblings. The call fails only if the batches are malformed
    /// (nothing is dispatched) or if every attempted batch was rejected for
    /// authentication reasons ([`Error::CredentialRejected`]).
    pub async fn run(&self, batches: Vec<Batch>, options: RunOptions) -> Result<RunReport> {
        validate_batches(&batches, self.config.export.max_batch_size)?;

        let total = batches.len();
        let concurrency = self.config.export.concurrency.max(1);
        let mut report = RunReport::new(self.ctx.run_id.clone(), total);

        tracing::info!(
            run_id = %self.ctx.run_id,
            total_batches = total,
            concurrency,
            "Export run started"
        );
        self.emit(Event::RunStarted {
            run_id: self.ctx.run_id.clone(),
            total_batches: total,
        });

        if total == 0 {
            self.emit(Event::RunFinished {
                succeeded: 0,
                failed: 0,
            });
            return Ok(report);
        }

        // Child token: the auth sampler may stop this run without touching the caller's token
        let run_cancel = options.cancel.child_token();
        let task_ctx = Arc::new(BatchTaskContext {
            client: Arc::clone(&self.client),
            credentials: Arc::clone(&self.credentials),
            export_ctx: self.ctx.clone(),
            writer: self.writer.clone(),
            retry: self.config.retry.clone(),
            request_timeout: self.config.export.request_timeout,
            event_tx: self.event_tx.clone(),
            cancel: run_cancel.clone(),
        });

        let mut sampler = AuthSampler::new(self.config.export.auth_failure_sample().min(total));

        let mut outcomes = stream::iter(batches)
            .map(|batch| process_batch(Arc::clone(&task_ctx), batch))
            .buffer_unordered(concurrency);

        while let Some(result) = outcomes.next().await {
            self.announce(&result.outcome);
            sampler.observe(&result, &run_cancel);

            if !report.record(result.outcome) {
                continue;
            }
            let completed = report.completed();
            self.emit(Event::Progress { completed, total });
            if let Some(progress) = &options.progress {
                progress(completed, total);
            }
        }

        tracing::info!(
            run_id = %self.ctx.run_id,
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            bytes_written = report.bytes_written,
            "Export run finished"
        );
        self.emit(Event::RunFinished {
            succeeded: report.succeeded.len(),
            failed: report.failed.len(),
        });

        if report.all_attempted_failed_auth() {
            let attempted = report.attempted();
            tracing::error!(
                run_id = %self.ctx.run_id,
                attempted,
                "Every attempted batch was rejected for authentication"
            );
            return Err(Error::CredentialRejected {
                attempted,
                report: Box::new(report),
            });
        }

        Ok(report)
    }

    /// Log and emit the terminal event of one batch
    fn announce(&self, outcome: &BatchOutcome) {
        match outcome {
            BatchOutcome::Success {
                batch_number,
                bytes_written,
                path,
                attempts,
            } => {
                tracing::info!(
                    batch = batch_number,
                    bytes = bytes_written,
                    attempts,
                    path = %path.display(),
                    "Batch exported"
                );
                self.emit(Event::BatchSucceeded {
                    batch: *batch_number,
                    bytes_written: *bytes_written,
                    path: path.clone(),
                });
            }
            BatchOutcome::Failure {
                batch_number,
                reason,
                attempts,
            } => {
                tracing::warn!(
                    batch = batch_number,
                    attempts,
                    reason = %reason,
                    "Batch failed"
                );
                self.emit(Event::BatchFailed {
                    batch: *batch_number,
                    reason: reason.clone(),
                });
            }
        }
    }
}

/// Reject batch sets that must not be dispatched at all
fn validate_batches(batches: &[Batch], max_batch_size: usize) -> Result<()> {
    let mut numbers = BTreeSet::new();
    for batch in batches {
        ExportRequest::validate(batch)?;
        if batch.len() > max_batch_size {
            return Err(Error::Validation(format!(
                "batch {} has {} files, more than the maximum of {}",
                batch.number(),
                batch.len(),
                max_batch_size
            )));
        }
        if !numbers.insert(batch.number()) {
            return Err(Error::Validation(format!(
                "batch number {} appears more than once",
                batch.number()
            )));
        }
    }
    Ok(())
}

/// Detects a globally rejected credential from the first completed batches
///
/// If the first `sample_size` attempted outcomes, in completion order, are
/// all auth failures, the run is cancelled so no further batches are sent
/// with a credential the endpoint keeps refusing. An auth failure after
/// which the credential moved to a newer generation is not counted: later
/// batches use a different token. Cancelled batches are not counted either.
struct AuthSampler {
    sample_size: usize,
    seen: usize,
    auth_failures: usize,
}

impl AuthSampler {
    fn new(sample_size: usize) -> Self {
        Self {
            sample_size,
            seen: 0,
            auth_failures: 0,
        }
    }

    fn observe(&mut self, result: &BatchResult, cancel: &CancellationToken) {
        if self.seen >= self.sample_size || result.credential_refreshed {
            return;
        }
        let is_auth = match &result.outcome {
            BatchOutcome::Success { .. } => false,
            BatchOutcome::Failure { reason, .. } if reason.is_cancelled() => return,
            BatchOutcome::Failure { reason, .. } => reason.is_auth(),
        };

        self.seen += 1;
        if is_auth {
            self.auth_failures += 1;
        }

        if self.seen == self.sample_size && self.auth_failures == self.sample_size {
            tracing::error!(
                sample = self.sample_size,
                "All sampled batches failed authentication, stopping dispatch"
            );
            cancel.cancel();
        }
    }
}
