//! Export orchestration -- the [`Exporter`] facade and its run loop.
//!
//! Split into focused submodules:
//! - [`orchestration`] - Batch validation, bounded dispatch, outcome accumulation
//! - [`batch_task`] - Per-batch lifecycle: build, call, retry, persist

mod batch_task;
mod orchestration;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod test_helpers;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::catalog::Catalog;
use crate::client::{ExportClient, HttpExportClient};
use crate::config::Config;
use crate::credentials::{CredentialManager, CredentialProvider};
use crate::error::Result;
use crate::request::ExportContext;
use crate::types::{Batch, Event, RunId, RunReport};
use crate::writer::ArchiveWriter;

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Callback invoked once per completed batch with `(completed, total)`
pub type ProgressCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Per-run options
#[derive(Clone, Default)]
pub struct RunOptions {
    /// Stops dispatching new batches when cancelled; in-flight batches finish
    pub cancel: CancellationToken,
    /// Live progress observer
    pub progress: Option<ProgressCallback>,
}

impl RunOptions {
    /// Options with a progress callback
    pub fn with_progress(progress: impl Fn(usize, usize) + Send + Sync + 'static) -> Self {
        Self {
            cancel: CancellationToken::new(),
            progress: Some(Arc::new(progress)),
        }
    }
}

impl std::fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOptions")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Batched, concurrency-bounded exporter
///
/// Owns the run configuration, the export client, the shared credential and
/// the archive writer. Each call to [`Exporter::run`] exports one set of
/// batches under this exporter's run id.
#[derive(Clone)]
pub struct Exporter {
    pub(crate) config: Arc<Config>,
    pub(crate) client: Arc<dyn ExportClient>,
    pub(crate) credentials: Arc<CredentialManager>,
    pub(crate) event_tx: broadcast::Sender<Event>,
    pub(crate) ctx: ExportContext,
    pub(crate) writer: ArchiveWriter,
}

impl Exporter {
    /// Create an exporter with a custom export client
    pub fn new(
        config: Config,
        client: Arc<dyn ExportClient>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self> {
        config.validate()?;

        let ctx = ExportContext {
            run_id: RunId::generate(),
            provider: config.export.provider.clone(),
            drive_items_url: config.export.drive_items_url.clone(),
            archive_prefix: config.export.archive_prefix.clone(),
            include_run_id: config.export.include_run_id_in_name,
        };
        let writer = ArchiveWriter::new(config.export.output_dir.clone(), ctx.clone());
        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            config: Arc::new(config),
            client,
            credentials: Arc::new(CredentialManager::new(credentials)),
            event_tx,
            ctx,
            writer,
        })
    }

    /// Create an exporter talking to the configured HTTP endpoint
    pub fn with_http(config: Config, credentials: Arc<dyn CredentialProvider>) -> Result<Self> {
        let client = HttpExportClient::new(&config.export)?;
        Self::new(config, Arc::new(client), credentials)
    }

    /// Use `run_id` instead of a generated one
    ///
    /// Reusing a previous run id makes archives land on the same names.
    pub fn with_run_id(mut self, run_id: impl Into<RunId>) -> Self {
        self.ctx.run_id = run_id.into();
        self.writer = ArchiveWriter::new(self.config.export.output_dir.clone(), self.ctx.clone());
        self
    }

    /// Run identifier sent with every request
    pub fn run_id(&self) -> &RunId {
        &self.ctx.run_id
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Archive writer used for successful batches
    pub fn writer(&self) -> &ArchiveWriter {
        &self.writer
    }

    /// Subscribe to run events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Partition `catalog` with the configured batch size
    pub fn partition(&self, catalog: &Catalog) -> Result<Vec<Batch>> {
        catalog.partition(self.config.export.max_batch_size)
    }

    /// Export a whole catalog
    pub async fn export_catalog(
        &self,
        catalog: &Catalog,
        options: RunOptions,
    ) -> Result<RunReport> {
        let batches = self.partition(catalog)?;
        tracing::info!(
            run_id = %self.ctx.run_id,
            files = catalog.len(),
            total_bytes = catalog.total_size(),
            batches = batches.len(),
            "Exporting catalog"
        );
        self.run(batches, options).await
    }

    /// Export only the batches that failed in `previous`
    ///
    /// The catalog is partitioned exactly as before, so batch numbers line up
    /// with the earlier report.
    pub async fn rerun_failed(
        &self,
        catalog: &Catalog,
        previous: &RunReport,
        options: RunOptions,
    ) -> Result<RunReport> {
        let batches = Batch::select(self.partition(catalog)?, previous.failed.keys());
        tracing::info!(
            run_id = %self.ctx.run_id,
            previous_run = %previous.run_id,
            batches = batches.len(),
            "Re-running failed batches"
        );
        self.run(batches, options).await
    }

    /// Emit an event to subscribers, ignoring the no-subscriber case
    pub(crate) fn emit(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}

impl std::fmt::Debug for Exporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exporter")
            .field("run_id", &self.ctx.run_id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
