//! # zip-export
//!
//! Batched, concurrency-bounded bulk export of cloud document-library files
//! through a zip export endpoint.
//!
//! ## Design Philosophy
//!
//! zip-export is designed to be:
//! - **Batch-isolated** - One failing batch never stops its siblings
//! - **Bounded** - A fixed number of export calls in flight, each with a timeout
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to events or pass a progress callback
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use zip_export::{Catalog, Config, Exporter, RunOptions, StaticCredential};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.export.origin = Some("https://tenant.sharepoint.com".to_string());
//!
//!     let catalog = Catalog::load_json("files.json")?;
//!     let credentials = Arc::new(StaticCredential::new("session-token"));
//!     let exporter = Exporter::with_http(config, credentials)?;
//!
//!     // Subscribe to events
//!     let mut events = exporter.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let options = RunOptions::default();
//!     zip_export::cancel_on_signal(options.cancel.clone());
//!
//!     let report = exporter.export_catalog(&catalog, options).await?;
//!     println!("failed batches: {:?}", report.failed_batch_numbers());
//!     report.write_json("report.json")?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Catalog partitioning into batches
pub mod batcher;
/// File catalog loading and listing-page parsing
pub mod catalog;
/// Export endpoint client
pub mod client;
/// Configuration types
pub mod config;
/// Session credentials and single-flight refresh
pub mod credentials;
/// Error types
pub mod error;
/// Export orchestration
pub mod exporter;
/// Export request construction
pub mod request;
/// Retry logic with exponential backoff
pub mod retry;
/// Core types and events
pub mod types;
/// Archive persistence
pub mod writer;

// Re-export commonly used types
pub use catalog::Catalog;
pub use client::{ExportClient, HttpExportClient};
pub use config::{Config, ExportConfig, RetryConfig};
pub use credentials::{Credential, CredentialProvider, StaticCredential};
pub use error::{CatalogError, Error, ExportError, FailureReason, Result, WriteError};
pub use exporter::{Exporter, ProgressCallback, RunOptions};
pub use request::{ExportContext, ExportRequest};
pub use types::{Batch, BatchOutcome, Event, FileDescriptor, RunId, RunReport};
pub use writer::ArchiveWriter;

use tokio_util::sync::CancellationToken;

/// Cancel `token` when the process receives a termination signal.
///
/// Spawns a task that waits for a signal and then cancels the token, which
/// stops an export run from dispatching further batches; in-flight batches
/// finish and the run still returns its report. The task ends without
/// cancelling anything if `token` is cancelled first.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// Must be called from within a tokio runtime.
pub fn cancel_on_signal(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = wait_for_signal() => {
                tracing::info!("Stopping export run after signal");
                token.cancel();
            }
            _ = token.cancelled() => {}
        }
    })
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(
                error = %e,
                "Could not register SIGTERM handler, waiting for SIGINT only"
            );
            sigint.recv().await;
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(
                error = %e,
                "Could not register SIGINT handler, waiting for SIGTERM only"
            );
            sigterm.recv().await;
            tracing::info!("Received SIGTERM signal");
        }
        (Err(e), Err(_)) => {
            tracing::error!(
                error = %e,
                "Could not register any signal handlers, using ctrl_c fallback"
            );
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
