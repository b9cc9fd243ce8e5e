//! Core types for zip-export

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::error::{FailureReason, Result};

/// Identifier shared by every request of one export run
///
/// Sent as the request `guid` and, by default, embedded in archive names.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Create a fresh random run id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Form usable inside a file name: anything other than ASCII
    /// alphanumerics, `-`, `_` and `.` becomes `_`
    pub fn file_safe(&self) -> String {
        self.0
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}

impl From<&str> for RunId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for RunId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One remote file: display name, size in bytes and opaque document id
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// Display name, unique within a catalog
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// Opaque handle to the remote object
    #[serde(rename = "docId")]
    pub doc_id: String,
}

impl FileDescriptor {
    /// Create a new descriptor
    pub fn new(name: impl Into<String>, size: u64, doc_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size,
            doc_id: doc_id.into(),
        }
    }
}

/// A contiguous, non-empty group of descriptors submitted as one export request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Batch {
    number: u32,
    files: Vec<FileDescriptor>,
}

impl Batch {
    pub(crate) fn new(number: u32, files: Vec<FileDescriptor>) -> Self {
        Self { number, files }
    }

    /// 1-based sequence number, unique within a run
    pub fn number(&self) -> u32 {
        self.number
    }

    /// Files in catalog order
    pub fn files(&self) -> &[FileDescriptor] {
        &self.files
    }

    /// Number of files in the batch
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Returns true if the batch holds no files
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Sum of the declared file sizes
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    /// Keep only the batches whose numbers appear in `numbers`, preserving order
    ///
    /// Used to re-run the failed batches of a previous report.
    pub fn select<'a>(
        batches: impl IntoIterator<Item = Batch>,
        numbers: impl IntoIterator<Item = &'a u32>,
    ) -> Vec<Batch> {
        let wanted: BTreeSet<u32> = numbers.into_iter().copied().collect();
        batches
            .into_iter()
            .filter(|b| wanted.contains(&b.number))
            .collect()
    }
}

/// Terminal result of one batch
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchOutcome {
    /// Archive received and persisted
    Success {
        /// Batch sequence number
        batch_number: u32,
        /// Size of the persisted archive
        bytes_written: u64,
        /// Final archive location
        path: PathBuf,
        /// Export calls made, first call included
        attempts: u32,
    },
    /// No archive was persisted
    Failure {
        /// Batch sequence number
        batch_number: u32,
        /// Why the batch failed
        reason: FailureReason,
        /// Export calls made (0 when cancelled before dispatch)
        attempts: u32,
    },
}

impl BatchOutcome {
    /// Sequence number of the batch this outcome belongs to
    pub fn batch_number(&self) -> u32 {
        match self {
            BatchOutcome::Success { batch_number, .. }
            | BatchOutcome::Failure { batch_number, .. } => *batch_number,
        }
    }

    /// Returns true for [`BatchOutcome::Success`]
    pub fn is_success(&self) -> bool {
        matches!(self, BatchOutcome::Success { .. })
    }
}

/// Summary of an export run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunReport {
    /// Run the report belongs to
    pub run_id: RunId,
    /// Number of batches in the run
    pub total_batches: usize,
    /// Batches whose archive was persisted
    pub succeeded: BTreeSet<u32>,
    /// Batches that ended without an archive
    pub failed: BTreeMap<u32, FailureReason>,
    /// Archive locations of successful batches
    pub artifacts: BTreeMap<u32, PathBuf>,
    /// Total bytes persisted across all archives
    pub bytes_written: u64,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the last outcome was recorded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunReport {
    /// Create an empty report for `total_batches` batches
    pub fn new(run_id: RunId, total_batches: usize) -> Self {
        Self {
            run_id,
            total_batches,
            succeeded: BTreeSet::new(),
            failed: BTreeMap::new(),
            artifacts: BTreeMap::new(),
            bytes_written: 0,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Record a batch outcome
    ///
    /// Each batch number is recorded once; a second outcome for the same
    /// number is ignored and `false` is returned.
    pub fn record(&mut self, outcome: BatchOutcome) -> bool {
        let number = outcome.batch_number();
        if self.contains(number) {
            tracing::warn!(batch = number, "Ignoring duplicate outcome for batch");
            return false;
        }

        match outcome {
            BatchOutcome::Success {
                batch_number,
                bytes_written,
                path,
                ..
            } => {
                self.succeeded.insert(batch_number);
                self.artifacts.insert(batch_number, path);
                self.bytes_written += bytes_written;
            }
            BatchOutcome::Failure {
                batch_number,
                reason,
                ..
            } => {
                self.failed.insert(batch_number, reason);
            }
        }

        if self.is_finished() {
            self.finished_at = Some(Utc::now());
        }
        true
    }

    /// Returns true if an outcome for `batch_number` has been recorded
    pub fn contains(&self, batch_number: u32) -> bool {
        self.succeeded.contains(&batch_number) || self.failed.contains_key(&batch_number)
    }

    /// Number of batches with a recorded outcome
    pub fn completed(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    /// Returns true once every batch has an outcome
    pub fn is_finished(&self) -> bool {
        self.completed() >= self.total_batches
    }

    /// Returns true if every batch succeeded
    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty() && self.succeeded.len() == self.total_batches
    }

    /// Failed batch numbers in ascending order
    pub fn failed_batch_numbers(&self) -> Vec<u32> {
        self.failed.keys().copied().collect()
    }

    /// Number of batches that reached the export endpoint (not cancelled)
    pub fn attempted(&self) -> usize {
        self.succeeded.len()
            + self
                .failed
                .values()
                .filter(|r| !r.is_cancelled())
                .count()
    }

    /// Returns true if at least one batch was attempted and every attempted
    /// batch failed with an auth error
    pub fn all_attempted_failed_auth(&self) -> bool {
        let attempted = self.attempted();
        attempted > 0
            && self.succeeded.is_empty()
            && self.failed.values().filter(|r| r.is_auth()).count() == attempted
    }

    /// Write the report as pretty-printed JSON
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Events emitted during an export run
///
/// Subscribe with [`crate::Exporter::subscribe`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Run started
    RunStarted {
        /// Run id
        run_id: RunId,
        /// Number of batches to export
        total_batches: usize,
    },

    /// Batch dispatched to the export endpoint
    BatchStarted {
        /// Batch number
        batch: u32,
        /// Files in the batch
        files: usize,
    },

    /// Batch failed transiently and will be retried
    BatchRetrying {
        /// Batch number
        batch: u32,
        /// Attempt that just failed (1-based)
        attempt: u32,
        /// Failure message
        error: String,
    },

    /// Batch archive persisted
    BatchSucceeded {
        /// Batch number
        batch: u32,
        /// Archive size
        bytes_written: u64,
        /// Archive location
        path: PathBuf,
    },

    /// Batch ended without an archive
    BatchFailed {
        /// Batch number
        batch: u32,
        /// Why it failed
        reason: FailureReason,
    },

    /// Another batch reached a terminal outcome
    Progress {
        /// Batches with an outcome so far
        completed: usize,
        /// Batches in the run
        total: usize,
    },

    /// Every batch has an outcome
    RunFinished {
        /// Successful batches
        succeeded: usize,
        /// Failed batches
        failed: usize,
    },
}
