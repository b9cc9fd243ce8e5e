//! Splitting a catalog into export batches.

use crate::error::{Error, Result};
use crate::types::{Batch, FileDescriptor};

/// Partition `files` into contiguous, order-preserving batches of at most
/// `max_batch_size` entries.
///
/// Batch `i` (numbered `i + 1`) holds `files[i * max .. (i + 1) * max]`. Only the
/// last batch may be short, and an empty input yields no batches.
pub fn partition(files: &[FileDescriptor], max_batch_size: usize) -> Result<Vec<Batch>> {
    if max_batch_size == 0 {
        return Err(Error::Validation("max batch size must be at least 1".to_string()));
    }

    files
        .chunks(max_batch_size)
        .enumerate()
        .map(|(index, chunk)| {
            let number = u32::try_from(index + 1).map_err(|_| {
                Error::Validation(format!("too many batches ({})", index + 1))
            })?;
            Ok(Batch::new(number, chunk.to_vec()))
        })
        .collect()
}
