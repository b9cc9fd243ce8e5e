//! Archive persistence.

use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use crate::error::WriteError;
use crate::request::ExportContext;

/// Suffix of the temporary file an archive is written to before the rename
const PARTIAL_SUFFIX: &str = ".part";

/// Writes one archive per successful batch under a batch-numbered name
#[derive(Clone, Debug)]
pub struct ArchiveWriter {
    output_dir: PathBuf,
    ctx: ExportContext,
}

impl ArchiveWriter {
    /// Create a writer placing archives in `output_dir`, named like the
    /// `zipFileName` requested for the same batch
    pub fn new(output_dir: impl Into<PathBuf>, ctx: ExportContext) -> Self {
        Self {
            output_dir: output_dir.into(),
            ctx,
        }
    }

    /// Directory receiving the archives
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Final location of the archive for `batch_number`
    pub fn path_for(&self, batch_number: u32) -> PathBuf {
        self.output_dir.join(self.ctx.archive_file_name(batch_number))
    }

    /// Persist `payload` for `batch_number` and return its final path
    ///
    /// The payload is written to a temporary sibling file and renamed into
    /// place once fully flushed, so the final path either holds the complete
    /// payload or does not exist.
    pub async fn write(&self, batch_number: u32, payload: &[u8]) -> Result<PathBuf, WriteError> {
        let final_path = self.path_for(batch_number);
        let mut partial = final_path.clone().into_os_string();
        partial.push(PARTIAL_SUFFIX);
        let partial_path = PathBuf::from(partial);

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|source| WriteError {
                path: self.output_dir.clone(),
                source,
            })?;

        if let Err(e) = write_synced(&partial_path, payload).await {
            remove_partial(&partial_path).await;
            return Err(WriteError {
                path: partial_path,
                source: e,
            });
        }

        if let Err(e) = tokio::fs::rename(&partial_path, &final_path).await {
            remove_partial(&partial_path).await;
            return Err(WriteError {
                path: final_path,
                source: e,
            });
        }

        tracing::debug!(
            batch = batch_number,
            path = %final_path.display(),
            bytes = payload.len(),
            "Archive written"
        );
        Ok(final_path)
    }
}

async fn write_synced(path: &Path, payload: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(payload).await?;
    file.sync_all().await?;
    Ok(())
}

async fn remove_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(path = %path.display(), error = %e, "Failed to remove partial archive");
    }
}
