//! Export request construction.
//!
//! A request is rebuilt for every attempt so that a refreshed credential is
//! picked up and no stale session data carries over between attempts.

use serde::Serialize;

use crate::credentials::Credential;
use crate::error::{Error, Result};
use crate::types::{Batch, RunId};

/// Name of the archive produced for `batch_number`
///
/// Shared by request construction and the archive writer so a request and
/// its artifact can be correlated afterwards.
pub fn archive_file_name(prefix: &str, run_id: Option<&RunId>, batch_number: u32) -> String {
    match run_id {
        Some(run_id) => format!("{}_{}_{}.zip", prefix, run_id.file_safe(), batch_number),
        None => format!("{}_{}.zip", prefix, batch_number),
    }
}

/// Per-run settings needed to build requests
#[derive(Clone, Debug)]
pub struct ExportContext {
    /// Run identifier, sent as the request guid
    pub run_id: RunId,
    /// Storage provider tag
    pub provider: String,
    /// Base drive URL used to expand item ids into document URLs
    pub drive_items_url: Option<String>,
    /// Archive name prefix
    pub archive_prefix: String,
    /// Embed the run id in archive names
    pub include_run_id: bool,
}

impl ExportContext {
    /// Archive name for `batch_number` under this context
    pub fn archive_file_name(&self, batch_number: u32) -> String {
        let run_id = self.include_run_id.then_some(&self.run_id);
        archive_file_name(&self.archive_prefix, run_id, batch_number)
    }
}

/// One entry of the request's item list
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportItem {
    /// Display name inside the archive
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// Document reference understood by the export service
    pub doc_id: String,
    /// Always false: only files are exported
    pub is_folder: bool,
}

/// Fully built export request for one batch
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportRequest {
    /// Batch sequence number
    pub batch_number: u32,
    /// Name of the archive the service should produce
    pub zip_file_name: String,
    /// Run-scoped correlation id
    pub correlation_id: String,
    /// Storage provider tag
    pub provider: String,
    /// Files to include, in catalog order
    pub items: Vec<ExportItem>,
    /// The session token is already embedded in every item's document reference
    pub token_in_items: bool,
}

#[derive(Serialize)]
struct ItemList<'a> {
    items: &'a [ExportItem],
}

impl ExportRequest {
    /// Check that `batch` can be turned into a request
    ///
    /// Fails with [`Error::Validation`] if the batch is empty or any file has a blank name.
    pub fn validate(batch: &Batch) -> Result<()> {
        if batch.is_empty() {
            return Err(Error::Validation(format!(
                "batch {} has no files",
                batch.number()
            )));
        }
        if let Some(file) = batch.files().iter().find(|f| f.name.trim().is_empty()) {
            return Err(Error::Validation(format!(
                "batch {} contains a file with an empty name (doc id {})",
                batch.number(),
                file.doc_id
            )));
        }
        Ok(())
    }

    /// Build the request for `batch` using the current `credential`
    pub fn build(batch: &Batch, ctx: &ExportContext, credential: &Credential) -> Result<Self> {
        Self::validate(batch)?;

        let items = batch
            .files()
            .iter()
            .map(|file| ExportItem {
                name: file.name.clone(),
                size: file.size,
                doc_id: doc_reference(ctx, &file.doc_id, credential),
                is_folder: false,
            })
            .collect();

        Ok(Self {
            batch_number: batch.number(),
            zip_file_name: ctx.archive_file_name(batch.number()),
            correlation_id: ctx.run_id.to_string(),
            provider: ctx.provider.clone(),
            items,
            token_in_items: ctx.drive_items_url.is_some(),
        })
    }

    /// URL-encoded form fields as expected by the zip export endpoint
    ///
    /// When the token already travels inside each item's document reference,
    /// `oAuthToken` is left empty.
    pub fn form_fields(&self, credential: &Credential) -> Result<Vec<(&'static str, String)>> {
        let files = serde_json::to_string(&ItemList { items: &self.items })?;
        let oauth_token = if self.token_in_items {
            String::new()
        } else {
            credential.expose().to_string()
        };
        Ok(vec![
            ("zipFileName", self.zip_file_name.clone()),
            ("guid", self.correlation_id.clone()),
            ("provider", self.provider.clone()),
            ("files", files),
            ("oAuthToken", oauth_token),
        ])
    }
}

/// Document reference for one item
///
/// With a drive URL configured, the item id is expanded into a published
/// item URL carrying the session token; otherwise the id is passed through.
fn doc_reference(ctx: &ExportContext, doc_id: &str, credential: &Credential) -> String {
    match ctx.drive_items_url.as_deref() {
        Some(base) => format!(
            "{}/items/{}?version=Published&access_token={}",
            base.trim_end_matches('/'),
            doc_id,
            credential.expose()
        ),
        None => doc_id.to_string(),
    }
}
