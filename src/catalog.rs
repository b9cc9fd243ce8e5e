//! File catalog loading and validation
//!
//! The catalog is produced by a separate listing step that pages through a
//! document library. It is persisted as a JSON array of
//! `{"filename", "file_size", "file_id"}` records; this module reads that
//! file, validates it and hands out an immutable descriptor sequence.
//!
//! [`parse_list_rows`] turns one page of the library's list-data response
//! into descriptors, so a listing collaborator only has to deal with paging.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::batcher;
use crate::error::{CatalogError, Result};
use crate::types::{Batch, FileDescriptor};

/// Validated, ordered set of files to export
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Catalog {
    files: Vec<FileDescriptor>,
}

/// Size as emitted by the listing service: sometimes a number, sometimes a string
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SizeField {
    Number(u64),
    Text(String),
}

/// On-disk record shape
#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(default, alias = "name")]
    filename: Option<String>,
    #[serde(default, alias = "size")]
    file_size: Option<SizeField>,
    #[serde(default, alias = "docId", alias = "id")]
    file_id: Option<String>,
}

#[derive(Serialize)]
struct RecordOut<'a> {
    filename: &'a str,
    file_size: u64,
    file_id: &'a str,
}

impl Catalog {
    /// Build a catalog, rejecting blank names, blank ids and repeated names
    pub fn new(files: Vec<FileDescriptor>) -> std::result::Result<Self, CatalogError> {
        let mut seen = HashSet::with_capacity(files.len());
        for (index, file) in files.iter().enumerate() {
            if file.name.trim().is_empty() {
                return Err(CatalogError::MissingName { index });
            }
            if file.doc_id.trim().is_empty() {
                return Err(CatalogError::MissingId {
                    index,
                    name: file.name.clone(),
                });
            }
            if !seen.insert(file.name.as_str()) {
                return Err(CatalogError::DuplicateName {
                    name: file.name.clone(),
                });
            }
        }
        Ok(Self { files })
    }

    /// Parse a catalog from its JSON representation
    pub fn from_json_str(json: &str) -> std::result::Result<Self, CatalogError> {
        let records: Vec<RawRecord> =
            serde_json::from_str(json).map_err(|e| CatalogError::Parse(e.to_string()))?;

        let files = records
            .into_iter()
            .enumerate()
            .map(|(index, record)| record.into_descriptor(index))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Self::new(files)
    }

    /// Load a catalog file written by the listing step
    pub fn load_json(path: impl AsRef<Path>) -> std::result::Result<Self, CatalogError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let catalog = Self::from_json_str(&raw)?;
        tracing::debug!(path = %path.display(), files = catalog.len(), "Loaded catalog");
        Ok(catalog)
    }

    /// Write the catalog in the same shape [`Catalog::load_json`] reads
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let records: Vec<RecordOut<'_>> = self
            .files
            .iter()
            .map(|f| RecordOut {
                filename: &f.name,
                file_size: f.size,
                file_id: &f.doc_id,
            })
            .collect();
        let json = serde_json::to_vec(&records)?;
        let path = path.as_ref();
        std::fs::write(path, json).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    /// Descriptors in catalog order
    pub fn files(&self) -> &[FileDescriptor] {
        &self.files
    }

    /// Number of files
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Returns true if the catalog holds no files
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Sum of the declared file sizes
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    /// Split into export batches, see [`batcher::partition`]
    pub fn partition(&self, max_batch_size: usize) -> Result<Vec<Batch>> {
        batcher::partition(&self.files, max_batch_size)
    }
}

impl RawRecord {
    fn into_descriptor(self, index: usize) -> std::result::Result<FileDescriptor, CatalogError> {
        let name = match self.filename {
            Some(name) if !name.trim().is_empty() => name,
            _ => return Err(CatalogError::MissingName { index }),
        };
        let doc_id = match self.file_id {
            Some(id) if !id.trim().is_empty() => id,
            _ => return Err(CatalogError::MissingId { index, name }),
        };
        let size = match self.file_size {
            Some(SizeField::Number(n)) => n,
            Some(SizeField::Text(s)) => s.trim().parse().map_err(|_| {
                CatalogError::Parse(format!("record {index} ({name}) has invalid size '{s}'"))
            })?,
            None => {
                return Err(CatalogError::Parse(format!("record {index} ({name}) has no size")));
            }
        };
        Ok(FileDescriptor { name, size, doc_id })
    }
}

/// Extract the item id from a drive item URL
///
/// Returns the segment following `items/`, up to the next `?` or `/`.
///
/// # Examples
///
/// ```
/// use zip_export::catalog::extract_item_id;
///
/// let url = "https://tenant.sharepoint.com/_api/v2.0/drives/b!abc/items/01OBEEJL?version=Published";
/// assert_eq!(extract_item_id(url), Some("01OBEEJL"));
/// assert_eq!(extract_item_id("https://tenant.sharepoint.com/other"), None);
/// ```
pub fn extract_item_id(url: &str) -> Option<&str> {
    const MARKER: &str = "items/";
    let start = url.find(MARKER)? + MARKER.len();
    let rest = &url[start..];
    let end = rest.find(['?', '/'])?;
    let id = &rest[..end];
    (!id.is_empty()).then_some(id)
}

/// List-data page as returned by the document library
#[derive(Debug, Deserialize)]
struct ListDataPage {
    #[serde(rename = "ListData")]
    list_data: ListData,
}

#[derive(Debug, Deserialize)]
struct ListData {
    #[serde(rename = "Row", default)]
    rows: Vec<ListRow>,
}

#[derive(Debug, Deserialize)]
struct ListRow {
    #[serde(rename = "FileLeafRef", default)]
    file_leaf_ref: Option<String>,
    #[serde(rename = "File_x0020_Size", default)]
    file_size: Option<SizeField>,
    #[serde(rename = ".spItemUrl", default)]
    item_url: Option<String>,
    #[serde(rename = "FSObjType", default)]
    fs_obj_type: Option<String>,
}

/// Convert one list-data page into file descriptors
///
/// Folder rows are skipped. A file row whose item URL carries no id is an error.
pub fn parse_list_rows(json: &str) -> std::result::Result<Vec<FileDescriptor>, CatalogError> {
    let page: ListDataPage =
        serde_json::from_str(json).map_err(|e| CatalogError::Parse(e.to_string()))?;

    let mut files = Vec::with_capacity(page.list_data.rows.len());
    for (index, row) in page.list_data.rows.into_iter().enumerate() {
        if row.fs_obj_type.as_deref() == Some("1") {
            continue;
        }
        let doc_id = row
            .item_url
            .as_deref()
            .and_then(extract_item_id)
            .map(str::to_string);
        let record = RawRecord {
            filename: row.file_leaf_ref,
            file_size: row.file_size,
            file_id: doc_id,
        };
        files.push(record.into_descriptor(index)?);
    }
    Ok(files)
}
