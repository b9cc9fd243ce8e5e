//! Catalog fixtures and canned endpoint payloads

use zip_export::{Catalog, FileDescriptor};

/// Bytes served as a successful archive
pub const ZIP_PAYLOAD: &[u8] = b"PK\x03\x04\x14\x00\x00\x00fake-archive";

/// One page of the document library's list data: two files and a folder
pub const LIST_DATA_PAGE: &str = r#"{
  "ListData": {
    "Row": [
      {
        "FileLeafRef": "GP_Right (1).JPG",
        "File_x0020_Size": "5242880",
        "FSObjType": "0",
        ".spItemUrl": "https://tenant.sharepoint.com:443/_api/v2.0/drives/b!z/items/01OBEEJLAAA?version=Published"
      },
      {
        "FileLeafRef": "Archive",
        "FSObjType": "1",
        ".spItemUrl": "https://tenant.sharepoint.com:443/_api/v2.0/drives/b!z/items/01OBEEJLDIR?version=Published"
      },
      {
        "FileLeafRef": "GP_Right (2).JPG",
        "File_x0020_Size": "1048576",
        "FSObjType": "0",
        ".spItemUrl": "https://tenant.sharepoint.com:443/_api/v2.0/drives/b!z/items/01OBEEJLBBB?version=Published"
      }
    ]
  }
}"#;

/// Catalog of `count` distinct photos
pub fn photo_catalog(count: usize) -> Catalog {
    let files = (0..count)
        .map(|i| {
            FileDescriptor::new(
                format!("GP_Right ({}).JPG", i + 1),
                4_000_000 + i as u64,
                format!("01OBEEJL{:06}", i),
            )
        })
        .collect();
    Catalog::new(files).unwrap()
}
