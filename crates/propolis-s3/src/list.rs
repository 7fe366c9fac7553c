//! Bucket listing XML
//!
//! A bucket list (`GET /?prefix=...&marker=...`) answers with a
//! `ListBucketResult` document. Only the fields the scanners need are
//! modeled; pagination walks `IsTruncated`/last-key until exhausted.

use serde::Deserialize;

use propolis_core::domain::SyncError;
use propolis_core::ports::{ListEntry, ListPage};

/// Top-level list response document
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListBucketResult {
    /// Bucket name (unused, kept for debugging dumps)
    #[serde(default)]
    pub name: Option<String>,
    /// Echoed request prefix
    #[serde(default)]
    pub prefix: Option<String>,
    /// Echoed request marker
    #[serde(default)]
    pub marker: Option<String>,
    /// Marker for the next page, when the server chooses to provide one
    #[serde(default)]
    pub next_marker: Option<String>,
    /// Echoed page size
    #[serde(default)]
    pub max_keys: Option<u32>,
    /// Whether more keys follow this page
    #[serde(default)]
    pub is_truncated: bool,
    /// The keys of this page
    #[serde(default)]
    pub contents: Vec<ListObject>,
}

/// One `<Contents>` element
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListObject {
    pub key: String,
    #[serde(default)]
    pub last_modified: String,
    #[serde(rename = "ETag", default)]
    pub e_tag: String,
    #[serde(default)]
    pub size: u64,
}

/// Parses a list response body into the port-level page type
pub fn parse_list(xml: &str) -> Result<ListPage, SyncError> {
    let result: ListBucketResult = quick_xml::de::from_str(xml).map_err(|e| SyncError::Remote {
        status: 200,
        status_line: format!("unparseable bucket list response: {e}"),
    })?;

    Ok(ListPage {
        entries: result
            .contents
            .into_iter()
            .map(|obj| ListEntry {
                key: obj.key,
                etag: obj.e_tag,
                size: obj.size,
                last_modified: obj.last_modified,
            })
            .collect(),
        is_truncated: result.is_truncated,
        next_marker: result.next_marker,
    })
}
