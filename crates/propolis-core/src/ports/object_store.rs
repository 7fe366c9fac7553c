//! Object store port (driven adapter boundary)
//!
//! The reconciler drives the remote side exclusively through this trait.
//! The production implementation signs and executes S3-compatible REST
//! requests; tests use an in-memory store.
//!
//! Result classification contract: 2xx is success, a 404 on `stat` is a
//! logical "absent" (success with the cache view left empty), anything
//! else is a [`SyncError::Remote`].

use tokio::io::AsyncWrite;

use crate::domain::errors::SyncError;
use crate::domain::record::{FileMeta, FileRecord};

/// One key from a bucket listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    /// Full key within the bucket
    pub key: String,
    /// Entity tag as sent by the server, still quoted
    pub etag: String,
    /// Object size in bytes
    pub size: u64,
    /// Last-modified timestamp, as reported
    pub last_modified: String,
}

impl ListEntry {
    /// The ETag with the surrounding quotes stripped: the hex md5 form
    /// the cache stores
    pub fn etag_hex(&self) -> &str {
        self.etag.trim_matches('"')
    }
}

/// One page of a bucket listing
#[derive(Debug, Clone)]
pub struct ListPage {
    /// Keys in this page, in lexicographic order
    pub entries: Vec<ListEntry>,
    /// Whether more pages follow
    pub is_truncated: bool,
    /// Marker for the next page, when the server provides one
    pub next_marker: Option<String>,
}

/// Signed access to one bucket
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// PUT the record's contents with its full metadata headers
    ///
    /// Consumes `record.contents`; the handle is released on any outcome.
    async fn upload(&self, record: &mut FileRecord) -> Result<(), SyncError>;

    /// DELETE the record's key
    async fn delete(&self, record: &FileRecord) -> Result<(), SyncError>;

    /// HEAD the record's key
    ///
    /// On 404 returns success with `record.cache` left `None`. On 2xx
    /// fills `record.cache` from the metadata headers and
    /// `record.server_hash_hex` from the ETag.
    async fn stat(&self, record: &mut FileRecord) -> Result<(), SyncError>;

    /// Server-to-server copy onto the record's key
    ///
    /// `src_full_path` is a bucket-qualified path (`/bucket/key`). The
    /// metadata directive is REPLACE: destination headers are rewritten
    /// from the record's local view.
    async fn copy(&self, record: &FileRecord, src_full_path: &str) -> Result<(), SyncError>;

    /// GET a key, streaming the body into `sink` while hashing it
    ///
    /// Fails with [`SyncError::Integrity`] when the computed md5 does not
    /// match the ETag. Returns the metadata parsed from the response
    /// headers so the caller can restore permissions and times.
    async fn download(
        &self,
        key: &str,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<FileMeta, SyncError>;

    /// List keys under a prefix, starting after `marker`
    ///
    /// When `recursive` is false a `/` delimiter is applied and only one
    /// directory level is returned.
    async fn list(
        &self,
        prefix: &str,
        marker: &str,
        max_keys: u32,
        recursive: bool,
    ) -> Result<ListPage, SyncError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn etag_hex_strips_quotes() {
        let entry = ListEntry {
            key: "a.txt".into(),
            etag: "\"d41d8cd98f00b204e9800998ecf8427e\"".into(),
            size: 0,
            last_modified: String::new(),
        };
        assert_eq!(entry.etag_hex(), "d41d8cd98f00b204e9800998ecf8427e");
    }
}
