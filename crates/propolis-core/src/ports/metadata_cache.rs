//! Metadata cache port (driven adapter boundary)
//!
//! The durable key→metadata table that makes reconciliation cheap: when a
//! row agrees with the local view, no wire call is needed at all.
//!
//! Ordering contract (crash safety): callers delete the row for a path
//! *before* starting a destructive remote mutation and write it back only
//! *after* the mutation is acknowledged. A crash in between leaves a
//! "cache says absent" state that the next run repairs.

use crate::domain::errors::SyncError;
use crate::domain::record::{FileMeta, FileRecord};

/// One row of the cache table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRow {
    /// Server key (primary key of the table)
    pub key: String,
    /// Hex md5 of the remote content
    pub md5: String,
    /// Metadata last known to match the remote object
    pub meta: FileMeta,
}

/// Durable per-bucket metadata store
///
/// All mutating operations are durable on return. `audit` runs in a
/// single transaction; per-path mutations may stand alone.
#[async_trait::async_trait]
pub trait MetadataCache: Send + Sync {
    /// Loads the row for the record's key into `record.cache` and
    /// `record.cache_hash_hex`, leaving both `None` when absent
    async fn get_file_info(&self, record: &mut FileRecord) -> Result<(), SyncError>;

    /// Upserts the row for the record's key
    ///
    /// With `use_local` the source of truth is the local view and hash;
    /// otherwise the cache view and server hash (used when learning about
    /// an object from the server itself).
    async fn set_file_info(&self, record: &FileRecord, use_local: bool) -> Result<(), SyncError>;

    /// Removes the row for the record's key; idempotent
    async fn delete_file_info(&self, record: &FileRecord) -> Result<(), SyncError>;

    /// Finds a key whose row carries the given md5 and size
    ///
    /// Prefers `preferred_key` when its row already has that hash (a pure
    /// metadata update); otherwise returns any matching key, or `None`.
    /// Size must match as well as hash: copying on hash alone would
    /// produce wrong bytes if digests ever collide at different sizes.
    async fn path_for_md5(
        &self,
        md5: &str,
        size: u64,
        preferred_key: &str,
    ) -> Result<Option<String>, SyncError>;

    /// Finds a key other than `excluding_key` whose row carries the given
    /// md5 and size
    ///
    /// The pull-side twin lookup: a matching row names a local file whose
    /// content can be copied instead of downloaded.
    async fn twin_for_md5(
        &self,
        md5: &str,
        size: u64,
        excluding_key: &str,
    ) -> Result<Option<String>, SyncError>;

    /// Streams every row, for the startup cache sweep
    async fn scan_rows(&self) -> Result<Vec<CacheRow>, SyncError>;

    /// Deletes, in one transaction, every row whose `(md5, size)` does not
    /// match the scanned server state; returns the number removed
    ///
    /// `server_view` maps key → (hex md5, size) as produced by a full
    /// bucket scan. Rows for keys missing from the view are removed too.
    async fn audit(&self, server_view: &[(String, String, u64)]) -> Result<u64, SyncError>;

    /// Truncates the table
    async fn reset(&self) -> Result<(), SyncError>;
}
