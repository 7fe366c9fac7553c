//! Error taxonomy
//!
//! Every failure in Propolis is classified into one of the [`SyncError`]
//! variants. The classification is correctness-affecting: the scheduler
//! logs transient and per-path failures and moves on, while cache failures
//! abort the process because durability can no longer be guaranteed.

use thiserror::Error;

/// Classified errors for synchronization operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// Connection-level failure (reset, timeout, DNS); may be retried
    #[error("network error: {0}")]
    Network(String),

    /// Non-2xx response from the object store (404 on HEAD is not an error)
    #[error("remote error: {status_line}")]
    Remote {
        /// HTTP status code
        status: u16,
        /// Full status line as reported by the server
        status_line: String,
    },

    /// Downloaded bytes did not hash to the server-reported ETag
    #[error("md5 mismatch for {key}: expected {expected}, computed {actual}")]
    Integrity {
        /// Server key of the object that failed verification
        key: String,
        /// Hex md5 from the ETag
        expected: String,
        /// Hex md5 of the bytes actually received
        actual: String,
    },

    /// Local filesystem failure (stat, open, rename, chmod)
    #[error("local i/o error: {0}")]
    LocalIo(#[from] std::io::Error),

    /// Metadata cache failure; fatal for the process
    #[error("cache error: {0}")]
    Cache(String),

    /// Invalid configuration, credentials, or bucket name; fatal at startup
    #[error("configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Whether the caller may reasonably retry the failed operation
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Network(_) => true,
            SyncError::Remote { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Whether this failure must abort the whole run
    ///
    /// Cache errors break the durability invariant (a row may be missing or
    /// stale with no way to tell), so continuing risks divergence.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Cache(_) | SyncError::Config(_))
    }
}
