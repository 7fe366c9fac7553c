//! Reconciler port (driving adapter boundary)
//!
//! The scheduler only needs one capability from the engine: reconcile a
//! single root-relative path in a given direction. Keeping this behind a
//! trait lets the queue be tested with a counting fake.

use crate::domain::errors::SyncError;

/// Something that can reconcile one path
#[async_trait::async_trait]
pub trait PathSyncer: Send + Sync {
    /// Reconciles the path relative to the local root
    ///
    /// `push` is the direction flag the scheduler last observed for this
    /// path. Errors are reported, not retried; the path will be seen again
    /// on its next change or on restart.
    async fn sync_path(&self, relative: &str, push: bool) -> Result<(), SyncError>;
}
