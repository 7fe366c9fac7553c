//! Run settings
//!
//! One [`Settings`] value is built at startup from the command line and
//! flows explicitly (behind an `Arc`) to every component. There are no
//! process-wide singletons.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::newtypes::BucketName;
use crate::domain::record::PathModel;

/// Which side is authoritative for this run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncDirection {
    /// Local filesystem wins; the bucket is brought into agreement
    Push,
    /// Bucket wins; the local tree is brought into agreement
    Pull,
}

/// Complete configuration for one synchronization run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Authoritative side
    pub direction: SyncDirection,
    /// Local directory being mirrored (absolute, symlinks resolved)
    pub local_root: PathBuf,
    /// Target bucket
    pub bucket: BucketName,
    /// Key prefix within the bucket; empty for the bucket root
    pub bucket_root: String,

    /// Scan the bucket at startup and audit the cache against it
    pub refresh: bool,
    /// Keep watching the authoritative side after the initial sync
    pub watch: bool,
    /// Propagate deletions (both directions); when false, deletes are
    /// logged and skipped
    pub delete: bool,
    /// Hash content even when cheap metadata agrees
    pub paranoid: bool,
    /// Truncate the cache before starting (implies refresh)
    pub reset: bool,
    /// Log planned actions without changing anything (implies no watch)
    pub practice: bool,
    /// Grant public-read to world-readable files
    pub public: bool,
    /// Use https for bucket requests
    pub secure: bool,
    /// Store uploads with the REDUCED_REDUNDANCY storage class
    pub reduced_redundancy: bool,
    /// Track directories as zero-length objects
    pub track_directories: bool,

    /// Assume a key absent from the cache is absent from the server
    pub trust_cache_complete: bool,
    /// Assume a cache row matches the server without re-checking
    pub trust_cache_accurate: bool,

    /// Debounce window in seconds
    pub delay_secs: u64,
    /// Maximum concurrent reconciliations
    pub max_in_flight: usize,

    /// Directory holding one cache database per bucket
    pub cache_dir: PathBuf,
}

impl Settings {
    /// The scheme-and-host part of every object URL for this bucket
    pub fn endpoint_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{scheme}://{}.s3.amazonaws.com", self.bucket)
    }

    /// Builds the path model that derives all name variations
    pub fn path_model(&self) -> PathModel {
        PathModel::new(
            self.local_root.clone(),
            self.bucket.clone(),
            self.bucket_root.clone(),
            self.endpoint_url(),
        )
    }

    /// Location of this bucket's cache database
    pub fn cache_db_path(&self) -> PathBuf {
        self.cache_dir.join(format!("{}.sqlite", self.bucket))
    }

    /// The debounce window as a duration
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }

    /// True when the local side is authoritative
    pub fn is_push(&self) -> bool {
        self.direction == SyncDirection::Push
    }

    /// Applies the flag implication rules
    ///
    /// `--reset` implies `--refresh`; `--practice` implies `--watch=false`.
    /// The trust axes follow refresh: a run that scans and audits the
    /// cache may trust it afterwards, a run that skips the scan may not.
    pub fn apply_implications(&mut self) {
        if self.reset {
            self.refresh = true;
        }
        if self.practice {
            self.watch = false;
        }
        self.trust_cache_complete = self.refresh;
        self.trust_cache_accurate = self.refresh;
    }
}
