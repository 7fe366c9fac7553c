//! Domain types for Propolis
//!
//! The domain layer is free of I/O: it defines the working record a
//! reconciliation run operates on, the metadata views it compares, and the
//! error taxonomy the rest of the system classifies failures with.

pub mod errors;
pub mod newtypes;
pub mod record;

pub use errors::SyncError;
pub use newtypes::BucketName;
pub use record::{
    ContentSource, FileKind, FileMeta, FileRecord, PathModel, EMPTY_FILE_MD5,
    EMPTY_FILE_MD5_BASE64,
};
