//! Port definitions
//!
//! Traits that decouple the reconciliation core from its adapters: the
//! signed bucket client, the SQLite metadata cache, and the scheduler's
//! view of "something that can reconcile one path". Implementations live
//! in the adapter crates; tests substitute in-memory fakes.

pub mod metadata_cache;
pub mod object_store;
pub mod path_syncer;

pub use metadata_cache::{CacheRow, MetadataCache};
pub use object_store::{ListEntry, ListPage, ObjectStore};
pub use path_syncer::PathSyncer;
