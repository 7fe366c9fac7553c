//! Propolis Cache - durable per-bucket metadata store
//!
//! SQLite-backed implementation of the
//! [`MetadataCache`](propolis_core::ports::MetadataCache) port. One
//! database per bucket maps each server key to the metadata last known to
//! match the remote object, with a secondary index on the content md5 that
//! powers server-to-server copy dedup.
//!
//! ## Key components
//!
//! - [`CachePool`] - connection pool with WAL mode and schema migration
//! - [`SqliteMetadataCache`] - the port implementation
//!
//! ## Usage
//!
//! ```no_run
//! use propolis_cache::{CachePool, SqliteMetadataCache};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let pool = CachePool::open(std::path::Path::new("/var/cache/propolis/my-bucket.sqlite")).await?;
//! let cache = SqliteMetadataCache::new(pool.pool().clone());
//! # Ok(())
//! # }
//! ```

pub mod pool;
pub mod repository;

pub use pool::CachePool;
pub use repository::SqliteMetadataCache;
