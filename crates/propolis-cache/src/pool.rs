//! Connection pool management
//!
//! Wraps SQLx's SqlitePool with:
//! - Automatic directory creation for database files
//! - WAL journal mode for concurrent reads
//! - Schema migration on first connection
//! - In-memory mode for testing

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use propolis_core::domain::SyncError;

/// Pool of SQLite connections for one bucket's metadata cache
///
/// Writes are serialized by SQLite itself; the 5-second busy timeout
/// absorbs contention between concurrent reconciliation workers.
pub struct CachePool {
    pool: SqlitePool,
}

impl CachePool {
    /// Opens (or creates) the cache database at the given path
    ///
    /// Creates parent directories as needed, enables WAL mode, and runs
    /// the schema migration.
    pub async fn open(db_path: &Path) -> Result<Self, SyncError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SyncError::Cache(format!(
                    "failed to create cache directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| {
                SyncError::Cache(format!(
                    "failed to open cache database {}: {e}",
                    db_path.display()
                ))
            })?;

        Self::run_migrations(&pool).await?;

        tracing::info!(path = %db_path.display(), "Cache database opened");

        Ok(Self { pool })
    }

    /// Creates an in-memory cache for testing
    ///
    /// Uses a single connection so the data survives across queries
    /// (SQLite in-memory databases are per-connection).
    pub async fn in_memory() -> Result<Self, SyncError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| SyncError::Cache(format!("failed to create in-memory cache: {e}")))?;

        Self::run_migrations(&pool).await?;

        tracing::debug!("In-memory cache initialized");

        Ok(Self { pool })
    }

    /// Returns a reference to the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn run_migrations(pool: &SqlitePool) -> Result<(), SyncError> {
        let migration_sql = include_str!("migrations/20260715_initial.sql");
        sqlx::raw_sql(migration_sql)
            .execute(pool)
            .await
            .map_err(|e| SyncError::Cache(format!("schema migration failed: {e}")))?;
        Ok(())
    }
}
