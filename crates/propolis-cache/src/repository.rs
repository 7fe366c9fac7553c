//! SQLite implementation of the metadata cache port
//!
//! ## Type mapping
//!
//! | Domain field | SQL column | Strategy |
//! |--------------|------------|----------|
//! | server key   | `path`     | TEXT primary key |
//! | md5 (hex)    | `md5`      | TEXT, lowercase, unquoted |
//! | uid/gid/mode | integers   | stored as i64, cast on read |
//! | mtime_ns     | `mtime`    | i64 nanoseconds |
//! | size         | `size`     | i64, cast to u64 on read |
//!
//! Upserts are delete-then-insert to keep the semantics single-row; the
//! pair runs inside one transaction. The audit sweep runs in a single
//! transaction so a crash mid-audit cannot leave a half-trusted cache.

use std::collections::HashMap;

use sqlx::{Row, SqlitePool};

use propolis_core::domain::record::{FileMeta, FileRecord};
use propolis_core::domain::SyncError;
use propolis_core::ports::{CacheRow, MetadataCache};

/// SQLite-backed metadata cache
pub struct SqliteMetadataCache {
    pool: SqlitePool,
}

impl SqliteMetadataCache {
    /// Creates a cache over an existing connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn db_err(e: sqlx::Error) -> SyncError {
    SyncError::Cache(e.to_string())
}

fn meta_from_row(row: &sqlx::sqlite::SqliteRow) -> FileMeta {
    let uid: i64 = row.get("uid");
    let gid: i64 = row.get("gid");
    let mode: i64 = row.get("mode");
    let mtime: i64 = row.get("mtime");
    let size: i64 = row.get("size");
    FileMeta {
        mode: mode as u32,
        uid: uid as u32,
        gid: gid as u32,
        size: size as u64,
        mtime_ns: mtime,
    }
}

#[async_trait::async_trait]
impl MetadataCache for SqliteMetadataCache {
    async fn get_file_info(&self, record: &mut FileRecord) -> Result<(), SyncError> {
        let row = sqlx::query(
            "SELECT md5, uid, gid, mode, mtime, size FROM cache WHERE path = ?",
        )
        .bind(&record.server_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        match row {
            Some(row) => {
                record.cache = Some(meta_from_row(&row));
                record.cache_hash_hex = Some(row.get::<String, _>("md5"));
            }
            None => {
                record.cache = None;
                record.cache_hash_hex = None;
            }
        }
        Ok(())
    }

    async fn set_file_info(&self, record: &FileRecord, use_local: bool) -> Result<(), SyncError> {
        // use_local: the row records what we just pushed (local view).
        // Otherwise: the row records what a HEAD just taught us (the cache
        // view filled from response headers, plus the server ETag).
        let (meta, md5) = if use_local {
            (record.local.as_ref(), record.local_hash_hex.as_deref())
        } else {
            (record.cache.as_ref(), record.server_hash_hex.as_deref())
        };

        let meta = meta.ok_or_else(|| {
            SyncError::Cache(format!(
                "no metadata view to store for {}",
                record.server_key
            ))
        })?;
        let md5 = md5.ok_or_else(|| {
            SyncError::Cache(format!("no content hash to store for {}", record.server_key))
        })?;

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query("DELETE FROM cache WHERE path = ?")
            .bind(&record.server_key)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        sqlx::query("INSERT INTO cache (path, md5, uid, gid, mode, mtime, size) VALUES (?, ?, ?, ?, ?, ?, ?)")
            .bind(&record.server_key)
            .bind(md5)
            .bind(meta.uid as i64)
            .bind(meta.gid as i64)
            .bind(meta.mode as i64)
            .bind(meta.mtime_ns)
            .bind(meta.size as i64)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;

        tracing::debug!(key = %record.server_key, use_local, "Cache row written");
        Ok(())
    }

    async fn delete_file_info(&self, record: &FileRecord) -> Result<(), SyncError> {
        sqlx::query("DELETE FROM cache WHERE path = ?")
            .bind(&record.server_key)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn path_for_md5(
        &self,
        md5: &str,
        size: u64,
        preferred_key: &str,
    ) -> Result<Option<String>, SyncError> {
        // The preferred key already having this hash means the change is
        // metadata-only; that check must win over any other candidate.
        let same = sqlx::query("SELECT path FROM cache WHERE md5 = ? AND size = ? AND path = ?")
            .bind(md5)
            .bind(size as i64)
            .bind(preferred_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        if same.is_some() {
            return Ok(Some(preferred_key.to_string()));
        }

        let any = sqlx::query("SELECT path FROM cache WHERE md5 = ? AND size = ? LIMIT 1")
            .bind(md5)
            .bind(size as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(any.map(|row| row.get::<String, _>("path")))
    }

    async fn twin_for_md5(
        &self,
        md5: &str,
        size: u64,
        excluding_key: &str,
    ) -> Result<Option<String>, SyncError> {
        let row = sqlx::query("SELECT path FROM cache WHERE md5 = ? AND size = ? AND path != ? LIMIT 1")
            .bind(md5)
            .bind(size as i64)
            .bind(excluding_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(|row| row.get::<String, _>("path")))
    }

    async fn scan_rows(&self) -> Result<Vec<CacheRow>, SyncError> {
        let rows = sqlx::query("SELECT path, md5, uid, gid, mode, mtime, size FROM cache")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(rows
            .iter()
            .map(|row| CacheRow {
                key: row.get("path"),
                md5: row.get("md5"),
                meta: meta_from_row(row),
            })
            .collect())
    }

    async fn audit(&self, server_view: &[(String, String, u64)]) -> Result<u64, SyncError> {
        let view: HashMap<&str, (&str, u64)> = server_view
            .iter()
            .map(|(key, md5, size)| (key.as_str(), (md5.as_str(), *size)))
            .collect();

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let rows = sqlx::query("SELECT path, md5, size FROM cache")
            .fetch_all(&mut *tx)
            .await
            .map_err(db_err)?;

        let mut removed = 0u64;
        for row in &rows {
            let key: String = row.get("path");
            let md5: String = row.get("md5");
            let size: i64 = row.get("size");

            let agrees = matches!(
                view.get(key.as_str()),
                Some((server_md5, server_size))
                    if *server_md5 == md5 && *server_size == size as u64
            );
            if agrees {
                continue;
            }

            sqlx::query("DELETE FROM cache WHERE path = ?")
                .bind(&key)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            removed += 1;
            tracing::debug!(key = %key, "Audit removed stale cache row");
        }

        tx.commit().await.map_err(db_err)?;

        if removed > 0 {
            tracing::info!(removed, "Cache audit removed stale rows");
        }
        Ok(removed)
    }

    async fn reset(&self) -> Result<(), SyncError> {
        sqlx::query("DELETE FROM cache")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        tracing::info!("Cache reset");
        Ok(())
    }
}
