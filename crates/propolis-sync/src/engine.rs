//! The reconciliation engine
//!
//! Given one path, the [`Reconciler`] resolves the three views of it
//! (local filesystem, metadata cache, remote server), decides on exactly
//! one committed change or a no-op, and maintains the crash-safety
//! ordering of the cache:
//!
//! - the cache row is deleted *before* any destructive remote mutation
//! - the row is written back only *after* the mutation is acknowledged
//!
//! A crash in between reads as "cache says absent" on the next run, which
//! repairs itself by re-uploading (push) or re-downloading (pull). The
//! reverse order would silently lose a remote file.
//!
//! ## Upload economics
//!
//! Content is never re-sent when the server already has the bytes:
//!
//! - unchanged hash at the same key → server-side copy onto itself with
//!   REPLACE metadata (a pure metadata update)
//! - the same hash and size at another key (scan catalog first, then the
//!   cache md5 index) → server-side copy from that key
//! - a failed copy falls back to a plain upload within the same run

use std::ffi::OsString;
use std::os::unix::ffi::OsStringExt;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use propolis_core::config::Settings;
use propolis_core::domain::record::{FileKind, FileMeta, FileRecord, PathModel};
use propolis_core::domain::{ContentSource, SyncError, EMPTY_FILE_MD5, EMPTY_FILE_MD5_BASE64};
use propolis_core::ports::{MetadataCache, ObjectStore, PathSyncer};

use crate::filesystem::{apply_metadata, ensure_parent, stat_local, temp_sibling};
use crate::hasher::hash_local;
use crate::scanner::Catalog;

/// Per-path reconciliation over {local, cache, server}
pub struct Reconciler {
    settings: Arc<Settings>,
    paths: PathModel,
    store: Arc<dyn ObjectStore>,
    cache: Arc<dyn MetadataCache>,
    /// Result of the startup server scan, when one ran
    catalog: Option<Arc<Catalog>>,
}

impl Reconciler {
    /// Creates a reconciler over the given adapters
    pub fn new(
        settings: Arc<Settings>,
        store: Arc<dyn ObjectStore>,
        cache: Arc<dyn MetadataCache>,
    ) -> Self {
        let paths = settings.path_model();
        Self {
            settings,
            paths,
            store,
            cache,
            catalog: None,
        }
    }

    /// Attaches the catalog from a completed server scan
    ///
    /// Catalog entries serve two purposes: they hint that a key exists on
    /// the server even when the cache has no row, and they offer copy
    /// sources for content dedup before the cache index is consulted.
    pub fn with_catalog(mut self, catalog: Arc<Catalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    fn practice(&self) -> bool {
        self.settings.practice
    }

    /// Runs one full reconciliation for a record
    pub async fn reconcile(&self, record: &mut FileRecord) -> Result<(), SyncError> {
        record.local = stat_local(&record.local_path).await?;
        self.resolve_remote_view(record).await?;

        if record.local.is_none() && record.cache.is_none() {
            debug!(key = %record.server_key, "No such file locally or on server");
            return Ok(());
        }

        if record.push {
            self.reconcile_push(record).await
        } else {
            self.reconcile_pull(record).await
        }
    }

    // ========================================================================
    // View resolution
    // ========================================================================

    /// Loads the cache row and, when the trust mode demands it, verifies
    /// or supplements it with a HEAD round-trip
    async fn resolve_remote_view(&self, record: &mut FileRecord) -> Result<(), SyncError> {
        if record.cache.is_none() {
            self.cache.get_file_info(record).await?;
        }

        if record.cache.is_none() {
            // A miss is only conclusive when the cache is trusted complete
            // and no server scan hinted that the key exists.
            let hinted = record.server_hash_hex.is_some();
            if self.settings.trust_cache_complete && !hinted {
                return Ok(());
            }

            self.store.stat(record).await?;
            if record.cache.is_some() && record.server_hash_hex.is_some() {
                record.cache_hash_hex = record.server_hash_hex.clone();
                debug!(key = %record.server_key, "Adding missing cache entry");
                if !self.practice() {
                    self.cache.set_file_info(record, false).await?;
                }
            }
            return Ok(());
        }

        if self.settings.trust_cache_accurate {
            return Ok(());
        }

        // The row exists but may be stale; re-check against the server.
        let cached_meta = record.cache.take();
        let cached_hash = record.cache_hash_hex.take();
        self.store.stat(record).await?;

        match (record.cache.clone(), record.server_hash_hex.clone()) {
            (Some(server_meta), Some(server_hash)) => {
                record.cache_hash_hex = Some(server_hash.clone());
                let agrees = cached_hash.as_deref() == Some(server_hash.as_str())
                    && cached_meta
                        .as_ref()
                        .map(|m| m.agrees_with(&server_meta))
                        .unwrap_or(false);
                if !agrees {
                    info!(key = %record.server_key, "Updating bogus cache entry");
                    if !self.practice() {
                        self.cache.set_file_info(record, false).await?;
                    }
                }
            }
            _ => {
                // cache said present, server says gone
                info!(key = %record.server_key, "Removing bogus cache entry");
                record.cache = None;
                record.cache_hash_hex = None;
                if !self.practice() {
                    self.cache.delete_file_info(record).await?;
                }
            }
        }
        Ok(())
    }

    // ========================================================================
    // Push: local wins
    // ========================================================================

    async fn reconcile_push(&self, record: &mut FileRecord) -> Result<(), SyncError> {
        let local = record.local.clone();
        let cache = record.cache.clone();

        match (local, cache) {
            (None, Some(_)) => self.delete_remote(record).await,

            (Some(local), cache)
                if cache.as_ref().map(|c| !local.agrees_with(c)).unwrap_or(true) =>
            {
                self.update_remote(record).await
            }

            (Some(_), Some(_)) if self.settings.paranoid => {
                hash_local(record).await?;
                if record.local_hash_hex != record.cache_hash_hex {
                    info!(key = %record.server_key, "MD5 mismatch, uploading");
                    self.update_remote(record).await
                } else {
                    record.contents = None;
                    debug!(key = %record.server_key, "No change");
                    Ok(())
                }
            }

            _ => {
                debug!(key = %record.server_key, "No change");
                Ok(())
            }
        }
    }

    async fn delete_remote(&self, record: &mut FileRecord) -> Result<(), SyncError> {
        info!(key = %record.server_key, "Deleting remote file");
        if self.practice() {
            return Ok(());
        }
        if !self.settings.delete {
            info!(key = %record.server_key, "Deletions disabled, remote file kept");
            return Ok(());
        }

        // remote first: a stale row after a successful delete is repaired
        // on the next run, a remote file with no row is silently lost
        self.store.delete(record).await?;
        self.cache.delete_file_info(record).await?;
        Ok(())
    }

    async fn update_remote(&self, record: &mut FileRecord) -> Result<(), SyncError> {
        // clear the row before touching the server
        if record.cache.is_some() && !self.practice() {
            self.cache.delete_file_info(record).await?;
        }

        if !record.local_kind_tracked(self.settings.track_directories) {
            if record.cache.is_some() {
                // an untracked file replaced an old tracked object; the
                // stale object would otherwise linger forever (its row is
                // already gone from the delete above)
                info!(key = %record.server_key, "Deleting old file masked by untracked file");
                if self.practice() {
                    return Ok(());
                }
                self.store.delete(record).await?;
            } else {
                debug!(key = %record.server_key, "Ignoring untracked file");
            }
            return Ok(());
        }

        let local = record.local.clone().ok_or_else(|| {
            SyncError::Config(format!("remote update of {} without a local view", record.server_key))
        })?;

        // empty fast path: nothing to hash, nothing to dedup
        if local.kind() == FileKind::Directory || local.size == 0 {
            if let Some(meta) = record.local.as_mut() {
                meta.size = 0;
            }
            record.local_hash_hex = Some(EMPTY_FILE_MD5.to_string());
            record.local_hash_base64 = Some(EMPTY_FILE_MD5_BASE64.to_string());
            record.contents = Some(ContentSource::Empty);

            info!(key = %record.server_key, "Uploading zero-length file");
            if self.practice() {
                return Ok(());
            }
            self.store.upload(record).await?;
            self.cache.set_file_info(record, true).await?;
            return Ok(());
        }

        if record.local_hash_hex.is_none() {
            hash_local(record).await?;
        }
        let hash = record.local_hash_hex.clone().ok_or_else(|| {
            SyncError::Config(format!("no content hash for {}", record.server_key))
        })?;

        let src = self.find_copy_source(record, &hash, local.size).await?;

        match src {
            Some(src_key) => {
                info!(src = %src_key, dst = %record.server_key, "Copying file");
                if self.practice() {
                    return Ok(());
                }
                let src_full = format!("/{}/{}", self.paths.bucket(), src_key);
                match self.store.copy(record, &src_full).await {
                    Ok(()) => {
                        record.contents = None;
                    }
                    Err(err) if !err.is_fatal() => {
                        warn!(key = %record.server_key, error = %err, "Copy failed, uploading");
                        self.store.upload(record).await?;
                    }
                    Err(err) => return Err(err),
                }
            }
            None => {
                info!(key = %record.server_key, "Uploading");
                if self.practice() {
                    return Ok(());
                }
                self.store.upload(record).await?;
            }
        }

        self.cache.set_file_info(record, true).await?;
        Ok(())
    }

    /// Picks a server-side copy source for the given content, if any
    ///
    /// An unchanged hash at this very key means a metadata-only update.
    /// Otherwise the scan catalog is consulted first, then the cache md5
    /// index; both require the size to match as well.
    async fn find_copy_source(
        &self,
        record: &FileRecord,
        hash: &str,
        size: u64,
    ) -> Result<Option<String>, SyncError> {
        if record.cache_hash_hex.as_deref() == Some(hash) {
            return Ok(Some(record.server_key.clone()));
        }

        if let Some(catalog) = &self.catalog {
            if let Some(entry) = catalog.by_contents.get(hash) {
                if entry.size == size {
                    return Ok(Some(entry.key.clone()));
                }
            }
        }

        self.cache.path_for_md5(hash, size, &record.server_key).await
    }

    // ========================================================================
    // Pull: server wins
    // ========================================================================

    async fn reconcile_pull(&self, record: &mut FileRecord) -> Result<(), SyncError> {
        let local = record.local.clone();
        let cache = record.cache.clone();

        match (local, cache) {
            (Some(_), None) => self.delete_local(record).await,

            (local, Some(cache))
                if local.as_ref().map(|l| !l.agrees_with(&cache)).unwrap_or(true) =>
            {
                self.update_local(record).await
            }

            (Some(_), Some(_)) if self.settings.paranoid => {
                hash_local(record).await?;
                record.contents = None;
                if record.local_hash_hex != record.cache_hash_hex {
                    info!(key = %record.server_key, "MD5 mismatch, downloading");
                    self.update_local(record).await
                } else {
                    debug!(key = %record.server_key, "No change");
                    Ok(())
                }
            }

            _ => {
                debug!(key = %record.server_key, "No change");
                Ok(())
            }
        }
    }

    async fn delete_local(&self, record: &mut FileRecord) -> Result<(), SyncError> {
        info!(key = %record.server_key, "Deleting local file");
        if self.practice() {
            return Ok(());
        }
        if !self.settings.delete {
            info!(key = %record.server_key, "Deletions disabled, local file kept");
            return Ok(());
        }

        let is_dir = record
            .local
            .as_ref()
            .map(|m| m.kind() == FileKind::Directory)
            .unwrap_or(false);
        if is_dir {
            tokio::fs::remove_dir(&record.local_path).await?;
        } else {
            tokio::fs::remove_file(&record.local_path).await?;
        }
        Ok(())
    }

    async fn update_local(&self, record: &mut FileRecord) -> Result<(), SyncError> {
        let meta = record.cache.clone().ok_or_else(|| {
            SyncError::Config(format!("local update of {} without a cache view", record.server_key))
        })?;

        info!(key = %record.server_key, "Updating local file");
        if self.practice() {
            return Ok(());
        }

        ensure_parent(&record.local_path).await?;

        match meta.kind() {
            FileKind::Directory => {
                tokio::fs::create_dir_all(&record.local_path).await?;
                apply_metadata(&record.local_path, &meta)?;
            }

            FileKind::Symlink => {
                // the object body is the link target
                let mut buf: Vec<u8> = Vec::new();
                self.store.download(&record.server_key, &mut buf).await?;
                let target = OsString::from_vec(buf);

                // build the link as a temp sibling and rename it into
                // place; the target path always holds the old or the new
                // link, never nothing
                let tmp = temp_sibling(&record.local_path);
                match tokio::fs::remove_file(&tmp).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                tokio::fs::symlink(&target, &tmp).await?;
                if let Err(e) = tokio::fs::rename(&tmp, &record.local_path).await {
                    let _ = tokio::fs::remove_file(&tmp).await;
                    return Err(e.into());
                }
                apply_metadata(&record.local_path, &meta)?;
            }

            _ if meta.size == 0 || record.cache_hash_hex.as_deref() == Some(EMPTY_FILE_MD5) => {
                tokio::fs::File::create(&record.local_path).await?;
                apply_metadata(&record.local_path, &meta)?;
            }

            _ => {
                if self.install_from_local_twin(record, &meta).await? {
                    return Ok(());
                }
                self.download_into_place(record, &meta).await?;
            }
        }
        Ok(())
    }

    /// Tries to satisfy a download from another local file with the same
    /// content, copying it instead of fetching bytes
    async fn install_from_local_twin(
        &self,
        record: &FileRecord,
        meta: &FileMeta,
    ) -> Result<bool, SyncError> {
        let Some(hash) = record.cache_hash_hex.clone() else {
            return Ok(false);
        };
        let Some(src_key) = self
            .cache
            .twin_for_md5(&hash, meta.size, &record.server_key)
            .await?
        else {
            return Ok(false);
        };
        let Ok(relative) = self.paths.relative_for_server_key(&src_key) else {
            return Ok(false);
        };
        let src_path = self.paths.local_root().join(relative);

        match stat_local(&src_path).await? {
            Some(src_meta)
                if src_meta.kind() == FileKind::Regular && src_meta.size == meta.size =>
            {
                let tmp = temp_sibling(&record.local_path);
                if let Err(e) = tokio::fs::copy(&src_path, &tmp).await {
                    debug!(src = %src_path.display(), error = %e, "Local copy failed, downloading");
                    let _ = tokio::fs::remove_file(&tmp).await;
                    return Ok(false);
                }
                tokio::fs::rename(&tmp, &record.local_path).await?;
                apply_metadata(&record.local_path, meta)?;
                info!(src = %src_key, dst = %record.server_key, "Copied local file");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Downloads to a temporary sibling, verifies, renames into place
    async fn download_into_place(
        &self,
        record: &FileRecord,
        meta: &FileMeta,
    ) -> Result<(), SyncError> {
        let tmp = temp_sibling(&record.local_path);
        let mut file = tokio::fs::File::create(&tmp).await?;

        match self.store.download(&record.server_key, &mut file).await {
            Ok(_server_meta) => {
                file.flush().await?;
                drop(file);
                tokio::fs::rename(&tmp, &record.local_path).await?;
                apply_metadata(&record.local_path, meta)?;
                Ok(())
            }
            Err(err) => {
                // no partial file is ever installed
                drop(file);
                let _ = tokio::fs::remove_file(&tmp).await;
                Err(err)
            }
        }
    }
}

#[async_trait::async_trait]
impl PathSyncer for Reconciler {
    async fn sync_path(&self, relative: &str, push: bool) -> Result<(), SyncError> {
        let mut record = self.paths.record_for(relative, push, false);

        if let Some(catalog) = &self.catalog {
            if let Some(entry) = catalog.by_key.get(&record.server_key) {
                record.server_hash_hex = Some(entry.md5.clone());
                record.server_size = Some(entry.size);
            }
        }

        self.reconcile(&mut record).await
    }
}

// ============================================================================
// Tests
// ============================================================================
