//! Startup bulk scans
//!
//! Before the queue starts working through events, three sweeps seed it:
//!
//! 1. **Server scan** - a paginated listing of the whole bucket root,
//!    building the [`Catalog`] (key → server hash/size) and its
//!    content-addressed companion map used for copy dedup.
//! 2. **Cache sweep** - every cache row joins the catalog or enqueues a
//!    fresh record, so paths that vanished on one side are re-examined.
//! 3. **Local walk** - a recursive scan of the local root enqueueing
//!    every path.
//!
//! All scan-produced events are immediate: they are bulk state, not
//! filesystem activity worth debouncing.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use propolis_core::domain::record::PathModel;
use propolis_core::domain::{SyncError, EMPTY_FILE_MD5};
use propolis_core::ports::{MetadataCache, ObjectStore};

use crate::queue::PathEvent;

/// Keys requested per list page
pub const LIST_PAGE_SIZE: u32 = 1000;

/// One object known to the server scan
#[derive(Debug, Clone)]
pub struct ServerEntry {
    /// Full key within the bucket
    pub key: String,
    /// Hex md5 from the listing ETag
    pub md5: String,
    /// Size from the listing
    pub size: u64,
}

/// The result of a full server scan
#[derive(Debug, Default)]
pub struct Catalog {
    /// Every scanned key
    pub by_key: HashMap<String, ServerEntry>,
    /// Non-empty objects indexed by content hash, for copy dedup
    pub by_contents: HashMap<String, ServerEntry>,
}

/// Walks the entire bucket root with paginated list requests
pub async fn scan_server(
    store: &dyn ObjectStore,
    paths: &PathModel,
) -> Result<Catalog, SyncError> {
    let prefix = paths.bucket_root().to_string();
    let mut catalog = Catalog::default();
    let mut marker = String::new();

    loop {
        let page = store.list(&prefix, &marker, LIST_PAGE_SIZE, true).await?;
        let truncated = page.is_truncated;

        if let Some(last) = page.entries.last() {
            marker = page
                .next_marker
                .clone()
                .unwrap_or_else(|| last.key.clone());
        } else if truncated {
            return Err(SyncError::Remote {
                status: 200,
                status_line: "truncated bucket list returned no keys".into(),
            });
        }

        for listed in page.entries {
            // keys outside the bucket root mean the server ignored the prefix
            paths.relative_for_server_key(&listed.key)?;

            let entry = ServerEntry {
                key: listed.key.clone(),
                md5: listed.etag_hex().to_string(),
                size: listed.size,
            };
            if entry.md5 != EMPTY_FILE_MD5 {
                catalog.by_contents.insert(entry.md5.clone(), entry.clone());
            }
            catalog.by_key.insert(listed.key, entry);
        }

        if !truncated {
            break;
        }
    }

    info!(keys = catalog.by_key.len(), "Server scan complete");
    Ok(catalog)
}

/// Audits the cache against a completed server scan
///
/// Removes, in one transaction, every row whose `(md5, size)` the server
/// contradicts, so the reconciler cannot be fooled into trusting them.
pub async fn audit_cache(
    cache: &dyn MetadataCache,
    catalog: &Catalog,
) -> Result<u64, SyncError> {
    let server_view: Vec<(String, String, u64)> = catalog
        .by_key
        .values()
        .map(|entry| (entry.key.clone(), entry.md5.clone(), entry.size))
        .collect();
    cache.audit(&server_view).await
}

/// Enqueues every catalog key for reconciliation
pub async fn enqueue_catalog(
    catalog: &Catalog,
    paths: &PathModel,
    events: &mpsc::Sender<PathEvent>,
    push: bool,
) -> Result<usize, SyncError> {
    let mut queued = 0;
    for key in catalog.by_key.keys() {
        let relative = paths.relative_for_server_key(key)?;
        send_event(events, relative, push).await;
        queued += 1;
    }
    debug!(queued, "Catalog entries queued");
    Ok(queued)
}

/// Sweeps the cache, enqueueing rows the catalog did not already cover
///
/// When no server scan ran, every row is enqueued: each one names a path
/// that existed at some point and deserves a fresh look.
pub async fn scan_cache(
    cache: &dyn MetadataCache,
    catalog: Option<&Catalog>,
    paths: &PathModel,
    events: &mpsc::Sender<PathEvent>,
    push: bool,
) -> Result<usize, SyncError> {
    let mut queued = 0;
    for row in cache.scan_rows().await? {
        if let Some(catalog) = catalog {
            if catalog.by_key.contains_key(&row.key) {
                continue; // already queued from the catalog
            }
        }
        match paths.relative_for_server_key(&row.key) {
            Ok(relative) => {
                send_event(events, relative, push).await;
                queued += 1;
            }
            Err(_) => warn!(key = %row.key, "Cache row outside the bucket root, skipping"),
        }
    }
    debug!(queued, "Cache rows queued");
    Ok(queued)
}

/// Recursively walks the local root, enqueueing every entry
pub async fn walk_local(
    paths: &PathModel,
    events: &mpsc::Sender<PathEvent>,
    push: bool,
) -> Result<usize, SyncError> {
    walk_directory(paths.local_root(), paths, events, push).await
}

fn walk_directory<'a>(
    dir: &'a Path,
    paths: &'a PathModel,
    events: &'a mpsc::Sender<PathEvent>,
    push: bool,
) -> Pin<Box<dyn Future<Output = Result<usize, SyncError>> + Send + 'a>> {
    Box::pin(async move {
        let mut queued = 0;
        let mut entries = tokio::fs::read_dir(dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let entry_path = entry.path();
            let Some(relative) = paths.relative_for_local(&entry_path) else {
                continue;
            };

            let file_type = entry.file_type().await?;
            send_event(events, relative, push).await;
            queued += 1;

            // descend without following symlinked directories
            if file_type.is_dir() {
                queued += walk_directory(&entry_path, paths, events, push).await?;
            }
        }
        Ok(queued)
    })
}

async fn send_event(events: &mpsc::Sender<PathEvent>, relative: String, push: bool) {
    let event = PathEvent {
        path: relative,
        push,
        immediate: true,
    };
    if events.send(event).await.is_err() {
        warn!("update queue is gone, scan event dropped");
    }
}
