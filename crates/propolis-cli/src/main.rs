//! Propolis - mirror a local directory tree against an S3-compatible bucket
//!
//! Startup sequence:
//!
//! 1. Parse arguments, resolve credentials, validate the bucket name
//! 2. Open (optionally reset) the per-bucket metadata cache
//! 3. With `--refresh`: scan the whole bucket and audit the cache
//! 4. Seed the update queue from the catalog, the cache sweep, and a walk
//!    of the local tree
//! 5. With `--watch`: keep feeding filesystem events into the queue until
//!    interrupted
//! 6. Drain the queue and exit
//!
//! Exit status is zero on a clean drain, non-zero on a configuration
//! error or a fatal (cache) failure.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod args;
mod credentials;

use propolis_cache::{CachePool, SqliteMetadataCache};
use propolis_core::ports::{MetadataCache, ObjectStore};
use propolis_s3::{BucketClient, MimeTable};
use propolis_sync::{engine::Reconciler, queue, scanner, watcher};

use args::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let (settings, cli_key, cli_secret) = cli.into_settings()?;
    let (access_key, secret_key) = credentials::resolve(cli_key, cli_secret)?;
    let settings = Arc::new(settings);

    info!(
        bucket = %settings.bucket,
        root = %settings.local_root.display(),
        direction = ?settings.direction,
        practice = settings.practice,
        "Starting propolis"
    );

    // Per-bucket metadata cache
    let pool = CachePool::open(&settings.cache_db_path())
        .await
        .context("failed to open the metadata cache")?;
    let cache: Arc<dyn MetadataCache> = Arc::new(SqliteMetadataCache::new(pool.pool().clone()));

    if settings.reset {
        info!("Resetting the metadata cache");
        cache.reset().await?;
    }

    // Bucket client with the system MIME table
    let mime = MimeTable::load_system();
    let store: Arc<dyn ObjectStore> =
        Arc::new(BucketClient::new(&settings, access_key, secret_key, mime)?);

    let paths = settings.path_model();
    let push = settings.is_push();

    // Optional full server scan + cache audit
    let catalog = if settings.refresh {
        let catalog = scanner::scan_server(store.as_ref(), &paths)
            .await
            .context("server scan failed")?;
        let removed = scanner::audit_cache(cache.as_ref(), &catalog).await?;
        if removed > 0 {
            info!(removed, "Cache rows contradicted by the server were dropped");
        }
        Some(Arc::new(catalog))
    } else {
        None
    };

    let mut reconciler = Reconciler::new(settings.clone(), store, Arc::clone(&cache));
    if let Some(catalog) = &catalog {
        reconciler = reconciler.with_catalog(Arc::clone(catalog));
    }

    let mut handle = queue::start(
        Arc::new(reconciler),
        settings.delay(),
        settings.max_in_flight,
    );
    let events = handle.sender();

    // Seed the queue: catalog keys, cache sweep, local walk
    if let Some(catalog) = &catalog {
        scanner::enqueue_catalog(catalog, &paths, &events, push).await?;
    }
    scanner::scan_cache(cache.as_ref(), catalog.as_deref(), &paths, &events, push).await?;
    let walked = scanner::walk_local(&paths, &events, push)
        .await
        .context("local walk failed")?;
    info!(paths = walked, "Initial scan queued");

    // Optional watch phase; ends on ctrl-c or a fatal error
    let mut fatal = None;
    let _watcher = if settings.watch {
        if !push {
            warn!("--watch only watches the local side; pull mode ignores it");
            None
        } else {
            let (mut watcher, change_rx) = watcher::FileWatcher::new()?;
            watcher.watch(&settings.local_root)?;
            tokio::spawn(watcher::forward_events(
                change_rx,
                paths.clone(),
                events.clone(),
                push,
            ));

            info!("Watching for changes; interrupt to stop");
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted, draining the queue");
                }
                err = handle.fatal() => {
                    fatal = err;
                }
            }
            Some(watcher)
        }
    } else {
        None
    };

    // Drain: every queued path is reconciled before exit
    let drain_fatal = handle.shutdown().await;

    if let Some(err) = fatal.take().or(drain_fatal) {
        error!(error = %err, "Fatal error during synchronization");
        bail!("fatal error: {err}");
    }

    if settings.practice {
        info!("Practice run complete; no files were changed");
    } else {
        info!("Synchronization complete");
    }
    Ok(())
}
