//! Filesystem watching
//!
//! Wraps the `notify` crate to monitor the local root, converting raw OS
//! events into [`ChangeEvent`] values and forwarding them to the update
//! queue as path events. Debouncing is the queue's job; this adapter only
//! translates and filters.
//!
//! ```text
//! inotify ──→ FileWatcher ──→ mpsc::channel ──→ forward_events ──→ queue
//! ```

use std::path::{Path, PathBuf};

use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use propolis_core::domain::record::PathModel;
use propolis_core::domain::SyncError;

use crate::queue::PathEvent;

/// A filesystem change detected by the watcher
///
/// Internal representation decoupled from `notify`'s raw event types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// A new file or directory appeared
    Created(PathBuf),
    /// An existing file changed (content or metadata)
    Modified(PathBuf),
    /// A file or directory disappeared
    Deleted(PathBuf),
    /// A file or directory moved
    Renamed {
        /// Path before the rename
        old: PathBuf,
        /// Path after the rename
        new: PathBuf,
    },
}

/// Watches the local root using the OS-native mechanism
///
/// On Linux this is inotify. Raw events are mapped and pushed through an
/// mpsc channel; dropping the watcher stops the flow.
pub struct FileWatcher {
    watcher: RecommendedWatcher,
}

impl FileWatcher {
    /// Creates a watcher; returns it with the receiving end of its
    /// event channel
    pub fn new() -> Result<(Self, mpsc::Receiver<ChangeEvent>), SyncError> {
        let (event_tx, event_rx) = mpsc::channel::<ChangeEvent>(1024);

        let watcher = RecommendedWatcher::new(
            move |res: Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    if let Some(change) = map_notify_event(&event) {
                        if event_tx.blocking_send(change).is_err() {
                            warn!("change event dropped (receiver gone)");
                        }
                    }
                }
                Err(err) => {
                    error!(error = %err, "File watcher error");
                }
            },
            notify::Config::default(),
        )
        .map_err(|e| SyncError::Config(format!("failed to create file watcher: {e}")))?;

        Ok((Self { watcher }, event_rx))
    }

    /// Starts watching a directory tree recursively
    pub fn watch(&mut self, path: &Path) -> Result<(), SyncError> {
        info!(path = %path.display(), "Watching for changes");
        self.watcher
            .watch(path, RecursiveMode::Recursive)
            .map_err(|e| SyncError::Config(format!("failed to watch {}: {e}", path.display())))
    }
}

/// Converts a raw notify event into our internal representation
///
/// Access events and events without paths are dropped. A rename with only
/// one known path degrades to a modification of that path.
fn map_notify_event(event: &notify::Event) -> Option<ChangeEvent> {
    let paths = &event.paths;

    match &event.kind {
        EventKind::Create(_) => Some(ChangeEvent::Created(paths.first()?.clone())),

        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            if paths.len() >= 2 {
                Some(ChangeEvent::Renamed {
                    old: paths[0].clone(),
                    new: paths[1].clone(),
                })
            } else {
                Some(ChangeEvent::Modified(paths.first()?.clone()))
            }
        }

        EventKind::Modify(_) => Some(ChangeEvent::Modified(paths.first()?.clone())),

        EventKind::Remove(_) => Some(ChangeEvent::Deleted(paths.first()?.clone())),

        _ => {
            debug!(kind = ?event.kind, "Ignoring event kind");
            None
        }
    }
}

/// Forwards watcher events into the update queue until the watcher stops
///
/// Every affected path becomes a debounced queue event; renames touch both
/// the old and the new path so the source gets cleaned up and the target
/// gets uploaded.
pub async fn forward_events(
    mut events: mpsc::Receiver<ChangeEvent>,
    paths: PathModel,
    queue: mpsc::Sender<PathEvent>,
    push: bool,
) {
    while let Some(change) = events.recv().await {
        let affected: Vec<&PathBuf> = match &change {
            ChangeEvent::Created(p) | ChangeEvent::Modified(p) | ChangeEvent::Deleted(p) => {
                vec![p]
            }
            ChangeEvent::Renamed { old, new } => vec![old, new],
        };

        for path in affected {
            let Some(relative) = paths.relative_for_local(path) else {
                debug!(path = %path.display(), "Event outside the local root, ignored");
                continue;
            };
            debug!(path = %relative, "Change event queued");
            let event = PathEvent {
                path: relative,
                push,
                immediate: false,
            };
            if queue.send(event).await.is_err() {
                warn!("update queue is gone, watcher stopping");
                return;
            }
        }
    }
    info!("Watcher event stream ended");
}
