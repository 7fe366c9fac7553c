//! Debounced update queue
//!
//! Coalesces repeated path events over a debounce window and dispatches
//! reconciliations on worker tasks under an in-flight cap.
//!
//! ## Coordinator model
//!
//! A single coordinator task owns all queue state: the min-heap ordered by
//! insertion time, the path index map, the in-flight counter, and the
//! shutdown latch. Every input arrives over a channel and is handled one
//! at a time, so no lock protects the state. Workers run reconciliations
//! in parallel, up to `max_in_flight`.
//!
//! ```text
//! events ──→ ingress ─┐
//! sleeper ──→ timer ──┼──→ coordinator ──→ worker tasks ──→ finished
//! shutdown ──→ quit ──┘
//! ```
//!
//! ## Guarantees
//!
//! - A burst of events for one path within the delay runs exactly one
//!   reconciliation, observing the last `push` flag received.
//! - Never more than `max_in_flight` reconciliations at once.
//! - Shutdown completes only after every queued path has been reconciled;
//!   the delay check is skipped while draining.

use std::collections::{BinaryHeap, HashMap, HashSet};
use std::cmp::Reverse;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use propolis_core::domain::SyncError;
use propolis_core::ports::PathSyncer;

/// One path event entering the queue
#[derive(Debug, Clone)]
pub struct PathEvent {
    /// Path relative to the local root
    pub path: String,
    /// Direction flag to reconcile with
    pub push: bool,
    /// Bypass the debounce delay (bulk scans, not filesystem activity)
    pub immediate: bool,
}

/// A pending path: the map entry is authoritative, heap entries whose
/// `inserted` stamp no longer matches are stale and skipped on pop
struct Candidate {
    inserted: Instant,
    updated: Instant,
    push: bool,
}

/// Handle to a running update queue
pub struct QueueHandle {
    ingress: mpsc::Sender<PathEvent>,
    quit_tx: mpsc::Sender<oneshot::Sender<()>>,
    fatal_rx: oneshot::Receiver<SyncError>,
}

impl QueueHandle {
    /// A sender for feeding events into the queue
    pub fn sender(&self) -> mpsc::Sender<PathEvent> {
        self.ingress.clone()
    }

    /// Enqueues one event
    pub async fn enqueue(&self, event: PathEvent) {
        if self.ingress.send(event).await.is_err() {
            warn!("update queue is gone, event dropped");
        }
    }

    /// Resolves when a worker hits a fatal error (cache durability broken)
    ///
    /// Consumes the handle's receiver; call at most once, typically from a
    /// `select!` alongside the shutdown signal.
    pub async fn fatal(&mut self) -> Option<SyncError> {
        (&mut self.fatal_rx).await.ok()
    }

    /// Requests shutdown and waits for the queue to drain
    ///
    /// Every pending path is still reconciled (as fast as the in-flight
    /// cap allows); the call returns once the queue is empty and no worker
    /// is running. A fatal error latched during the drain is returned so
    /// batch runs can exit non-zero.
    pub async fn shutdown(mut self) -> Option<SyncError> {
        let (done_tx, done_rx) = oneshot::channel();
        if self.quit_tx.send(done_tx).await.is_err() {
            return None; // coordinator already gone
        }
        let _ = done_rx.await;
        self.fatal_rx.try_recv().ok()
    }
}

/// Starts the queue coordinator and returns its handle
pub fn start(
    syncer: Arc<dyn PathSyncer>,
    delay: Duration,
    max_in_flight: usize,
) -> QueueHandle {
    let (ingress_tx, ingress_rx) = mpsc::channel::<PathEvent>(1024);
    let (quit_tx, quit_rx) = mpsc::channel::<oneshot::Sender<()>>(1);
    let (fatal_tx, fatal_rx) = oneshot::channel::<SyncError>();

    info!(
        delay_secs = delay.as_secs_f64(),
        max_in_flight, "Starting update queue"
    );

    let coordinator = Coordinator {
        syncer,
        delay,
        max_in_flight: max_in_flight.max(1),
        heap: BinaryHeap::new(),
        pending: HashMap::new(),
        active: HashSet::new(),
        inflight: 0,
        waiting: false,
        shutdown: None,
        fatal_tx: Some(fatal_tx),
    };
    tokio::spawn(coordinator.run(ingress_rx, quit_rx));

    QueueHandle {
        ingress: ingress_tx,
        quit_tx,
        fatal_rx,
    }
}

struct Coordinator {
    syncer: Arc<dyn PathSyncer>,
    delay: Duration,
    max_in_flight: usize,
    /// Min-heap of (insertion stamp, path); entries go stale when the map
    /// entry is re-stamped, and are skipped on pop
    heap: BinaryHeap<Reverse<(Instant, String)>>,
    pending: HashMap<String, Candidate>,
    /// Paths currently being reconciled; a new event for one of these is
    /// deferred so the same path never runs twice at once
    active: HashSet<String>,
    inflight: usize,
    waiting: bool,
    /// Latched shutdown handshake; `Some` means draining
    shutdown: Option<oneshot::Sender<()>>,
    fatal_tx: Option<oneshot::Sender<SyncError>>,
}

impl Coordinator {
    async fn run(
        mut self,
        mut ingress_rx: mpsc::Receiver<PathEvent>,
        mut quit_rx: mpsc::Receiver<oneshot::Sender<()>>,
    ) {
        // internal wakeups from sleepers and finished workers
        let (timer_tx, mut timer_rx) = mpsc::channel::<()>(8);
        let (finished_tx, mut finished_rx) = mpsc::channel::<(String, Option<SyncError>)>(64);
        let mut ingress_open = true;

        loop {
            tokio::select! {
                event = ingress_rx.recv(), if ingress_open => {
                    match event {
                        Some(event) => self.handle_ingress(event),
                        None => {
                            ingress_open = false;
                            // all senders dropped: treat as a quiet shutdown
                            if self.shutdown.is_none() {
                                debug!("ingress closed, draining queue");
                                let (tx, _rx) = oneshot::channel();
                                self.shutdown = Some(tx);
                                self.waiting = false;
                            }
                        }
                    }
                }

                Some(()) = timer_rx.recv() => {
                    self.waiting = false;
                    self.dispatch_ready(&finished_tx);
                }

                Some((path, outcome)) = finished_rx.recv() => {
                    self.inflight -= 1;
                    self.active.remove(&path);
                    if let Some(err) = outcome {
                        if let Some(tx) = self.fatal_tx.take() {
                            let _ = tx.send(err);
                        }
                    }
                    // a slot opened; see if the head of the queue is ready
                    self.dispatch_ready(&finished_tx);
                }

                Some(done) = quit_rx.recv() => {
                    info!(
                        pending = self.pending.len(),
                        inflight = self.inflight,
                        "Shutdown requested, draining queue"
                    );
                    self.shutdown = Some(done);
                    // don't wait out the pending sleeper; drain now
                    self.waiting = false;
                    self.dispatch_ready(&finished_tx);
                }
            }

            self.arm_sleeper(&timer_tx);

            if self.inflight == 0 && self.pending.is_empty() {
                if let Some(done) = self.shutdown.take() {
                    info!("Update queue drained");
                    let _ = done.send(());
                    return;
                }
            }
        }
    }

    fn handle_ingress(&mut self, event: PathEvent) {
        let now = Instant::now();

        if let Some(existing) = self.pending.get_mut(&event.path) {
            // touch: reset the quiet period, remember the latest direction
            existing.updated = now;
            existing.push = event.push;
            debug!(path = %event.path, "Pending entry touched");
            return;
        }

        let mut inserted = now;
        if event.immediate {
            // backdate so the entry is already eligible
            inserted = now.checked_sub(self.delay).unwrap_or(now);
        }
        self.heap.push(Reverse((inserted, event.path.clone())));
        self.pending.insert(
            event.path,
            Candidate {
                inserted,
                updated: inserted,
                push: event.push,
            },
        );
    }

    /// Pops every entry that has been quiet long enough, spawning workers
    /// until the in-flight cap or a too-young head stops the scan
    fn dispatch_ready(&mut self, finished_tx: &mpsc::Sender<(String, Option<SyncError>)>) {
        let now = Instant::now();
        // entries whose path is mid-reconciliation; put back afterwards so
        // this scan cannot pop them forever
        let mut deferred: Vec<(Instant, String)> = Vec::new();

        while let Some(Reverse((stamp, path))) = self.heap.pop() {
            let Some(candidate) = self.pending.get_mut(&path) else {
                continue; // stale heap entry for an already-dispatched path
            };
            if candidate.inserted != stamp {
                continue; // stale: the entry was re-stamped below
            }

            // touched while it waited: restart its quiet period
            if candidate.inserted != candidate.updated {
                candidate.inserted = candidate.updated;
                self.heap.push(Reverse((candidate.inserted, path)));
                continue;
            }

            // not quiet long enough (drain skips this check)
            if self.shutdown.is_none() && now.duration_since(candidate.inserted) < self.delay {
                self.heap.push(Reverse((stamp, path)));
                break;
            }

            if self.inflight >= self.max_in_flight {
                self.heap.push(Reverse((stamp, path)));
                break;
            }

            // the same path may not run twice at once; wait for its worker
            if self.active.contains(&path) {
                deferred.push((stamp, path));
                continue;
            }

            let push = candidate.push;
            self.pending.remove(&path);
            self.active.insert(path.clone());
            self.inflight += 1;

            let syncer = Arc::clone(&self.syncer);
            let finished = finished_tx.clone();
            tokio::spawn(async move {
                debug!(path = %path, push, "Reconciliation starting");
                let outcome = match syncer.sync_path(&path, push).await {
                    Ok(()) => None,
                    Err(err) if err.is_fatal() => {
                        error!(path = %path, error = %err, "Fatal error during reconciliation");
                        Some(err)
                    }
                    Err(err) => {
                        warn!(path = %path, error = %err, "Reconciliation failed, path skipped");
                        None
                    }
                };
                let _ = finished.send((path, outcome)).await;
            });
        }

        for (stamp, path) in deferred {
            self.heap.push(Reverse((stamp, path)));
        }
    }

    /// Arms a sleeper for the head entry when none is pending
    fn arm_sleeper(&mut self, timer_tx: &mpsc::Sender<()>) {
        if self.waiting || self.inflight >= self.max_in_flight || self.pending.is_empty() {
            return;
        }
        // entries waiting only for their in-flight worker need no sleeper;
        // the finished event re-triggers dispatch
        if self.pending.keys().all(|p| self.active.contains(p)) {
            return;
        }
        let Some(Reverse((head, _))) = self.heap.peek() else {
            return;
        };

        // a stale head only makes the sleeper fire early, which is harmless
        let deadline = *head + self.delay;
        let draining = self.shutdown.is_some();
        self.waiting = true;

        let timer = timer_tx.clone();
        tokio::spawn(async move {
            let pause = deadline.saturating_duration_since(Instant::now());
            if !pause.is_zero() && !draining {
                tokio::time::sleep(pause).await;
            }
            let _ = timer.send(()).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Records every call; optionally blocks to probe the in-flight cap
    struct RecordingSyncer {
        calls: Mutex<Vec<(String, bool)>>,
        running: AtomicUsize,
        max_running: AtomicUsize,
        block_ms: u64,
        fail_with_cache_error: AtomicBool,
    }

    impl RecordingSyncer {
        fn new(block_ms: u64) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                running: AtomicUsize::new(0),
                max_running: AtomicUsize::new(0),
                block_ms,
                fail_with_cache_error: AtomicBool::new(false),
            })
        }

        fn calls(&self) -> Vec<(String, bool)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl PathSyncer for RecordingSyncer {
        async fn sync_path(&self, relative: &str, push: bool) -> Result<(), SyncError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);

            if self.block_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.block_ms)).await;
            }
            self.calls
                .lock()
                .unwrap()
                .push((relative.to_string(), push));
            self.running.fetch_sub(1, Ordering::SeqCst);

            if self.fail_with_cache_error.load(Ordering::SeqCst) {
                Err(SyncError::Cache("simulated".into()))
            } else {
                Ok(())
            }
        }
    }

    fn event(path: &str, push: bool, immediate: bool) -> PathEvent {
        PathEvent {
            path: path.to_string(),
            push,
            immediate,
        }
    }

    #[tokio::test]
    async fn burst_for_one_path_runs_exactly_once_with_last_push_flag() {
        let syncer = RecordingSyncer::new(0);
        let handle = start(syncer.clone(), Duration::from_millis(50), 4);

        for _ in 0..9 {
            handle.enqueue(event("a.txt", true, false)).await;
        }
        // the last event flips the direction flag
        handle.enqueue(event("a.txt", false, false)).await;

        handle.shutdown().await;

        let calls = syncer.calls();
        assert_eq!(calls.len(), 1, "burst must coalesce to one run");
        assert_eq!(calls[0], ("a.txt".to_string(), false));
    }

    #[tokio::test]
    async fn distinct_paths_each_run() {
        let syncer = RecordingSyncer::new(0);
        let handle = start(syncer.clone(), Duration::from_millis(10), 4);

        for name in ["a", "b", "c"] {
            handle.enqueue(event(name, true, false)).await;
        }
        handle.shutdown().await;

        let mut paths: Vec<String> = syncer.calls().into_iter().map(|(p, _)| p).collect();
        paths.sort();
        assert_eq!(paths, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn in_flight_never_exceeds_cap() {
        let syncer = RecordingSyncer::new(30);
        let handle = start(syncer.clone(), Duration::from_millis(1), 3);

        for i in 0..12 {
            handle.enqueue(event(&format!("file-{i}"), true, true)).await;
        }
        handle.shutdown().await;

        assert_eq!(syncer.calls().len(), 12);
        assert!(
            syncer.max_running.load(Ordering::SeqCst) <= 3,
            "observed {} concurrent reconciliations",
            syncer.max_running.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn immediate_events_bypass_the_delay() {
        let syncer = RecordingSyncer::new(0);
        let handle = start(syncer.clone(), Duration::from_secs(60), 2);

        handle.enqueue(event("now.txt", true, true)).await;

        // with a 60s debounce, only the backdated entry can run this soon
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(syncer.calls().len(), 1);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn debounce_holds_back_young_entries() {
        let syncer = RecordingSyncer::new(0);
        let handle = start(syncer.clone(), Duration::from_millis(200), 2);

        handle.enqueue(event("young.txt", true, false)).await;

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(
            syncer.calls().is_empty(),
            "entry ran before its quiet period elapsed"
        );

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(syncer.calls().len(), 1);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn touching_an_entry_restarts_its_quiet_period() {
        let syncer = RecordingSyncer::new(0);
        let handle = start(syncer.clone(), Duration::from_millis(150), 2);

        handle.enqueue(event("busy.txt", true, false)).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        // touched before it settled; the window restarts
        handle.enqueue(event("busy.txt", true, false)).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(syncer.calls().is_empty(), "touched entry settled too early");

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(syncer.calls().len(), 1);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_drains_everything_without_waiting() {
        let syncer = RecordingSyncer::new(0);
        // one-hour debounce: only the drain can run these
        let handle = start(syncer.clone(), Duration::from_secs(3600), 4);

        for i in 0..5 {
            handle.enqueue(event(&format!("f{i}"), true, false)).await;
        }

        tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
            .await
            .expect("drain must not wait out the debounce window");

        assert_eq!(syncer.calls().len(), 5);
    }

    #[tokio::test]
    async fn same_path_never_runs_concurrently() {
        let syncer = RecordingSyncer::new(40);
        let handle = start(syncer.clone(), Duration::from_millis(1), 8);

        // first event dispatches immediately; the second arrives while the
        // worker is still sleeping inside sync_path
        handle.enqueue(event("hot.txt", true, true)).await;
        tokio::time::sleep(Duration::from_millis(15)).await;
        handle.enqueue(event("hot.txt", true, true)).await;

        handle.shutdown().await;

        assert_eq!(syncer.calls().len(), 2, "both events must run");
        assert_eq!(
            syncer.max_running.load(Ordering::SeqCst),
            1,
            "the same path overlapped with itself"
        );
    }

    #[tokio::test]
    async fn fatal_errors_surface_on_the_fatal_channel() {
        let syncer = RecordingSyncer::new(0);
        syncer.fail_with_cache_error.store(true, Ordering::SeqCst);
        let mut handle = start(syncer.clone(), Duration::from_millis(1), 2);

        handle.enqueue(event("doomed.txt", true, true)).await;

        let err = tokio::time::timeout(Duration::from_secs(5), handle.fatal())
            .await
            .expect("fatal signal expected")
            .expect("fatal channel closed");
        assert!(err.is_fatal());
    }
}
