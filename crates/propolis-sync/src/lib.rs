//! Propolis Sync - the reconciliation core
//!
//! This crate contains the hard parts of Propolis:
//!
//! - [`engine::Reconciler`] - the per-path three-way compare over
//!   {local, cache, server} and the committed action it decides on
//! - [`queue`] - the debounced, bounded-concurrency update queue that
//!   coalesces filesystem events and drives the reconciler
//! - [`scanner`] - the startup bulk scans (full bucket listing, cache
//!   sweep and audit, local tree walk)
//! - [`hasher`] - content hashing that leaves a rewound handle ready to
//!   upload
//! - [`watcher`] - the thin adapter from OS file notifications to queue
//!   events

pub mod engine;
pub mod filesystem;
pub mod hasher;
pub mod queue;
pub mod scanner;
pub mod watcher;

pub use engine::Reconciler;
pub use queue::{PathEvent, QueueHandle};
pub use scanner::Catalog;
