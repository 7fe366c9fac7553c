//! Propolis Core - Domain model and port definitions
//!
//! This crate contains the pieces every other Propolis crate builds on:
//! - Domain types ([`FileRecord`](domain::record::FileRecord), metadata
//!   views, validated newtypes)
//! - The [`Settings`](config::Settings) struct that flows explicitly to
//!   every component (no process-wide globals)
//! - Port traits for the object store, the metadata cache, and the
//!   per-path reconciler

pub mod config;
pub mod domain;
pub mod ports;
