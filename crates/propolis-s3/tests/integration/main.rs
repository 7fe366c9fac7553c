//! Integration tests for the bucket client
//!
//! Runs every request type against a wiremock server and verifies the
//! wire-level contract: signing headers attached, metadata headers
//! round-tripped, 404-on-HEAD treated as absent, download integrity
//! enforcement, and list pagination.

mod common;
mod test_requests;
