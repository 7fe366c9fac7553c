//! Propolis S3 - signed bucket access
//!
//! Implements the [`ObjectStore`](propolis_core::ports::ObjectStore) port
//! against an S3-compatible REST endpoint with v2-style HMAC-SHA1 request
//! signing.
//!
//! ## Key components
//!
//! - [`BucketClient`] - GET/HEAD/PUT/DELETE/COPY/LIST against one bucket
//! - [`sign`] - string-to-sign assembly and the slash-preserving URL encoder
//! - [`headers`] - the metadata-preserving header protocol (uid/gid/mode/
//!   mtime/acl/content-type)
//! - [`MimeTable`] - `/etc/mime.types` lookup for upload content types
//! - [`list`] - `ListBucketResult` XML parsing

pub mod client;
pub mod headers;
pub mod list;
pub mod mime;
pub mod sign;

pub use client::BucketClient;
pub use mime::MimeTable;
