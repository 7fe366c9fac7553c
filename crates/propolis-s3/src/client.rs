//! Signed bucket client
//!
//! One [`BucketClient`] provides signed access to one bucket. Every
//! request is stamped with the current date, signed (v2 HMAC-SHA1), and
//! classified on return: 2xx is success, a 404 on HEAD is a logical
//! "absent", anything else surfaces as a remote error with its status
//! line.
//!
//! Uploads stream their body and always declare an explicit
//! `Content-Length` (including zero; classic v2 endpoints reject a PUT
//! without one).

use std::time::Duration;

use chrono::Utc;
use md5::{Digest, Md5};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_LENGTH};
use reqwest::{Body, Method, Response};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use propolis_core::config::Settings;
use propolis_core::domain::record::{ContentSource, FileMeta, FileRecord};
use propolis_core::domain::{BucketName, SyncError};
use propolis_core::ports::{ListPage, ObjectStore};

use crate::headers::{apply_metadata_headers, parse_metadata_headers};
use crate::list::parse_list;
use crate::mime::MimeTable;
use crate::sign;

const STORAGE_CLASS_HEADER: &str = "x-amz-storage-class";
const REDUCED_REDUNDANCY: &str = "REDUCED_REDUNDANCY";

/// Whole-request timeout; bounds how long shutdown can stall on one call
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Signed access to one S3-compatible bucket
pub struct BucketClient {
    http: reqwest::Client,
    bucket: BucketName,
    base_url: String,
    access_key: String,
    secret_key: String,
    public: bool,
    reduced_redundancy: bool,
    mime: MimeTable,
}

impl BucketClient {
    /// Creates a client for the configured bucket endpoint
    pub fn new(
        settings: &Settings,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        mime: MimeTable,
    ) -> Result<Self, SyncError> {
        Self::with_base_url(
            settings.bucket.clone(),
            settings.endpoint_url(),
            access_key,
            secret_key,
            settings.public,
            settings.reduced_redundancy,
            mime,
        )
    }

    /// Creates a client against an explicit base URL (used by tests to
    /// point at a mock server)
    pub fn with_base_url(
        bucket: BucketName,
        base_url: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        public: bool,
        reduced_redundancy: bool,
        mime: MimeTable,
    ) -> Result<Self, SyncError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build http client: {e}")))?;

        Ok(Self {
            http,
            bucket,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            public,
            reduced_redundancy,
            mime,
        })
    }

    /// The request URL for a key, percent-encoded with slashes preserved
    fn wire_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, sign::url_encode(key))
    }

    /// The canonical resource the signature covers
    fn canonical_resource(&self, key: &str) -> String {
        sign::url_encode(&format!("/{}/{}", self.bucket, key))
    }

    /// Stamps the date and signs the header set for one request
    fn signed_headers(
        &self,
        method: &Method,
        key: &str,
        mut headers: HeaderMap,
    ) -> Result<HeaderMap, SyncError> {
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        headers.insert(
            "date",
            HeaderValue::from_str(&date)
                .map_err(|e| SyncError::Config(format!("invalid date header: {e}")))?,
        );

        let auth = sign::authorization(
            &headers,
            method.as_str(),
            &self.canonical_resource(key),
            &self.access_key,
            &self.secret_key,
        );
        headers.insert(
            "authorization",
            HeaderValue::from_str(&auth)
                .map_err(|e| SyncError::Config(format!("invalid credential characters: {e}")))?,
        );

        Ok(headers)
    }

    /// Maps a 2xx response through, everything else to a remote error
    fn check_status(resp: Response) -> Result<Response, SyncError> {
        if resp.status().is_success() {
            Ok(resp)
        } else {
            Err(SyncError::Remote {
                status: resp.status().as_u16(),
                status_line: resp.status().to_string(),
            })
        }
    }

    fn net_err(e: reqwest::Error) -> SyncError {
        SyncError::Network(e.to_string())
    }
}

#[async_trait::async_trait]
impl ObjectStore for BucketClient {
    async fn upload(&self, record: &mut FileRecord) -> Result<(), SyncError> {
        let meta = record.local.clone().ok_or_else(|| {
            SyncError::Config(format!("upload of {} without a local view", record.server_key))
        })?;

        let mut headers = HeaderMap::new();
        apply_metadata_headers(&mut headers, &meta, &record.server_key, self.public, &self.mime);
        if let Some(b64) = record.local_hash_base64.as_deref() {
            if let Ok(v) = HeaderValue::from_str(b64) {
                headers.insert("content-md5", v);
            }
        }
        if self.reduced_redundancy {
            headers.insert(STORAGE_CLASS_HEADER, HeaderValue::from_static(REDUCED_REDUNDANCY));
        }

        // the handle is consumed whatever the outcome
        let contents = record.contents.take().unwrap_or(ContentSource::Empty);
        let len = contents.declared_len();
        let body = match contents {
            ContentSource::Empty => {
                // explicit zero length; classic v2 endpoints reject its absence
                headers.insert(CONTENT_LENGTH, HeaderValue::from(0u64));
                Body::from(Vec::new())
            }
            ContentSource::Bytes(bytes) => Body::from(bytes),
            ContentSource::File { file, .. } => {
                // streamed bodies have no size hint; declare the length
                headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
                Body::wrap_stream(ReaderStream::new(file))
            }
        };

        let headers = self.signed_headers(&Method::PUT, &record.server_key, headers)?;
        debug!(key = %record.server_key, bytes = len, "PUT");

        let resp = self
            .http
            .put(self.wire_url(&record.server_key))
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(Self::net_err)?;
        Self::check_status(resp)?;
        Ok(())
    }

    async fn delete(&self, record: &FileRecord) -> Result<(), SyncError> {
        let headers = self.signed_headers(&Method::DELETE, &record.server_key, HeaderMap::new())?;
        debug!(key = %record.server_key, "DELETE");

        let resp = self
            .http
            .delete(self.wire_url(&record.server_key))
            .headers(headers)
            .send()
            .await
            .map_err(Self::net_err)?;
        Self::check_status(resp)?;
        Ok(())
    }

    async fn stat(&self, record: &mut FileRecord) -> Result<(), SyncError> {
        let headers = self.signed_headers(&Method::HEAD, &record.server_key, HeaderMap::new())?;
        debug!(key = %record.server_key, "HEAD");

        let resp = self
            .http
            .head(self.wire_url(&record.server_key))
            .headers(headers)
            .send()
            .await
            .map_err(Self::net_err)?;

        if resp.status().as_u16() == 404 {
            record.cache = None;
            record.cache_hash_hex = None;
            return Ok(());
        }
        let resp = Self::check_status(resp)?;

        record.cache = Some(parse_metadata_headers(resp.headers()));
        record.server_hash_hex = resp
            .headers()
            .get("etag")
            .and_then(|v| v.to_str().ok())
            .map(|etag| etag.trim_matches('"').to_ascii_lowercase());
        Ok(())
    }

    async fn copy(&self, record: &FileRecord, src_full_path: &str) -> Result<(), SyncError> {
        let meta = record.local.clone().ok_or_else(|| {
            SyncError::Config(format!("copy to {} without a local view", record.server_key))
        })?;

        let mut headers = HeaderMap::new();
        apply_metadata_headers(&mut headers, &meta, &record.server_key, self.public, &self.mime);
        headers.insert(
            "x-amz-copy-source",
            HeaderValue::from_str(&sign::url_encode(src_full_path))
                .map_err(|e| SyncError::Config(format!("invalid copy source: {e}")))?,
        );
        headers.insert("x-amz-metadata-directive", HeaderValue::from_static("REPLACE"));
        if self.reduced_redundancy {
            headers.insert(STORAGE_CLASS_HEADER, HeaderValue::from_static(REDUCED_REDUNDANCY));
        }
        headers.insert(CONTENT_LENGTH, HeaderValue::from(0u64));

        let headers = self.signed_headers(&Method::PUT, &record.server_key, headers)?;
        debug!(src = %src_full_path, dst = %record.server_key, "COPY");

        let resp = self
            .http
            .put(self.wire_url(&record.server_key))
            .headers(headers)
            .send()
            .await
            .map_err(Self::net_err)?;
        Self::check_status(resp)?;
        Ok(())
    }

    async fn download(
        &self,
        key: &str,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<FileMeta, SyncError> {
        let headers = self.signed_headers(&Method::GET, key, HeaderMap::new())?;
        debug!(key = %key, "GET");

        let resp = self
            .http
            .get(self.wire_url(key))
            .headers(headers)
            .send()
            .await
            .map_err(Self::net_err)?;
        let mut resp = Self::check_status(resp)?;

        let meta = parse_metadata_headers(resp.headers());
        let expected = resp
            .headers()
            .get("etag")
            .and_then(|v| v.to_str().ok())
            .map(|etag| etag.trim_matches('"').to_ascii_lowercase())
            .ok_or_else(|| SyncError::Remote {
                status: 200,
                status_line: format!("download of {key} carried no ETag"),
            })?;

        // hash while streaming so the body is read exactly once
        let mut hasher = Md5::new();
        while let Some(chunk) = resp.chunk().await.map_err(Self::net_err)? {
            hasher.update(&chunk);
            sink.write_all(&chunk).await?;
        }
        sink.flush().await?;

        let actual = hex::encode(hasher.finalize());
        if actual != expected {
            warn!(key = %key, expected = %expected, actual = %actual, "download integrity failure");
            return Err(SyncError::Integrity {
                key: key.to_string(),
                expected,
                actual,
            });
        }

        Ok(meta)
    }

    async fn list(
        &self,
        prefix: &str,
        marker: &str,
        max_keys: u32,
        recursive: bool,
    ) -> Result<ListPage, SyncError> {
        let headers = self.signed_headers(&Method::GET, "", HeaderMap::new())?;

        let mut query: Vec<(&str, String)> = vec![
            ("prefix", prefix.to_string()),
            ("marker", marker.to_string()),
            ("max-keys", max_keys.to_string()),
        ];
        if !recursive {
            query.push(("delimiter", "/".to_string()));
        }
        debug!(prefix = %prefix, marker = %marker, max_keys, "LIST");

        let resp = self
            .http
            .get(format!("{}/", self.base_url))
            .headers(headers)
            .query(&query)
            .send()
            .await
            .map_err(Self::net_err)?;
        let resp = Self::check_status(resp)?;

        let body = resp.text().await.map_err(Self::net_err)?;
        parse_list(&body)
    }
}
