//! Request-level tests for every bucket operation

use wiremock::matchers::{body_bytes, header, header_exists, method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

use propolis_core::domain::record::ContentSource;
use propolis_core::domain::{FileKind, SyncError};
use propolis_core::ports::ObjectStore;

use crate::common;

// ============================================================================
// Upload
// ============================================================================

#[tokio::test]
async fn upload_sends_signed_request_with_metadata() {
    let (server, client) = common::setup().await;

    Mock::given(method("PUT"))
        .and(path("/photos/a.jpg"))
        .and(header_exists("authorization"))
        .and(header_exists("date"))
        .and(header("x-amz-acl", "public-read"))
        .and(header("x-amz-meta-mode", "0100644"))
        .and(header("x-amz-meta-gid", "1000"))
        .and(header("content-type", "image/jpeg"))
        .and(header("content-md5", "XrY7u+Ae7tCTyyK7j1rNww=="))
        .and(body_bytes(b"hello world".to_vec()))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut record = common::record_with_local(&server, "photos/a.jpg", 11);
    record.local_hash_hex = Some("5eb63bbbe01eeed093cb22bb8f5acdc3".to_string());
    record.local_hash_base64 = Some("XrY7u+Ae7tCTyyK7j1rNww==".to_string());
    record.contents = Some(ContentSource::Bytes(b"hello world".to_vec()));

    client.upload(&mut record).await.expect("upload");
    assert!(record.contents.is_none(), "contents consumed by upload");
}

#[tokio::test]
async fn upload_of_empty_body_declares_zero_length() {
    let (server, client) = common::setup().await;

    Mock::given(method("PUT"))
        .and(path("/empty.txt"))
        .and(header("content-length", "0"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut record = common::record_with_local(&server, "empty.txt", 0);
    record.contents = Some(ContentSource::Empty);

    client.upload(&mut record).await.expect("empty upload");
}

#[tokio::test]
async fn upload_failure_is_a_remote_error() {
    let (server, client) = common::setup().await;

    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let mut record = common::record_with_local(&server, "denied.txt", 1);
    record.contents = Some(ContentSource::Bytes(vec![b'x']));

    let err = client.upload(&mut record).await.unwrap_err();
    assert!(matches!(err, SyncError::Remote { status: 403, .. }));
    assert!(record.contents.is_none(), "contents consumed even on failure");
}

// ============================================================================
// Stat
// ============================================================================

#[tokio::test]
async fn stat_404_is_absent_not_an_error() {
    let (server, client) = common::setup().await;

    Mock::given(method("HEAD"))
        .and(path("/missing.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let mut record = common::model(&server).record_for("missing.txt", true, false);
    client.stat(&mut record).await.expect("404 is not an error");
    assert!(record.cache.is_none());
    assert!(record.server_hash_hex.is_none());
}

#[tokio::test]
async fn stat_parses_metadata_and_etag() {
    let (server, client) = common::setup().await;

    Mock::given(method("HEAD"))
        .and(path("/present.txt"))
        .respond_with(
            ResponseTemplate::new(200)
                .append_header("ETag", "\"0123456789ABCDEF0123456789abcdef\"")
                .append_header("x-amz-meta-mode", "0100640")
                .append_header("x-amz-meta-uid", "1234 (no-such-user-zzz)")
                .append_header("x-amz-meta-gid", "42")
                .append_header("x-amz-meta-mtime", "1720000000.250000000 (ignored)")
                .append_header("Content-Length", "17")
                .append_header("Content-Type", "text/plain"),
        )
        .mount(&server)
        .await;

    let mut record = common::model(&server).record_for("present.txt", true, false);
    client.stat(&mut record).await.expect("stat");

    let meta = record.cache.expect("metadata view filled");
    assert_eq!(meta.mode, 0o100640);
    assert_eq!(meta.uid, 1234);
    assert_eq!(meta.gid, 42);
    assert_eq!(meta.size, 17);
    assert_eq!(meta.mtime_ns, 1_720_000_000_250_000_000);
    assert_eq!(
        record.server_hash_hex.as_deref(),
        Some("0123456789abcdef0123456789abcdef"),
        "etag is unquoted and lowercased"
    );
}

#[tokio::test]
async fn stat_server_error_is_a_remote_error() {
    let (server, client) = common::setup().await;

    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let mut record = common::model(&server).record_for("x.txt", true, false);
    let err = client.stat(&mut record).await.unwrap_err();
    assert!(matches!(err, SyncError::Remote { status: 500, .. }));
    assert!(err.is_transient());
}

// ============================================================================
// Copy and delete
// ============================================================================

#[tokio::test]
async fn copy_sends_encoded_source_and_replace_directive() {
    let (server, client) = common::setup().await;

    Mock::given(method("PUT"))
        .and(path("/renamed.jpg"))
        .and(header(
            "x-amz-copy-source",
            "/test-bucket/photos%202024/a.jpg",
        ))
        .and(header("x-amz-metadata-directive", "REPLACE"))
        .and(header_exists("x-amz-meta-mode"))
        .and(header("content-length", "0"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let record = common::record_with_local(&server, "renamed.jpg", 17);
    client
        .copy(&record, "/test-bucket/photos 2024/a.jpg")
        .await
        .expect("copy");
}

#[tokio::test]
async fn delete_issues_a_signed_delete() {
    let (server, client) = common::setup().await;

    Mock::given(method("DELETE"))
        .and(path("/old.txt"))
        .and(header_exists("authorization"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let record = common::model(&server).record_for("old.txt", true, false);
    client.delete(&record).await.expect("delete");
}

// ============================================================================
// Download
// ============================================================================

#[tokio::test]
async fn download_streams_and_verifies_md5() {
    let (server, client) = common::setup().await;

    // md5("hello world") = 5eb63bbbe01eeed093cb22bb8f5acdc3
    Mock::given(method("GET"))
        .and(path("/greeting.txt"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"hello world".to_vec())
                .append_header("ETag", "\"5eb63bbbe01eeed093cb22bb8f5acdc3\"")
                .append_header("x-amz-meta-mode", "0100644")
                .append_header("x-amz-meta-mtime", "1720000000"),
        )
        .mount(&server)
        .await;

    let mut sink = Vec::new();
    let meta = client
        .download("greeting.txt", &mut sink)
        .await
        .expect("download");

    assert_eq!(sink, b"hello world");
    assert_eq!(meta.kind(), FileKind::Regular);
    assert_eq!(meta.mode, 0o100644);
}

#[tokio::test]
async fn download_with_wrong_etag_fails_integrity() {
    let (server, client) = common::setup().await;

    Mock::given(method("GET"))
        .and(path("/tampered.txt"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"hello world".to_vec())
                .append_header("ETag", "\"00000000000000000000000000000000\""),
        )
        .mount(&server)
        .await;

    let mut sink = Vec::new();
    let err = client.download("tampered.txt", &mut sink).await.unwrap_err();
    match err {
        SyncError::Integrity { expected, actual, .. } => {
            assert_eq!(expected, "00000000000000000000000000000000");
            assert_eq!(actual, "5eb63bbbe01eeed093cb22bb8f5acdc3");
        }
        other => panic!("expected integrity error, got {other:?}"),
    }
}

// ============================================================================
// List
// ============================================================================

#[tokio::test]
async fn list_parses_a_page() {
    let (server, client) = common::setup().await;

    let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult>
  <Name>test-bucket</Name>
  <IsTruncated>true</IsTruncated>
  <Contents>
    <Key>photos/a.jpg</Key>
    <LastModified>2026-07-10T09:30:00.000Z</LastModified>
    <ETag>"0123456789abcdef0123456789abcdef"</ETag>
    <Size>17</Size>
  </Contents>
</ListBucketResult>"#;

    Mock::given(method("GET"))
        .and(path("/"))
        .and(query_param("prefix", "photos"))
        .and(query_param("marker", ""))
        .and(query_param("max-keys", "1000"))
        .respond_with(ResponseTemplate::new(200).set_body_string(xml))
        .mount(&server)
        .await;

    let page = client.list("photos", "", 1000, true).await.expect("list");
    assert!(page.is_truncated);
    assert_eq!(page.entries.len(), 1);
    assert_eq!(page.entries[0].key, "photos/a.jpg");
    assert_eq!(page.entries[0].etag_hex(), "0123456789abcdef0123456789abcdef");
}

#[tokio::test]
async fn non_recursive_list_passes_a_delimiter() {
    let (server, client) = common::setup().await;

    let xml = r#"<ListBucketResult><IsTruncated>false</IsTruncated></ListBucketResult>"#;

    Mock::given(method("GET"))
        .and(path("/"))
        .and(query_param("delimiter", "/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(xml))
        .expect(1)
        .mount(&server)
        .await;

    let page = client.list("", "", 100, false).await.expect("list");
    assert!(!page.is_truncated);
    assert!(page.entries.is_empty());
}
