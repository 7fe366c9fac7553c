//! Shared test helpers for bucket client integration tests

use std::io::Cursor;
use std::path::PathBuf;

use wiremock::MockServer;

use propolis_core::domain::{BucketName, FileMeta, FileRecord, PathModel};
use propolis_s3::{BucketClient, MimeTable};

/// Starts a mock server and returns a client pointed at it
pub async fn setup() -> (MockServer, BucketClient) {
    let server = MockServer::start().await;
    let client = BucketClient::with_base_url(
        BucketName::new("test-bucket").unwrap(),
        server.uri(),
        "test-access-key",
        "test-secret",
        true,
        false,
        MimeTable::from_reader(Cursor::new("image/jpeg\tjpg\ntext/plain\ttxt\n")),
    )
    .expect("client");
    (server, client)
}

/// A path model matching the test client
pub fn model(server: &MockServer) -> PathModel {
    PathModel::new(
        PathBuf::from("/data"),
        BucketName::new("test-bucket").unwrap(),
        "",
        server.uri(),
    )
}

/// A record with a populated local view, ready for upload/copy calls
pub fn record_with_local(server: &MockServer, rel: &str, size: u64) -> FileRecord {
    let mut record = model(server).record_for(rel, true, false);
    record.local = Some(FileMeta {
        mode: 0o100644,
        uid: 1000,
        gid: 1000,
        size,
        mtime_ns: 1_720_000_000_000_000_000,
    });
    record
}
