//! Local content hashing
//!
//! Fills a record's `local_hash_hex`/`local_hash_base64` and leaves
//! `contents` ready to upload, positioned at offset zero:
//!
//! - symlink: the hashed "body" is the link target bytes, wrapped in a
//!   memory buffer
//! - empty file or directory: an empty buffer, hash of empty input
//! - regular file: the file is hashed in a streaming pass, rewound, and
//!   the open handle handed back

use std::io::SeekFrom;
use std::os::unix::ffi::OsStrExt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use md5::{Digest, Md5};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use propolis_core::domain::record::{ContentSource, FileKind, FileRecord};
use propolis_core::domain::SyncError;

/// Hex and base64 renderings of one digest
fn encode_digest(digest: md5::digest::Output<Md5>) -> (String, String) {
    (hex::encode(digest), BASE64.encode(digest))
}

/// Hashes the record's local content and readies `contents` for upload
///
/// Requires `record.local` to be populated. Directories are treated as
/// empty files (their recorded size is forced to zero).
pub async fn hash_local(record: &mut FileRecord) -> Result<(), SyncError> {
    let meta = record.local.as_mut().ok_or_else(|| {
        SyncError::Config(format!("hashing {} without a local view", record.server_key))
    })?;

    let mut hasher = Md5::new();

    match meta.kind() {
        FileKind::Symlink => {
            let target = tokio::fs::read_link(&record.local_path).await?;
            let bytes = target.as_os_str().as_bytes().to_vec();
            hasher.update(&bytes);
            record.contents = Some(ContentSource::Bytes(bytes));
        }
        FileKind::Directory => {
            meta.size = 0;
            record.contents = Some(ContentSource::Empty);
        }
        _ if meta.size == 0 => {
            record.contents = Some(ContentSource::Empty);
        }
        _ => {
            let mut file = tokio::fs::File::open(&record.local_path).await?;
            let mut buf = vec![0u8; 64 * 1024];
            let mut hashed: u64 = 0;
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
                hashed += n as u64;
            }
            file.seek(SeekFrom::Start(0)).await?;
            record.contents = Some(ContentSource::File {
                file,
                len: hashed,
            });
        }
    }

    let (hex, b64) = encode_digest(hasher.finalize());
    record.local_hash_hex = Some(hex);
    record.local_hash_base64 = Some(b64);
    Ok(())
}
