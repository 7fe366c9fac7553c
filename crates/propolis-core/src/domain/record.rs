//! The per-path working record
//!
//! A [`FileRecord`] is the unit of work for one reconciliation run. It
//! carries every name variation a path is known by, the three metadata
//! views being reconciled (local filesystem, metadata cache, remote
//! server), lazily computed content hashes, and an optional content
//! handle ready for upload.
//!
//! Records are created by the scanners, the filesystem walk, or the
//! scheduler, are mutated only by the reconciler that owns them for that
//! run, and are dropped when the run finishes. Nothing survives across
//! runs except through the metadata cache.

use std::path::{Path, PathBuf};

use super::errors::SyncError;
use super::newtypes::BucketName;

/// md5 of zero bytes; records with this hash never enter the
/// content-addressed dedup map
pub const EMPTY_FILE_MD5: &str = "d41d8cd98f00b204e9800998ecf8427e";

/// The same digest in base64, as a Content-MD5 header value
pub const EMPTY_FILE_MD5_BASE64: &str = "1B2M2Y8AsgTpgAmY7PhCfg==";

// File-type bits, kept in the same octal form the wire protocol uses
pub const S_IFMT: u32 = 0o170000;
pub const S_IFLNK: u32 = 0o120000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IROTH: u32 = 0o4;

/// What kind of filesystem object a metadata view describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Ordinary regular file
    Regular,
    /// Symbolic link; the synced "content" is the link target string
    Symlink,
    /// Directory; treated as an empty file, tracked only when enabled
    Directory,
    /// Socket, fifo, device: never synced
    Other,
}

impl FileKind {
    /// Derives the kind from the file-type bits of a full st_mode
    pub fn from_mode(mode: u32) -> Self {
        match mode & S_IFMT {
            S_IFLNK => FileKind::Symlink,
            S_IFDIR => FileKind::Directory,
            S_IFREG => FileKind::Regular,
            _ => FileKind::Other,
        }
    }
}

/// One metadata view of a path: what the local filesystem, the cache, or
/// the server knows about it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    /// Full st_mode including file-type bits
    pub mode: u32,
    /// Owning user id
    pub uid: u32,
    /// Owning group id
    pub gid: u32,
    /// Size in bytes (directories are recorded as zero)
    pub size: u64,
    /// Modification time in nanoseconds since the epoch
    pub mtime_ns: i64,
}

impl FileMeta {
    /// The kind encoded in the mode bits
    pub fn kind(&self) -> FileKind {
        FileKind::from_mode(self.mode)
    }

    /// Permission bits only, without the file-type bits
    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }

    /// Whether the world-read bit is set (drives the public-read ACL)
    pub fn world_readable(&self) -> bool {
        self.mode & S_IROTH != 0
    }

    /// Whether two views agree on everything the cheap comparison checks
    ///
    /// Content is deliberately not part of this; a matching view can still
    /// hide a content change, which is what `--paranoid` exists for.
    pub fn agrees_with(&self, other: &FileMeta) -> bool {
        self.mode == other.mode
            && self.uid == other.uid
            && self.gid == other.gid
            && self.size == other.size
            && self.mtime_ns == other.mtime_ns
    }
}

/// Content ready to be uploaded, positioned at offset zero
///
/// Dropping the handle releases it; there is no explicit close step.
#[derive(Debug)]
pub enum ContentSource {
    /// Zero-length body (empty files and directories)
    Empty,
    /// In-memory body (symlink target bytes)
    Bytes(Vec<u8>),
    /// An open regular file, already rewound after hashing
    File {
        /// Open handle at offset zero
        file: tokio::fs::File,
        /// Size captured when the hash was computed
        len: u64,
    },
}

impl ContentSource {
    /// Number of bytes the body will carry, declared up front so the
    /// request can send an explicit Content-Length
    pub fn declared_len(&self) -> u64 {
        match self {
            ContentSource::Empty => 0,
            ContentSource::Bytes(bytes) => bytes.len() as u64,
            ContentSource::File { len, .. } => *len,
        }
    }
}

/// In-memory reconciliation record for one path
#[derive(Debug)]
pub struct FileRecord {
    /// Absolute path on the local filesystem
    pub local_path: PathBuf,
    /// Key within the bucket (no leading slash)
    pub server_key: String,
    /// Bucket-qualified path: `/bucket/key`
    pub full_server_path: String,
    /// Absolute URL for this object (unencoded; the bucket client
    /// percent-encodes the path at request time)
    pub url: String,

    /// True when the local side is authoritative for this record
    pub push: bool,
    /// True when the record should bypass the scheduler's debounce delay
    pub immediate: bool,

    /// Local filesystem view; `None` when the path does not exist locally
    pub local: Option<FileMeta>,
    /// Lazily computed md5 of the local content, lowercase hex
    pub local_hash_hex: Option<String>,
    /// The same digest in base64, for the Content-MD5 header
    pub local_hash_base64: Option<String>,

    /// What the cache last recorded about the remote object
    pub cache: Option<FileMeta>,
    /// Cached md5 of the remote content, lowercase hex
    pub cache_hash_hex: Option<String>,

    /// md5 reported by a server scan or HEAD, lowercase hex
    pub server_hash_hex: Option<String>,
    /// Size reported by a server scan
    pub server_size: Option<u64>,

    /// Content handle filled by the hasher, ready at offset zero
    pub contents: Option<ContentSource>,
}

impl FileRecord {
    /// Whether the local view describes a kind this run tracks
    ///
    /// Regular files and symlinks are always tracked; directories only when
    /// enabled; everything else never.
    pub fn local_kind_tracked(&self, track_directories: bool) -> bool {
        match self.local.as_ref().map(FileMeta::kind) {
            Some(FileKind::Regular) | Some(FileKind::Symlink) => true,
            Some(FileKind::Directory) => track_directories,
            Some(FileKind::Other) | None => false,
        }
    }
}

/// Derives every name variation of a path from the configured roots
///
/// The mapping is deterministic in both directions: a path relative to the
/// local root maps to exactly one server key under the bucket root, and a
/// listed server key maps back to exactly one local path.
#[derive(Debug, Clone)]
pub struct PathModel {
    local_root: PathBuf,
    bucket: BucketName,
    /// Key prefix within the bucket; empty, or a path with no leading or
    /// trailing slash
    bucket_root: String,
    /// Scheme and host for building object URLs
    base_url: String,
}

impl PathModel {
    /// Creates a path model for the given roots
    pub fn new(
        local_root: PathBuf,
        bucket: BucketName,
        bucket_root: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        let bucket_root = bucket_root.into();
        let bucket_root = bucket_root.trim_matches('/').to_string();
        let base_url = base_url.into();
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            local_root,
            bucket,
            bucket_root,
            base_url,
        }
    }

    /// The bucket this model maps into
    pub fn bucket(&self) -> &BucketName {
        &self.bucket
    }

    /// The key prefix within the bucket (possibly empty)
    pub fn bucket_root(&self) -> &str {
        &self.bucket_root
    }

    /// The local directory being mirrored
    pub fn local_root(&self) -> &Path {
        &self.local_root
    }

    /// Builds a record from a path relative to the local root
    pub fn record_for(&self, relative: &str, push: bool, immediate: bool) -> FileRecord {
        let relative = relative.trim_start_matches("./").trim_start_matches('/');
        let server_key = if self.bucket_root.is_empty() {
            relative.to_string()
        } else if relative.is_empty() {
            self.bucket_root.clone()
        } else {
            format!("{}/{}", self.bucket_root, relative)
        };

        FileRecord {
            local_path: self.local_root.join(relative),
            full_server_path: format!("/{}/{}", self.bucket, server_key),
            url: format!("{}/{}", self.base_url, server_key),
            server_key,
            push,
            immediate,
            local: None,
            local_hash_hex: None,
            local_hash_base64: None,
            cache: None,
            cache_hash_hex: None,
            server_hash_hex: None,
            server_size: None,
            contents: None,
        }
    }

    /// Builds a record from a full server key, as returned by a bucket
    /// list or a cache sweep
    ///
    /// Server-derived records are always immediate: they come from bulk
    /// scans, not from filesystem activity worth debouncing.
    pub fn record_for_server_key(&self, key: &str, push: bool) -> Result<FileRecord, SyncError> {
        let relative = self.relative_for_server_key(key)?;
        Ok(self.record_for(&relative, push, true))
    }

    /// Strips the bucket-root prefix from a server key
    pub fn relative_for_server_key(&self, key: &str) -> Result<String, SyncError> {
        let key = key.trim_start_matches('/');
        if self.bucket_root.is_empty() {
            return Ok(key.to_string());
        }
        let prefix = format!("{}/", self.bucket_root);
        match key.strip_prefix(&prefix) {
            Some(rest) => Ok(rest.to_string()),
            None => Err(SyncError::Config(format!(
                "server key {key:?} is outside the bucket root {:?}",
                self.bucket_root
            ))),
        }
    }

    /// Maps an absolute local path back to its root-relative form, using
    /// forward slashes; returns `None` for paths outside the local root
    pub fn relative_for_local(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.local_root).ok()?;
        let s = rel.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/");
        Some(s)
    }
}
