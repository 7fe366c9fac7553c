//! Local filesystem helpers
//!
//! Small operations the reconciler composes: lstat into a metadata view,
//! temp-file naming for atomic installs, and applying a remote metadata
//! view (mode/owner/mtime) back onto a local path without following
//! symlinks.

use std::os::unix::fs::MetadataExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use nix::sys::stat::{utimensat, UtimensatFlags};
use nix::sys::time::TimeSpec;
use tracing::{debug, warn};

use propolis_core::domain::record::{FileKind, FileMeta};
use propolis_core::domain::SyncError;

/// Stats a path without following symlinks; `None` when absent
pub async fn stat_local(path: &Path) -> Result<Option<FileMeta>, SyncError> {
    match tokio::fs::symlink_metadata(path).await {
        Ok(meta) => Ok(Some(FileMeta {
            mode: meta.mode(),
            uid: meta.uid(),
            gid: meta.gid(),
            size: meta.size(),
            mtime_ns: meta
                .mtime()
                .saturating_mul(1_000_000_000)
                .saturating_add(meta.mtime_nsec()),
        })),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// The temporary sibling a download lands in before the atomic rename
pub fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    path.with_file_name(format!(".{name}.propolis-tmp"))
}

/// Creates the parent directory chain for a path
pub async fn ensure_parent(path: &Path) -> Result<(), SyncError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(())
}

/// Applies a metadata view onto a local path
///
/// Permissions are skipped for symlinks (Linux has no lchmod). Ownership
/// changes are attempted but only logged on failure: they need privileges
/// an ordinary sync run usually does not have.
pub fn apply_metadata(path: &Path, meta: &FileMeta) -> Result<(), SyncError> {
    let is_symlink = meta.kind() == FileKind::Symlink;

    if !is_symlink {
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(meta.permissions()))?;
    }

    if let Err(e) = std::os::unix::fs::lchown(path, Some(meta.uid), Some(meta.gid)) {
        debug!(path = %path.display(), error = %e, "ownership not applied");
    }

    let sec = meta.mtime_ns.div_euclid(1_000_000_000);
    let ns = meta.mtime_ns.rem_euclid(1_000_000_000);
    let ts = TimeSpec::new(sec, ns);
    if let Err(e) = utimensat(None, path, &ts, &ts, UtimensatFlags::NoFollowSymlink) {
        warn!(path = %path.display(), error = %e, "mtime not applied");
    }

    Ok(())
}
