//! Metadata-preserving header protocol
//!
//! Filesystem metadata travels with each object as amz headers, written on
//! upload/copy and parsed back on HEAD/GET:
//!
//! - `x-amz-acl`: `public-read` iff the local mode has the world-read bit
//!   (and the public switch is on), else `private`
//! - `x-amz-meta-uid`: `"<n>"` or `"<n> (<name>)"` when the name resolves
//! - `x-amz-meta-gid`: `"<n>"`
//! - `x-amz-meta-mode`: `"0<octal>"`, full st_mode including type bits
//! - `x-amz-meta-mtime`: `"<sec>(.<nanos>)? (<localized date>)"`; the
//!   parser accepts `%d.%d` or `%d` and ignores the trailing date
//! - `Content-Type`: by kind, with a MIME-table lookup for regular files
//!
//! When a response carries no usable mode, the file type is synthesized
//! from the Content-Type; when it carries no mtime, `Last-Modified` is
//! used, then the current wall time.

use chrono::{DateTime, Local, Utc};
use nix::unistd::{Uid, User};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};

use propolis_core::domain::record::{
    FileKind, FileMeta, S_IFDIR, S_IFLNK, S_IFMT, S_IFREG,
};

use crate::mime::{
    MimeTable, ALT_DIRECTORY_MIME_TYPE, DIRECTORY_MIME_TYPE, SYMLINK_MIME_TYPE,
};

pub const ACL_HEADER: &str = "x-amz-acl";
pub const UID_HEADER: &str = "x-amz-meta-uid";
pub const GID_HEADER: &str = "x-amz-meta-gid";
pub const MODE_HEADER: &str = "x-amz-meta-mode";
pub const MTIME_HEADER: &str = "x-amz-meta-mtime";

pub const ACL_PUBLIC: &str = "public-read";
pub const ACL_PRIVATE: &str = "private";

/// Writes the metadata headers for an upload or copy
pub fn apply_metadata_headers(
    headers: &mut HeaderMap,
    meta: &FileMeta,
    server_key: &str,
    public: bool,
    mime: &MimeTable,
) {
    let acl = if public && meta.world_readable() {
        ACL_PUBLIC
    } else {
        ACL_PRIVATE
    };
    headers.insert(ACL_HEADER, HeaderValue::from_static(acl));

    // uid with the symbolic name when it resolves locally
    let uid_value = match User::from_uid(Uid::from_raw(meta.uid)) {
        Ok(Some(user)) => format!("{} ({})", meta.uid, user.name),
        _ => format!("{}", meta.uid),
    };
    if let Ok(v) = HeaderValue::from_str(&uid_value) {
        headers.insert(UID_HEADER, v);
    } else if let Ok(v) = HeaderValue::from_str(&meta.uid.to_string()) {
        headers.insert(UID_HEADER, v);
    }

    if let Ok(v) = HeaderValue::from_str(&meta.gid.to_string()) {
        headers.insert(GID_HEADER, v);
    }

    if let Ok(v) = HeaderValue::from_str(&format!("0{:o}", meta.mode)) {
        headers.insert(MODE_HEADER, v);
    }

    if let Ok(v) = HeaderValue::from_str(&format_mtime(meta.mtime_ns)) {
        headers.insert(MTIME_HEADER, v);
    }

    let content_type = match meta.kind() {
        FileKind::Directory => DIRECTORY_MIME_TYPE,
        FileKind::Symlink => SYMLINK_MIME_TYPE,
        _ => mime.content_type_for(server_key),
    };
    if let Ok(v) = HeaderValue::from_str(content_type) {
        headers.insert(CONTENT_TYPE, v);
    }
}

/// Rebuilds a metadata view from response headers
pub fn parse_metadata_headers(headers: &HeaderMap) -> FileMeta {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    let uid = header(UID_HEADER).map(parse_uid_value).unwrap_or(0);
    let gid = header(GID_HEADER)
        .and_then(|s| s.trim().parse::<u32>().ok())
        .unwrap_or(0);

    let mut mode = header(MODE_HEADER).map(parse_mode_value).unwrap_or(0);
    if mode & S_IFMT == 0 {
        let content_type = header("content-type").unwrap_or("");
        mode = match content_type {
            DIRECTORY_MIME_TYPE | ALT_DIRECTORY_MIME_TYPE => 0o755 | S_IFDIR,
            SYMLINK_MIME_TYPE => 0o777 | S_IFLNK,
            _ => 0o644 | S_IFREG,
        };
    }

    let mtime_ns = header(MTIME_HEADER)
        .and_then(parse_mtime_value)
        .or_else(|| {
            header("last-modified")
                .and_then(|s| DateTime::parse_from_rfc2822(s).ok())
                .and_then(|dt| dt.timestamp_nanos_opt())
        })
        .unwrap_or_else(|| Utc::now().timestamp_nanos_opt().unwrap_or(0));

    let size = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);

    FileMeta {
        mode,
        uid,
        gid,
        size,
        mtime_ns,
    }
}

/// Formats an mtime as `"<sec>(.<nanos>)? (<localized date>)"`
fn format_mtime(mtime_ns: i64) -> String {
    let sec = mtime_ns.div_euclid(1_000_000_000);
    let ns = mtime_ns.rem_euclid(1_000_000_000);
    let date = DateTime::<Utc>::from_timestamp(sec, ns as u32)
        .map(|dt| dt.with_timezone(&Local).to_string())
        .unwrap_or_default();
    if ns == 0 {
        format!("{sec} ({date})")
    } else {
        format!("{sec}.{ns:09} ({date})")
    }
}

/// Parses `"<sec>.<nanos> ..."` or `"<sec> ..."` into nanoseconds
fn parse_mtime_value(value: &str) -> Option<i64> {
    let token = value.split_whitespace().next()?;
    match token.split_once('.') {
        Some((sec, ns)) => {
            let sec: i64 = sec.parse().ok()?;
            let ns: i64 = ns.parse().ok()?;
            Some(sec * 1_000_000_000 + ns)
        }
        None => {
            let sec: i64 = token.parse().ok()?;
            Some(sec * 1_000_000_000)
        }
    }
}

/// Parses `"<n>"` or `"<n> (<name>)"`, preferring a locally resolvable name
fn parse_uid_value(value: &str) -> u32 {
    let mut parts = value.trim().splitn(2, ' ');
    let numeric: u32 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);

    if let Some(rest) = parts.next() {
        let name = rest.trim().trim_start_matches('(').trim_end_matches(')');
        if !name.is_empty() {
            if let Ok(Some(user)) = User::from_name(name) {
                return user.uid.as_raw();
            }
        }
    }
    numeric
}

/// Parses `"0<octal>"` (falling back to decimal) into a mode
fn parse_mode_value(value: &str) -> u32 {
    let value = value.trim();
    if let Some(octal) = value.strip_prefix('0') {
        if !octal.is_empty() {
            if let Ok(mode) = u32::from_str_radix(octal, 8) {
                return mode;
            }
        }
    }
    value.parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn meta(mode: u32) -> FileMeta {
        FileMeta {
            mode,
            uid: 1000,
            gid: 1000,
            size: 17,
            mtime_ns: 1_720_000_000_500_000_000,
        }
    }

    fn mime() -> MimeTable {
        MimeTable::from_reader(Cursor::new("image/jpeg\tjpg\n"))
    }

    #[test]
    fn acl_follows_world_read_bit() {
        let mut headers = HeaderMap::new();
        apply_metadata_headers(&mut headers, &meta(0o100644), "a.jpg", true, &mime());
        assert_eq!(headers.get(ACL_HEADER).unwrap(), ACL_PUBLIC);

        let mut headers = HeaderMap::new();
        apply_metadata_headers(&mut headers, &meta(0o100600), "a.jpg", true, &mime());
        assert_eq!(headers.get(ACL_HEADER).unwrap(), ACL_PRIVATE);
    }

    #[test]
    fn public_switch_forces_private() {
        let mut headers = HeaderMap::new();
        apply_metadata_headers(&mut headers, &meta(0o100644), "a.jpg", false, &mime());
        assert_eq!(headers.get(ACL_HEADER).unwrap(), ACL_PRIVATE);
    }

    #[test]
    fn mode_is_written_octal() {
        let mut headers = HeaderMap::new();
        apply_metadata_headers(&mut headers, &meta(0o100644), "a.jpg", true, &mime());
        assert_eq!(headers.get(MODE_HEADER).unwrap(), "0100644");
    }

    #[test]
    fn content_type_by_kind() {
        let mut headers = HeaderMap::new();
        apply_metadata_headers(&mut headers, &meta(0o040755), "photos", true, &mime());
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), DIRECTORY_MIME_TYPE);

        let mut headers = HeaderMap::new();
        apply_metadata_headers(&mut headers, &meta(0o120777), "link", true, &mime());
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), SYMLINK_MIME_TYPE);

        let mut headers = HeaderMap::new();
        apply_metadata_headers(&mut headers, &meta(0o100644), "a.jpg", true, &mime());
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "image/jpeg");
    }

    #[test]
    fn mtime_round_trips_with_nanos() {
        let value = format_mtime(1_720_000_000_500_000_000);
        assert!(value.starts_with("1720000000.500000000 ("));
        assert_eq!(parse_mtime_value(&value), Some(1_720_000_000_500_000_000));
    }

    #[test]
    fn mtime_round_trips_whole_seconds() {
        let value = format_mtime(1_720_000_000_000_000_000);
        assert!(value.starts_with("1720000000 ("));
        assert_eq!(parse_mtime_value(&value), Some(1_720_000_000_000_000_000));
    }

    #[test]
    fn mtime_parser_accepts_bare_forms() {
        assert_eq!(parse_mtime_value("1720000000"), Some(1_720_000_000_000_000_000));
        assert_eq!(
            parse_mtime_value("1720000000.25"),
            Some(1_720_000_000_000_000_025)
        );
        assert_eq!(parse_mtime_value("not-a-number"), None);
    }

    #[test]
    fn uid_parser_prefers_resolvable_names() {
        // root always resolves to uid 0 on the systems the tests run on
        assert_eq!(parse_uid_value("42 (root)"), 0);
        // unresolvable name falls back to the numeric id
        assert_eq!(parse_uid_value("1234 (no-such-user-zzz)"), 1234);
        assert_eq!(parse_uid_value("567"), 567);
        assert_eq!(parse_uid_value("garbage"), 0);
    }

    #[test]
    fn mode_parser_reads_octal_then_decimal() {
        assert_eq!(parse_mode_value("0100644"), 0o100644);
        assert_eq!(parse_mode_value("493"), 493); // decimal fallback
        assert_eq!(parse_mode_value("junk"), 0);
    }

    #[test]
    fn parse_synthesizes_mode_from_content_type() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(DIRECTORY_MIME_TYPE));
        let meta = parse_metadata_headers(&headers);
        assert_eq!(meta.kind(), FileKind::Directory);
        assert_eq!(meta.mode, 0o755 | S_IFDIR);

        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static(ALT_DIRECTORY_MIME_TYPE),
        );
        assert_eq!(parse_metadata_headers(&headers).kind(), FileKind::Directory);

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(SYMLINK_MIME_TYPE));
        assert_eq!(parse_metadata_headers(&headers).kind(), FileKind::Symlink);

        let headers = HeaderMap::new();
        assert_eq!(parse_metadata_headers(&headers).kind(), FileKind::Regular);
    }

    #[test]
    fn parse_reads_size_and_falls_back_to_last_modified() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("1234"));
        headers.insert(
            "last-modified",
            HeaderValue::from_static("Wed, 15 Jul 2026 19:36:42 GMT"),
        );
        let meta = parse_metadata_headers(&headers);
        assert_eq!(meta.size, 1234);
        let expected = DateTime::parse_from_rfc2822("Wed, 15 Jul 2026 19:36:42 GMT")
            .unwrap()
            .timestamp_nanos_opt()
            .unwrap();
        assert_eq!(meta.mtime_ns, expected);
    }

    #[test]
    fn full_round_trip_preserves_metadata() {
        let original = meta(0o100640);
        let mut headers = HeaderMap::new();
        apply_metadata_headers(&mut headers, &original, "a.jpg", true, &mime());
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("17"));

        let parsed = parse_metadata_headers(&headers);
        assert_eq!(parsed.mode, original.mode);
        assert_eq!(parsed.gid, original.gid);
        assert_eq!(parsed.size, original.size);
        assert_eq!(parsed.mtime_ns, original.mtime_ns);
    }
}
