//! v2-style request signing
//!
//! The string-to-sign is assembled from the request method, the
//! `Content-MD5`, `Content-Type` and `Date` headers, the present amz
//! headers in a fixed lexicographic order, and the canonical resource
//! (`/bucket/key`, percent-encoded with slashes preserved). The signature
//! is `Base64(HMAC-SHA1(secret, string))`, attached as
//! `Authorization: AWS <key>:<sig>`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::header::HeaderMap;
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// Amz headers included in the signature, in the required order
pub const SIGNED_AMZ_HEADERS: [&str; 7] = [
    "x-amz-acl",
    "x-amz-copy-source",
    "x-amz-meta-gid",
    "x-amz-meta-mode",
    "x-amz-meta-mtime",
    "x-amz-meta-uid",
    "x-amz-metadata-directive",
];

/// Percent-encode everything except unreserved characters and `/`
///
/// The canonical resource and copy-source headers want the path components
/// encoded but the path structure intact.
const PATH_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// Percent-encodes a path, leaving `/` and unreserved characters alone
pub fn url_encode(path: &str) -> String {
    utf8_percent_encode(path, PATH_SET).to_string()
}

/// Assembles the v2 string-to-sign from the request headers
pub fn string_to_sign(headers: &HeaderMap, method: &str, canonical_resource: &str) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string()
    };

    let mut msg = String::new();
    msg.push_str(method);
    msg.push('\n');
    msg.push_str(&header("content-md5"));
    msg.push('\n');
    msg.push_str(&header("content-type"));
    msg.push('\n');
    msg.push_str(&header("date"));
    msg.push('\n');

    for name in SIGNED_AMZ_HEADERS {
        let value = header(name);
        if !value.is_empty() {
            msg.push_str(name);
            msg.push(':');
            msg.push_str(&value);
            msg.push('\n');
        }
    }

    msg.push_str(canonical_resource);
    msg
}

/// Computes `Base64(HMAC-SHA1(secret, msg))`
pub fn hmac_sha1_base64(secret: &str, msg: &str) -> String {
    let mut mac =
        HmacSha1::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(msg.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

/// Builds the full `Authorization` header value for a request
pub fn authorization(
    headers: &HeaderMap,
    method: &str,
    canonical_resource: &str,
    access_key: &str,
    secret: &str,
) -> String {
    let msg = string_to_sign(headers, method, canonical_resource);
    format!("AWS {}:{}", access_key, hmac_sha1_base64(secret, &msg))
}
