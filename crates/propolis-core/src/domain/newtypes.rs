//! Validated newtypes
//!
//! Wrappers that make invalid values unrepresentable past the construction
//! point: a bucket name is checked against the S3 naming rules before any
//! network call happens.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::SyncError;

/// A validated S3 bucket name
///
/// Rules (from the S3 bucket restrictions):
/// - 3 to 255 characters
/// - only lowercase letters, digits, `.`, `_`, `-`
/// - first character alphanumeric
/// - must not be formatted as a dotted IPv4 address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BucketName(String);

impl BucketName {
    /// Validates and wraps a bucket name
    pub fn new(name: impl Into<String>) -> Result<Self, SyncError> {
        let name = name.into();

        if name.len() < 3 || name.len() > 255 {
            return Err(SyncError::Config(format!(
                "bucket name must be 3-255 characters: {name:?}"
            )));
        }

        if !name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'))
        {
            return Err(SyncError::Config(format!(
                "bucket name may only contain [a-z0-9._-]: {name:?}"
            )));
        }

        let first = name.chars().next().unwrap_or('.');
        if !first.is_ascii_lowercase() && !first.is_ascii_digit() {
            return Err(SyncError::Config(format!(
                "bucket name must start with a letter or digit: {name:?}"
            )));
        }

        if looks_like_ipv4(&name) {
            return Err(SyncError::Config(format!(
                "bucket name must not be an IP address: {name:?}"
            )));
        }

        Ok(Self(name))
    }

    /// The bucket name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for BucketName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BucketName {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Returns true if the name parses as `a.b.c.d` with four 0-255 integers
/// and nothing else
fn looks_like_ipv4(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() != 4 {
        return false;
    }
    parts.iter().all(|part| {
        !part.is_empty()
            && part.len() <= 3
            && part.chars().all(|c| c.is_ascii_digit())
            && part.parse::<u16>().map(|n| n <= 255).unwrap_or(false)
    })
}
