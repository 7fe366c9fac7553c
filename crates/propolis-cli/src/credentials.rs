//! Credential resolution
//!
//! Access keys come from, in decreasing precedence:
//!
//! 1. The command line (`--accesskeyid` / `--secretaccesskey`)
//! 2. The environment (`AWSACCESSKEYID` / `AWSSECRETACCESSKEY`)
//! 3. The first non-comment line of `/etc/passwd-amazon-s3`, formatted
//!    `key:secret`
//!
//! Both values must come from a single source.

use std::io::BufRead;
use std::path::Path;

use propolis_core::domain::SyncError;

const PASSWORD_FILE: &str = "/etc/passwd-amazon-s3";
const ACCESS_KEY_VAR: &str = "AWSACCESSKEYID";
const SECRET_KEY_VAR: &str = "AWSSECRETACCESSKEY";

/// Resolves the access key pair, CLI values taking precedence
pub fn resolve(
    cli_key: Option<String>,
    cli_secret: Option<String>,
) -> Result<(String, String), SyncError> {
    if let (Some(key), Some(secret)) = (cli_key, cli_secret) {
        return Ok((key, secret));
    }

    if let (Ok(key), Ok(secret)) = (std::env::var(ACCESS_KEY_VAR), std::env::var(SECRET_KEY_VAR)) {
        if !key.is_empty() && !secret.is_empty() {
            return Ok((key, secret));
        }
    }

    if let Ok(file) = std::fs::File::open(Path::new(PASSWORD_FILE)) {
        if let Some(pair) = parse_password_file(std::io::BufReader::new(file)) {
            return Ok(pair);
        }
    }

    Err(SyncError::Config(format!(
        "access key id and secret access key undefined; pass --accesskeyid/--secretaccesskey, \
         set {ACCESS_KEY_VAR}/{SECRET_KEY_VAR}, or create {PASSWORD_FILE}"
    )))
}

/// Reads the first non-comment `key:secret` line
fn parse_password_file(reader: impl BufRead) -> Option<(String, String)> {
    for line in reader.lines() {
        let line = line.ok()?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, secret)) = line.split_once(':') else {
            continue;
        };
        return Some((key.to_string(), secret.to_string()));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn cli_values_win() {
        let (key, secret) =
            resolve(Some("cli-key".into()), Some("cli-secret".into())).unwrap();
        assert_eq!(key, "cli-key");
        assert_eq!(secret, "cli-secret");
    }

    #[test]
    fn password_file_skips_comments_and_blanks() {
        let file = "# amazon s3 credentials\n\n# another comment\nfile-key:file:secret\n";
        let (key, secret) = parse_password_file(Cursor::new(file)).unwrap();
        assert_eq!(key, "file-key");
        // only the first colon splits; secrets may contain colons
        assert_eq!(secret, "file:secret");
    }

    #[test]
    fn password_file_without_a_valid_line_yields_none() {
        assert!(parse_password_file(Cursor::new("# only comments\n")).is_none());
        assert!(parse_password_file(Cursor::new("no-colon-here\n")).is_none());
    }
}
