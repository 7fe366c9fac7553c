//! Command-line argument parsing
//!
//! Two positional endpoints, exactly one of which carries the `s3:`
//! prefix; their order decides the sync direction:
//!
//! ```text
//! propolis [flags] <localdir> s3:<bucket>[:<remote/dir>]   # push
//! propolis [flags] s3:<bucket>[:<remote/dir>] <localdir>   # pull
//! ```

use std::path::PathBuf;

use clap::{ArgAction, Parser};

use propolis_core::config::{Settings, SyncDirection};
use propolis_core::domain::{BucketName, SyncError};

/// Mirror a local directory tree against an S3-compatible bucket
#[derive(Debug, Parser)]
#[command(
    name = "propolis",
    version,
    about = "Synchronizes a local directory with an S3 bucket, then optionally \
             watches for changes and keeps propagating them"
)]
pub struct Cli {
    /// First endpoint: a local directory or s3:<bucket>[:<remote/dir>]
    pub endpoint_a: String,

    /// Second endpoint: the other side of the sync
    pub endpoint_b: String,

    /// Scan the bucket at startup and audit the cache against it
    #[arg(long, default_value_t = true, action = ArgAction::Set, num_args = 0..=1, default_missing_value = "true")]
    pub refresh: bool,

    /// Keep watching the local file system after the initial sync
    #[arg(long, action = ArgAction::SetTrue)]
    pub watch: bool,

    /// Delete files as well as updating changed files
    #[arg(long, default_value_t = true, action = ArgAction::Set, num_args = 0..=1, default_missing_value = "true")]
    pub delete: bool,

    /// Always compare content hashes, even when other metadata matches
    #[arg(long, action = ArgAction::SetTrue)]
    pub paranoid: bool,

    /// Truncate the cache before starting (implies --refresh)
    #[arg(long, action = ArgAction::SetTrue)]
    pub reset: bool,

    /// Do a practice run without changing any files (implies --watch=false)
    #[arg(long, action = ArgAction::SetTrue)]
    pub practice: bool,

    /// Make world-readable local files publicly readable in the bucket
    #[arg(long, default_value_t = true, action = ArgAction::Set, num_args = 0..=1, default_missing_value = "true")]
    pub public: bool,

    /// Use secure connections to the bucket
    #[arg(long, action = ArgAction::SetTrue)]
    pub secure: bool,

    /// Store uploads with reduced redundancy
    #[arg(long, action = ArgAction::SetTrue)]
    pub reduced: bool,

    /// Track directories as zero-length objects
    #[arg(long, action = ArgAction::SetTrue)]
    pub directories: bool,

    /// Seconds a path must stay quiet before it is reconciled
    #[arg(long, default_value_t = 5)]
    pub delay: u64,

    /// Maximum concurrent reconciliations
    #[arg(long, default_value_t = 25)]
    pub concurrent: usize,

    /// Access key id (overrides the environment and the password file)
    #[arg(long)]
    pub accesskeyid: Option<String>,

    /// Secret access key (overrides the environment and the password file)
    #[arg(long)]
    pub secretaccesskey: Option<String>,

    /// Directory holding one cache database per bucket
    #[arg(long, default_value = "/var/cache/propolis")]
    pub cache: PathBuf,

    /// Verbose output (repeat for more: -v, -vv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Validates the endpoints and builds the run settings
    pub fn into_settings(self) -> Result<(Settings, Option<String>, Option<String>), SyncError> {
        let a_is_bucket = self.endpoint_a.starts_with("s3:");
        let b_is_bucket = self.endpoint_b.starts_with("s3:");

        let (direction, local_arg, bucket_arg) = match (a_is_bucket, b_is_bucket) {
            (false, true) => (SyncDirection::Push, &self.endpoint_a, &self.endpoint_b),
            (true, false) => (SyncDirection::Pull, &self.endpoint_b, &self.endpoint_a),
            _ => {
                return Err(SyncError::Config(
                    "exactly one endpoint must start with s3:".into(),
                ))
            }
        };

        let (bucket, bucket_root) = parse_bucket_spec(bucket_arg)?;
        let local_root = parse_local_dir(local_arg)?;

        let mut settings = Settings {
            direction,
            local_root,
            bucket,
            bucket_root,
            refresh: self.refresh,
            watch: self.watch,
            delete: self.delete,
            paranoid: self.paranoid,
            reset: self.reset,
            practice: self.practice,
            public: self.public,
            secure: self.secure,
            reduced_redundancy: self.reduced,
            track_directories: self.directories,
            trust_cache_complete: false,
            trust_cache_accurate: false,
            delay_secs: self.delay,
            max_in_flight: self.concurrent.max(1),
            cache_dir: self.cache,
        };
        settings.apply_implications();

        Ok((settings, self.accesskeyid, self.secretaccesskey))
    }
}

/// Splits `s3:<bucket>[:<remote/dir>]` and validates the bucket name
fn parse_bucket_spec(arg: &str) -> Result<(BucketName, String), SyncError> {
    let spec = arg
        .strip_prefix("s3:")
        .ok_or_else(|| SyncError::Config(format!("not a bucket endpoint: {arg:?}")))?;

    let (name, prefix) = match spec.split_once(':') {
        Some((name, prefix)) => (name.trim(), prefix.trim()),
        None => (spec.trim(), ""),
    };

    let bucket = BucketName::new(name)?;
    let prefix = prefix.trim_matches('/').to_string();
    Ok((bucket, prefix))
}

/// Resolves a local directory to an absolute, symlink-free path
fn parse_local_dir(arg: &str) -> Result<PathBuf, SyncError> {
    let path = std::fs::canonicalize(arg)
        .map_err(|e| SyncError::Config(format!("invalid local directory {arg:?}: {e}")))?;
    if !path.is_dir() {
        return Err(SyncError::Config(format!(
            "{arg:?} is not a directory"
        )));
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("propolis").chain(args.iter().copied()))
    }

    #[test]
    fn direction_follows_argument_order() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().to_str().unwrap().to_string();

        let (settings, _, _) = cli(&[&local, "s3:my-bucket"]).into_settings().unwrap();
        assert_eq!(settings.direction, SyncDirection::Push);

        let (settings, _, _) = cli(&["s3:my-bucket", &local]).into_settings().unwrap();
        assert_eq!(settings.direction, SyncDirection::Pull);
    }

    #[test]
    fn two_buckets_or_two_directories_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().to_str().unwrap().to_string();

        assert!(cli(&["s3:one", "s3:two"]).into_settings().is_err());
        assert!(cli(&[&local, &local]).into_settings().is_err());
    }

    #[test]
    fn bucket_spec_carries_an_optional_prefix() {
        let (bucket, prefix) = parse_bucket_spec("s3:my-bucket").unwrap();
        assert_eq!(bucket.as_str(), "my-bucket");
        assert_eq!(prefix, "");

        let (bucket, prefix) = parse_bucket_spec("s3:my-bucket:photos/2024/").unwrap();
        assert_eq!(bucket.as_str(), "my-bucket");
        assert_eq!(prefix, "photos/2024");
    }

    #[test]
    fn ip_shaped_bucket_names_fail_before_any_network_use() {
        assert!(parse_bucket_spec("s3:192.168.1.1").is_err());
    }

    #[test]
    fn defaults_match_the_documented_flag_set() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().to_str().unwrap().to_string();

        let (settings, key, secret) = cli(&[&local, "s3:my-bucket"]).into_settings().unwrap();
        assert!(settings.refresh);
        assert!(!settings.watch);
        assert!(settings.delete);
        assert!(!settings.paranoid);
        assert!(!settings.practice);
        assert!(settings.public);
        assert!(!settings.secure);
        assert_eq!(settings.delay_secs, 5);
        assert_eq!(settings.max_in_flight, 25);
        assert_eq!(settings.cache_dir, PathBuf::from("/var/cache/propolis"));
        assert!(key.is_none() && secret.is_none());
    }

    #[test]
    fn reset_implies_refresh_and_practice_disables_watch() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().to_str().unwrap().to_string();

        let (settings, _, _) = cli(&[
            "--reset",
            "--refresh=false",
            "--practice",
            "--watch",
            &local,
            "s3:my-bucket",
        ])
        .into_settings()
        .unwrap();
        assert!(settings.refresh, "--reset implies --refresh");
        assert!(!settings.watch, "--practice implies --watch=false");
        assert!(settings.trust_cache_complete);
    }

    #[test]
    fn negatable_flags_accept_explicit_values() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().to_str().unwrap().to_string();

        let (settings, _, _) = cli(&["--delete=false", "--public=false", &local, "s3:my-bucket"])
            .into_settings()
            .unwrap();
        assert!(!settings.delete);
        assert!(!settings.public);
    }

    #[test]
    fn missing_local_directory_is_a_config_error() {
        let err = cli(&["/no/such/dir/anywhere", "s3:my-bucket"])
            .into_settings()
            .unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }
}
