//! MIME type table
//!
//! Uploads carry a `Content-Type` chosen by file kind: directories and
//! symlinks get dedicated inode types, everything else is looked up by
//! final extension in the system MIME table with a generic fallback.

use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;

/// Fallback for unknown extensions
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";
/// Content type marking a directory object
pub const DIRECTORY_MIME_TYPE: &str = "inode/directory";
/// Content type marking a symlink object (body is the link target)
pub const SYMLINK_MIME_TYPE: &str = "inode/symlink";
/// Directory marker used by some other S3 tools; accepted on parse
pub const ALT_DIRECTORY_MIME_TYPE: &str = "application/x-directory";

/// Extension → MIME type table, loaded from `/etc/mime.types`
#[derive(Debug, Clone, Default)]
pub struct MimeTable {
    types: HashMap<String, String>,
}

impl MimeTable {
    /// Loads the system table; a missing or unreadable file yields an
    /// empty table (every lookup falls back to the default type)
    pub fn load_system() -> Self {
        Self::load_file(Path::new("/etc/mime.types"))
    }

    /// Loads a table from a mime.types-format file
    pub fn load_file(path: &Path) -> Self {
        match std::fs::File::open(path) {
            Ok(file) => Self::from_reader(std::io::BufReader::new(file)),
            Err(_) => Self::default(),
        }
    }

    /// Parses mime.types lines: `type ext [ext ...]`, `#` comments skipped
    pub fn from_reader(reader: impl BufRead) -> Self {
        let mut types = HashMap::new();
        for line in reader.lines() {
            let Ok(line) = line else { break };
            let line = line.trim();
            if line.len() < 3 || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            let Some(kind) = fields.next() else { continue };
            for ext in fields {
                types.insert(ext.to_string(), kind.to_string());
            }
        }
        Self { types }
    }

    /// Looks up the content type for a key by its final extension
    pub fn content_type_for(&self, key: &str) -> &str {
        let name = key.rsplit('/').next().unwrap_or(key);
        match name.rsplit_once('.') {
            Some((_, ext)) if !ext.is_empty() => self
                .types
                .get(ext)
                .map(String::as_str)
                .unwrap_or(DEFAULT_MIME_TYPE),
            _ => DEFAULT_MIME_TYPE,
        }
    }

    /// Number of known extensions
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// True when no extensions are known
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
