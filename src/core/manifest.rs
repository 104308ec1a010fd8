//! Remote file manifest
//!
//! The agent answers a manifest request with a single JSON object:
//!
//! ```text
//! {"version": "0.4.0", "entries": [["f", true, true, "/data/a.bin"], ["d", true, false, "/data/sub"]]}
//! ```
//!
//! The closing brace doubles as the end-of-reply marker on the control
//! session, so nothing else is printed after it.

use crate::error::Result;
use globset::GlobBuilder;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Kind of a resolved path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    /// Regular file (or anything that is not a directory)
    #[serde(rename = "f")]
    File,
    /// Directory
    #[serde(rename = "d")]
    Dir,
}

/// One path resolved by the remote agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "EntryTuple", into = "EntryTuple")]
pub struct ManifestEntry {
    /// File or directory
    pub kind: EntryKind,
    /// Readable by the remote user
    pub readable: bool,
    /// Writable by the remote user
    pub writable: bool,
    /// Path as resolved on the remote host
    pub path: String,
}

type EntryTuple = (EntryKind, bool, bool, String);

impl From<EntryTuple> for ManifestEntry {
    fn from((kind, readable, writable, path): EntryTuple) -> Self {
        Self {
            kind,
            readable,
            writable,
            path,
        }
    }
}

impl From<ManifestEntry> for EntryTuple {
    fn from(entry: ManifestEntry) -> Self {
        (entry.kind, entry.readable, entry.writable, entry.path)
    }
}

impl ManifestEntry {
    /// Describe a local path the way the agent reports it
    pub fn from_path(path: &Path) -> Self {
        let kind = match std::fs::metadata(path) {
            Ok(meta) if meta.is_dir() => EntryKind::Dir,
            _ => EntryKind::File,
        };

        let (readable, writable) = access(path);

        Self {
            kind,
            readable,
            writable,
            path: path.to_string_lossy().into_owned(),
        }
    }

    /// Final path component, used to name the local copy
    pub fn file_name(&self) -> Option<&str> {
        self.path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
    }
}

fn access(path: &Path) -> (bool, bool) {
    use nix::unistd::AccessFlags;

    (
        nix::unistd::access(path, AccessFlags::R_OK).is_ok(),
        nix::unistd::access(path, AccessFlags::W_OK).is_ok(),
    )
}

/// The agent's reply to a manifest request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Version of the agent that produced the manifest
    pub version: String,
    /// Resolved paths in pattern order
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Resolve `patterns` against the local filesystem
    pub fn evaluate<S: AsRef<str>>(patterns: &[S]) -> Self {
        let entries = patterns
            .iter()
            .flat_map(|pattern| expand_pattern(pattern.as_ref()))
            .map(|path| ManifestEntry::from_path(&path))
            .collect();

        Self {
            version: crate::VERSION.to_string(),
            entries,
        }
    }

    /// Parse a manifest from JSON
    ///
    /// The raw serde error is kept so callers can tell a truncated reply
    /// (`is_eof`) from one that is not a manifest at all.
    pub fn parse(json: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(json)
    }

    /// Serialize to the single-line wire form
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

fn has_magic(s: &str) -> bool {
    s.contains(['*', '?', '['])
}

/// Expand one shell-style glob into existing paths
///
/// Wildcards only match within a single path component and never match a
/// leading dot unless the pattern component itself starts with one. A
/// pattern without wildcards resolves to itself when it exists. Matches are
/// sorted per directory so the result is deterministic.
pub fn expand_pattern(pattern: &str) -> Vec<PathBuf> {
    if pattern.is_empty() {
        return Vec::new();
    }

    if !has_magic(pattern) {
        let path = PathBuf::from(pattern);
        return if path.symlink_metadata().is_ok() {
            vec![path]
        } else {
            Vec::new()
        };
    }

    let mut candidates = vec![if pattern.starts_with('/') {
        PathBuf::from("/")
    } else {
        PathBuf::new()
    }];

    let components: Vec<&str> = pattern.split('/').filter(|c| !c.is_empty()).collect();
    let last = components.len().saturating_sub(1);

    for (depth, component) in components.iter().enumerate() {
        let matcher = if has_magic(component) {
            GlobBuilder::new(component)
                .literal_separator(true)
                .backslash_escape(true)
                .build()
                .ok()
                .map(|glob| glob.compile_matcher())
        } else {
            None
        };

        let mut next = Vec::new();

        for base in &candidates {
            match &matcher {
                Some(matcher) => {
                    let dir = if base.as_os_str().is_empty() {
                        Path::new(".")
                    } else {
                        base.as_path()
                    };
                    let Ok(read_dir) = std::fs::read_dir(dir) else {
                        continue;
                    };

                    let mut names: Vec<String> = read_dir
                        .filter_map(|entry| entry.ok())
                        .map(|entry| entry.file_name().to_string_lossy().into_owned())
                        .filter(|name| component.starts_with('.') || !name.starts_with('.'))
                        .filter(|name| matcher.is_match(name))
                        .collect();
                    names.sort();

                    next.extend(names.into_iter().map(|name| base.join(name)));
                }
                None => {
                    let path = base.join(component);
                    let exists = if depth == last {
                        path.symlink_metadata().is_ok()
                    } else {
                        path.is_dir()
                    };
                    if exists {
                        next.push(path);
                    }
                }
            }
        }

        candidates = next;
        if candidates.is_empty() {
            break;
        }
    }

    candidates
}
