//! `[user@]host:path` addressing
//!
//! A spec with a colon whose left side has no `/` names a remote path.
//! Anything else is local. When the user is omitted the local login name
//! is used, so a remote spec always carries both user and host.

use crate::error::{Result, StripeCopyError};
use std::fmt;

/// Characters neutralized before a path crosses the remote shell
///
/// Covers the glob characters the agent expands itself plus every other
/// character a POSIX shell treats specially in an unquoted word. A newline
/// cannot be backslash-escaped and is quoted separately.
pub const SHELL_METACHARS: &[char] = &[
    ' ', '\t', '#', ';', '&', '"', '\'', ',', '?', '$', '*', '[', ']', '(', ')', '|', '<', '>', '`', '\\',
    '~', '{', '}', '!', '^', '=', '%',
];

/// A parsed local or remote path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSpec {
    /// Remote user; present exactly when `host` is
    pub user: Option<String>,
    /// Remote host; absent for local paths
    pub host: Option<String>,
    /// Path on the named host
    pub path: String,
}

impl PathSpec {
    /// Parse a spec, filling an omitted user with the local login name
    pub fn parse(spec: &str) -> Result<Self> {
        // The login name is only looked up when the spec leaves it out
        let default_user = match split_remote(spec) {
            Some((None, _, _)) => local_user()?,
            _ => String::new(),
        };
        Ok(Self::parse_with_user(spec, &default_user))
    }

    /// Parse a spec with an explicit fallback user
    pub fn parse_with_user(spec: &str, default_user: &str) -> Self {
        match split_remote(spec) {
            Some((user, host, path)) => Self::remote(user.unwrap_or(default_user), host, path),
            None => Self::local(spec),
        }
    }

    /// Build a remote spec
    pub fn remote(user: &str, host: &str, path: &str) -> Self {
        Self {
            user: Some(user.to_string()),
            host: Some(host.to_string()),
            path: path.to_string(),
        }
    }

    /// Build a local spec
    pub fn local(path: &str) -> Self {
        Self {
            user: None,
            host: None,
            path: path.to_string(),
        }
    }

    /// True when the path lives on another host
    pub fn is_remote(&self) -> bool {
        self.host.is_some()
    }

    /// `(user, host)` of a remote spec
    pub fn endpoint(&self) -> Option<(&str, &str)> {
        match (&self.user, &self.host) {
            (Some(user), Some(host)) => Some((user.as_str(), host.as_str())),
            _ => None,
        }
    }
}

impl fmt::Display for PathSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.endpoint() {
            Some((user, host)) => write!(f, "{}@{}:{}", user, host, self.path),
            None => f.write_str(&self.path),
        }
    }
}

fn split_remote(spec: &str) -> Option<(Option<&str>, &str, &str)> {
    let (left, path) = spec.split_once(':')?;
    if left.is_empty() || path.is_empty() || left.contains('/') {
        return None;
    }

    match left.split_once('@') {
        Some((user, host)) if !user.is_empty() && !host.is_empty() => Some((Some(user), host, path)),
        Some(_) => None,
        None => Some((None, left, path)),
    }
}

/// Login name of the operator running this process
pub fn local_user() -> Result<String> {
    if let Ok(Some(user)) = nix::unistd::User::from_uid(nix::unistd::getuid()) {
        return Ok(user.name);
    }

    std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .map_err(|_| StripeCopyError::InvalidArgument("cannot determine local user name".to_string()))
}

/// Escape a path or glob for the remote shell
///
/// Each metacharacter is preceded by one backslash. The remote shell strips
/// it again, so the agent sees the pattern exactly as typed and performs
/// the wildcard expansion itself. Newlines travel inside single quotes.
pub fn quote_path(path: &str) -> String {
    let mut quoted = String::with_capacity(path.len() + 8);

    for c in path.chars() {
        if c == '\n' {
            quoted.push_str("'\n'");
            continue;
        }
        if SHELL_METACHARS.contains(&c) {
            quoted.push('\\');
        }
        quoted.push(c);
    }

    quoted
}
