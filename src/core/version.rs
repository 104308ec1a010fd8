//! Remote agent version gate
//!
//! The supported range is half-open: `minimum <= remote < maximum`.
//! Versions are dotted numbers with up to three components; missing
//! components count as zero, so `"0.4"` equals `"0.4.0"`.

use crate::config::VersionRange;
use crate::error::{Result, StripeCopyError};
use semver::Version;

/// Accepts or rejects a remote agent by its reported version
#[derive(Debug, Clone)]
pub struct VersionGate {
    minimum: Version,
    maximum: Version,
    range: VersionRange,
}

impl VersionGate {
    /// Build a gate for the configured range
    pub fn new(range: &VersionRange) -> Result<Self> {
        let minimum = parse_dotted(&range.minimum)
            .ok_or_else(|| StripeCopyError::config(format!("invalid minimum version '{}'", range.minimum)))?;
        let maximum = parse_dotted(&range.maximum)
            .ok_or_else(|| StripeCopyError::config(format!("invalid maximum version '{}'", range.maximum)))?;

        Ok(Self {
            minimum,
            maximum,
            range: range.clone(),
        })
    }

    /// Check a remote version against the range
    pub fn check(&self, remote: &str) -> Result<()> {
        let version = parse_dotted(remote).ok_or_else(|| {
            StripeCopyError::ManifestError(format!("unparseable remote version '{}'", remote))
        })?;

        if version < self.minimum {
            tracing::debug!("remote version {} below minimum {}", remote, self.range.minimum);
            return Err(StripeCopyError::RemoteTooOld {
                remote: remote.to_string(),
                minimum: self.range.minimum.clone(),
            });
        }

        if version >= self.maximum {
            tracing::debug!("remote version {} not below maximum {}", remote, self.range.maximum);
            return Err(StripeCopyError::RemoteTooNew {
                remote: remote.to_string(),
                maximum: self.range.maximum.clone(),
            });
        }

        tracing::debug!("remote version {} accepted", remote);
        Ok(())
    }
}

/// Parse `1`, `1.2` or `1.2.3` (with optional pre-release/build suffix)
pub fn parse_dotted(text: &str) -> Option<Version> {
    let text = text.trim();
    let split = text.find(['-', '+']).unwrap_or(text.len());
    let (core, suffix) = text.split_at(split);

    let parts: Vec<&str> = core.split('.').collect();
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }
    if parts.iter().any(|p| p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit())) {
        return None;
    }

    let mut padded = parts.join(".");
    for _ in parts.len()..3 {
        padded.push_str(".0");
    }
    padded.push_str(suffix);

    Version::parse(&padded).ok()
}
