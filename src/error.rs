//! Error types for StripeCopy
//!
//! Every failure in a striped transfer is propagate-and-abort. The variants
//! are grouped by when they can occur: argument validation, credential
//! negotiation, version gating, and the data transfer itself.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for StripeCopy operations
#[derive(Error, Debug)]
pub enum StripeCopyError {
    /// I/O error during local file operations
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed command line or transfer request
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Stripe descriptor outside its valid range
    #[error("Invalid interleave argument: {0}")]
    InvalidStripe(String),

    /// Only remote-to-local copies are supported
    #[error("Currently only supports download copying")]
    UploadUnsupported,

    /// Sources name more than one remote endpoint
    #[error("All sources must be on the same host ('{expected}' vs '{found}')")]
    MixedHosts { expected: String, found: String },

    /// The remote glob evaluation resolved to nothing copyable
    #[error("No files matched: {0}")]
    NoFilesMatched(String),

    /// A resolved remote file is not readable by the remote user
    #[error("Remote file is not readable: {0}")]
    NotReadable(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Could not reach or talk to the remote host
    #[error("Connection error to '{host}': {message}")]
    ConnectionError { host: String, message: String },

    /// The remote rejected our credentials
    #[error("SSH authentication failed for '{user}@{host}': {message}")]
    AuthenticationError {
        user: String,
        host: String,
        message: String,
    },

    /// The secure channel asked to confirm an unknown host key
    #[error("Host key for '{host}' is not trusted; connect once with ssh to verify it")]
    HostKeyUnverified { host: String },

    /// Negotiation saw no progress within the timeout
    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    /// Remote agent is older than this build supports
    #[error("Remote stripecp version {remote} is too old (minimum {minimum})")]
    RemoteTooOld { remote: String, minimum: String },

    /// Remote agent is newer than this build supports
    #[error("Remote stripecp version {remote} is too new (maximum {maximum})")]
    RemoteTooNew { remote: String, maximum: String },

    /// Manifest parsing error
    #[error("Manifest error: {0}")]
    ManifestError(String),

    /// Remote transfer error
    #[error("Remote transfer error: {0}")]
    RemoteTransferError(String),

    /// A single stripe channel failed
    #[error("Stripe {index} failed: {message}")]
    StripeFailed { index: usize, message: String },

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<StripeCopyError>,
    },
}

impl StripeCopyError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a connection error
    pub fn connection(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConnectionError {
            host: host.into(),
            message: message.into(),
        }
    }

    /// Create an authentication error
    pub fn auth(
        user: impl Into<String>,
        host: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::AuthenticationError {
            user: user.into(),
            host: host.into(),
            message: message.into(),
        }
    }

    /// Create a stripe failure
    pub fn stripe(index: usize, message: impl Into<String>) -> Self {
        Self::StripeFailed {
            index,
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// True for failures raised while establishing the control session
    pub fn is_credential_error(&self) -> bool {
        match self {
            Self::ConnectionError { .. }
            | Self::AuthenticationError { .. }
            | Self::HostKeyUnverified { .. }
            | Self::Timeout(_) => true,
            Self::WithContext { source, .. } => source.is_credential_error(),
            _ => false,
        }
    }

    /// True for remote version incompatibility
    pub fn is_version_error(&self) -> bool {
        match self {
            Self::RemoteTooOld { .. } | Self::RemoteTooNew { .. } => true,
            Self::WithContext { source, .. } => source.is_version_error(),
            _ => false,
        }
    }

    /// True for errors raised before any channel is opened
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument(_)
                | Self::InvalidStripe(_)
                | Self::UploadUnsupported
                | Self::MixedHosts { .. }
                | Self::NoFilesMatched(_)
                | Self::NotReadable(_)
                | Self::ConfigError(_)
        )
    }

    /// Get the path associated with this error, if any
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::Io { path, .. } => Some(path),
            _ => None,
        }
    }
}

/// Result type alias for StripeCopy operations
pub type Result<T> = std::result::Result<T, StripeCopyError>;

impl From<std::io::Error> for StripeCopyError {
    fn from(err: std::io::Error) -> Self {
        StripeCopyError::Io {
            path: PathBuf::new(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for StripeCopyError {
    fn from(err: serde_json::Error) -> Self {
        StripeCopyError::ManifestError(err.to_string())
    }
}

impl From<nix::Error> for StripeCopyError {
    fn from(err: nix::Error) -> Self {
        StripeCopyError::Io {
            path: PathBuf::new(),
            source: std::io::Error::from(err),
        }
    }
}

/// Extension trait for adding path context to std::io::Result
pub trait IoResultExt<T> {
    /// Add path context to an I/O error
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| StripeCopyError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_with_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = StripeCopyError::io("/test/path", io_err);
        assert_eq!(err.path().unwrap(), &PathBuf::from("/test/path"));
    }

    #[test]
    fn test_error_classes() {
        assert!(StripeCopyError::Timeout(30).is_credential_error());
        assert!(StripeCopyError::HostKeyUnverified { host: "h".into() }.is_credential_error());
        assert!(!StripeCopyError::UploadUnsupported.is_credential_error());

        let too_new = StripeCopyError::RemoteTooNew {
            remote: "2.0".into(),
            maximum: "1.0".into(),
        };
        assert!(too_new.is_version_error());
        assert!(too_new.with_context("checking remote").is_version_error());

        assert!(StripeCopyError::NoFilesMatched("x".into()).is_validation_error());
        assert!(!StripeCopyError::stripe(3, "closed").is_validation_error());
    }

    #[test]
    fn test_wrapped_credential_error() {
        let err = StripeCopyError::auth("user", "host", "rejected").with_context("negotiating");
        assert!(err.is_credential_error());
        assert!(err.to_string().starts_with("negotiating"));
    }
}
