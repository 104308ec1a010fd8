//! # StripeCopy - Striped Parallel Downloads over SSH
//!
//! StripeCopy pulls a file from a remote host through several SSH sessions
//! at once. The file is cut into fixed-size chunks and dealt round-robin
//! into stripes; each stripe travels over its own session and the stripes
//! are woven back together locally in the original order.
//!
//! ## Features
//!
//! - **Striped Transfers**: N concurrent SSH streams per file
//! - **Single Login**: the password is asked for once and reused by every stripe
//! - **Remote Globs**: `host:'logs/*.gz'` is expanded on the remote host
//! - **Bounded Memory**: at most 10 chunks queued per stripe
//! - **Clean Teardown**: remote processes and scratch fifos are removed on every exit path
//!
//! ## Quick Start
//!
//! ```no_run
//! use stripecp::config::TransferConfig;
//! use stripecp::core::DownloadEngine;
//! use stripecp::progress::ProgressReporter;
//! use std::path::PathBuf;
//!
//! let config = TransferConfig {
//!     sources: vec!["/data/large_file.bin".to_string()],
//!     user: "alice".to_string(),
//!     host: "storage01".to_string(),
//!     destination: Some(PathBuf::from("/scratch/large_file.bin")),
//!     slices: 8,
//!     chunk_bytes: 64 * 1024,
//!     ..Default::default()
//! };
//!
//! let engine = DownloadEngine::new(config).with_progress(ProgressReporter::new());
//! let summary = engine.execute().unwrap();
//! summary.print_summary();
//! ```
//!
//! ## Stripe Codec
//!
//! ```
//! use stripecp::core::{reassemble, StripeDescriptor};
//! use std::io::Cursor;
//!
//! let data: Vec<u8> = (0..=255u8).collect();
//! let mut stripes: Vec<_> = StripeDescriptor::all(2, 1)
//!     .unwrap()
//!     .into_iter()
//!     .map(|stripe| stripe.iter(Cursor::new(data.clone())))
//!     .collect();
//!
//! let mut out = Vec::new();
//! reassemble(&mut stripes, &mut out, |_| {}).unwrap();
//! assert_eq!(out, data);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

#[cfg(not(unix))]
compile_error!("stripecp needs fifos and pseudo-terminals and only builds on Unix");

pub mod config;
pub mod core;
pub mod error;
pub mod network;
pub mod progress;

// Re-export commonly used types
pub use config::{CliArgs, TransferConfig, VersionRange};
pub use core::{DownloadEngine, StripeDescriptor, TransferSummary};
pub use error::{Result, StripeCopyError};
pub use progress::ProgressReporter;

/// Library version, reported by the agent in every manifest
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    //! Convenient re-exports for common usage
    //!
    //! ```no_run
    //! use stripecp::prelude::*;
    //! ```

    pub use crate::config::{TransferConfig, VersionRange};
    pub use crate::core::{
        reassemble, DownloadEngine, Manifest, ManifestEntry, StripeDescriptor, StripeSource, TransferOrchestrator,
        TransferSummary, VersionGate,
    };
    pub use crate::error::{Result, StripeCopyError};
    pub use crate::network::{LocalShell, PathSpec, RemoteChannel, RemoteShell, Session, SshShell};
    pub use crate::progress::ProgressReporter;
}
