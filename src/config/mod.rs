//! Configuration module for StripeCopy
//!
//! Provides the command line and the validated runtime settings of a
//! download.

mod settings;

pub use settings::*;
