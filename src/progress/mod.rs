//! Progress reporting module
//!
//! Shows a live spinner while files download and keeps the counters the
//! final summary is printed from.

mod reporter;

pub use reporter::*;
