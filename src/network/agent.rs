//! Agent mode
//!
//! The orchestrator starts this same program on the remote host through
//! the secure channel. Two requests are understood:
//!
//! ```bash
//! stripecp agent stripe <SLICES> <INDEX> <CHUNK> <PATH>   # raw stripe bytes on stdout
//! stripecp agent manifest <PATTERN>...                    # one JSON object on stdout
//! ```
//!
//! Nothing but the reply may reach stdout; diagnostics go to stderr.

use crate::core::{emit_stripe, Manifest, StripeDescriptor};
use crate::error::Result;
use std::io::Write;
use std::path::Path;

/// Write one stripe of `path` to stdout
pub fn run_stripe(path: &Path, stripe: StripeDescriptor) -> Result<u64> {
    let stdout = std::io::stdout();
    let written = emit_stripe(path, stripe, stdout.lock())?;

    tracing::debug!(
        "emitted stripe {}/{} of {}: {} bytes",
        stripe.slice_index(),
        stripe.num_slices(),
        path.display(),
        written
    );
    Ok(written)
}

/// Evaluate `patterns` and print the manifest to stdout
pub fn run_manifest<S: AsRef<str>>(patterns: &[S]) -> Result<Manifest> {
    let manifest = Manifest::evaluate(patterns);
    write_manifest(&manifest, std::io::stdout().lock())?;
    Ok(manifest)
}

/// Write the manifest reply, ending at its closing brace plus a newline
pub fn write_manifest<W: Write>(manifest: &Manifest, mut out: W) -> Result<()> {
    let json = manifest.to_json()?;
    out.write_all(json.as_bytes())?;
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(())
}
