//! Progress reporter implementation
//!
//! Uses indicatif for a spinner per download showing the file counter,
//! bytes reassembled so far and throughput. Stripe sizes are unknown until
//! the last chunk arrives, so there is no bar or ETA.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Progress reporter for striped downloads
pub struct ProgressReporter {
    /// Current file spinner
    bar: ProgressBar,
    /// Total files to download
    total_files: AtomicU64,
    /// Files finished so far
    files_done: AtomicU64,
    /// Is progress enabled
    enabled: AtomicBool,
}

impl ProgressReporter {
    /// Create a new progress reporter drawing to stderr
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_draw_target(ProgressDrawTarget::stderr());
        if let Ok(style) = ProgressStyle::default_spinner()
            .template("{spinner:.cyan} [{prefix}] {msg} {bytes} ({bytes_per_sec})")
        {
            bar.set_style(style);
        }

        Self {
            bar,
            total_files: AtomicU64::new(0),
            files_done: AtomicU64::new(0),
            enabled: AtomicBool::new(true),
        }
    }

    /// Create a disabled progress reporter (for quiet mode)
    pub fn disabled() -> Self {
        let reporter = Self::new();
        reporter.enabled.store(false, Ordering::SeqCst);
        reporter.bar.set_draw_target(ProgressDrawTarget::hidden());
        reporter
    }

    /// Set total files to download
    pub fn set_total_files(&self, total: u64) {
        self.total_files.store(total, Ordering::Relaxed);
    }

    /// Start reporting on the next file
    pub fn start_file(&self, path: &str) {
        let index = self.files_done.load(Ordering::Relaxed) + 1;
        let total = self.total_files.load(Ordering::Relaxed);

        // Truncate long paths
        let display = if path.len() > 50 {
            let cut = path
                .char_indices()
                .map(|(i, _)| i)
                .find(|&i| path.len() - i <= 47)
                .unwrap_or(0);
            format!("...{}", &path[cut..])
        } else {
            path.to_string()
        };

        self.bar.set_position(0);
        self.bar.reset_elapsed();
        self.bar.set_prefix(format!("{}/{}", index, total));
        self.bar.set_message(display);

        // Nothing is drawn before the first file so a password prompt stays readable
        if self.is_enabled() {
            self.bar.enable_steady_tick(Duration::from_millis(120));
        }
    }

    /// Increment bytes written for the current file
    pub fn increment_bytes(&self, bytes: u64) {
        self.bar.inc(bytes);
    }

    /// Mark the current file complete
    pub fn finish_file(&self) {
        self.files_done.fetch_add(1, Ordering::Relaxed);
    }

    /// Finish progress with success message
    pub fn finish_success(&self, message: &str) {
        self.bar.finish_with_message(format!("✓ {}", message));
    }

    /// Finish progress with error message
    pub fn finish_error(&self, message: &str) {
        self.bar.abandon_with_message(format!("✗ {}", message));
    }

    /// Check if progress is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}
