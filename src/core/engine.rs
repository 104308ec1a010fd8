//! Main download engine
//!
//! Logs in once over an interactive control session, which also returns
//! the manifest, checks the remote version, then downloads each matched
//! file through striped channels that reuse the secret from the login.

use crate::config::TransferConfig;
use crate::core::{plan_destinations, EntryKind, Manifest, ManifestEntry, StripeOptions, TransferOrchestrator, VersionGate};
use crate::error::{Result, StripeCopyError};
use crate::network::{
    ConsolePrompt, Negotiated, NegotiationConfig, Negotiator, PtySession, RemoteShell, SecretPrompt, Session,
    SshShell,
};
use crate::progress::ProgressReporter;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// One downloaded file
#[derive(Debug, Clone)]
pub struct FileTransfer {
    /// Path on the remote host
    pub remote: String,
    /// Where it was written
    pub local: PathBuf,
    /// Bytes written
    pub bytes: u64,
}

/// Download result
#[derive(Debug)]
pub struct TransferSummary {
    /// Version reported by the remote agent
    pub remote_version: String,
    /// Files downloaded, in order
    pub files: Vec<FileTransfer>,
    /// Total bytes written
    pub bytes: u64,
    /// Total duration, login included
    pub duration: Duration,
}

impl TransferSummary {
    /// Average throughput in bytes/second
    pub fn throughput(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.bytes as f64 / secs
        } else {
            0.0
        }
    }

    /// Print summary to console
    pub fn print_summary(&self) {
        let duration = Duration::from_millis(self.duration.as_millis() as u64);

        println!("\n=== Download Summary ===");
        for file in &self.files {
            println!(
                "  {} -> {} ({})",
                file.remote,
                file.local.display(),
                humansize::format_size(file.bytes, humansize::BINARY)
            );
        }
        println!("Files:           {}", self.files.len());
        println!("Bytes:           {}", humansize::format_size(self.bytes, humansize::BINARY));
        println!("Duration:        {}", humantime::format_duration(duration));
        println!(
            "Throughput:      {}/s",
            humansize::format_size(self.throughput() as u64, humansize::BINARY)
        );
        println!("Remote version:  {}", self.remote_version);
    }
}

/// Main download engine
pub struct DownloadEngine {
    /// Configuration
    config: TransferConfig,
    /// How commands reach the remote host
    shell: Box<dyn RemoteShell>,
    /// Where the secret comes from
    prompt: Box<dyn SecretPrompt>,
    /// Progress reporter
    progress: Option<ProgressReporter>,
}

impl DownloadEngine {
    /// Create an engine that talks to the remote host over ssh
    pub fn new(config: TransferConfig) -> Self {
        let shell = SshShell::from_config(&config);
        Self {
            config,
            shell: Box::new(shell),
            prompt: Box::new(ConsolePrompt),
            progress: None,
        }
    }

    /// Replace the remote shell
    pub fn with_shell(mut self, shell: Box<dyn RemoteShell>) -> Self {
        self.shell = shell;
        self
    }

    /// Replace the secret prompt
    pub fn with_prompt(mut self, prompt: Box<dyn SecretPrompt>) -> Self {
        self.prompt = prompt;
        self
    }

    /// Set progress reporter
    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Execute the download
    pub fn execute(&self) -> Result<TransferSummary> {
        let start_time = Instant::now();
        self.config.validate()?;
        let gate = VersionGate::new(&self.config.versions)?;

        let mut session = Session::new(&self.config.user, &self.config.host, self.config.port);
        let Negotiated { secret, manifest } = self
            .negotiate(&session)
            .map_err(|e| e.with_context(format!("logging in to {}", session.destination())))?;

        gate.check(&manifest.version)?;
        let entries = select_files(&manifest, &self.config.sources)?;
        let plan = plan_destinations(&entries, self.config.destination.as_deref())?;

        session.secret = secret;
        let orchestrator =
            TransferOrchestrator::new(self.shell.as_ref(), &session, StripeOptions::from_config(&self.config));

        if let Some(progress) = &self.progress {
            progress.set_total_files(plan.len() as u64);
        }

        let mut files = Vec::with_capacity(plan.len());
        for (remote, local) in plan {
            if let Some(progress) = &self.progress {
                progress.start_file(&remote);
            }

            let result = orchestrator.transfer_file(&remote, &local, |bytes| {
                if let Some(progress) = &self.progress {
                    progress.increment_bytes(bytes);
                }
            });

            let bytes = match result {
                Ok(bytes) => bytes,
                Err(e) => {
                    if let Some(progress) = &self.progress {
                        progress.finish_error(&remote);
                    }
                    return Err(e.with_context(format!("downloading {}", remote)));
                }
            };

            if let Some(progress) = &self.progress {
                progress.finish_file();
            }
            tracing::info!("{} -> {}: {} bytes", remote, local.display(), bytes);
            files.push(FileTransfer { remote, local, bytes });
        }

        let bytes = files.iter().map(|file| file.bytes).sum();
        if let Some(progress) = &self.progress {
            progress.finish_success(&format!(
                "{} file(s), {}",
                files.len(),
                humansize::format_size(bytes, humansize::BINARY)
            ));
        }

        Ok(TransferSummary {
            remote_version: manifest.version,
            files,
            bytes,
            duration: start_time.elapsed(),
        })
    }

    /// Log in and fetch the manifest over one interactive session
    fn negotiate(&self, session: &Session) -> Result<Negotiated> {
        let mut args = vec!["agent".to_string(), "manifest".to_string()];
        args.extend(self.config.sources.iter().cloned());

        let command = self.shell.control_command(session, &args);
        let mut pty = PtySession::spawn(command)
            .map_err(|e| StripeCopyError::connection(&session.host, e.to_string()))?;

        let mut negotiation = NegotiationConfig {
            timeout: Duration::from_secs(self.config.timeout_secs),
            ..Default::default()
        };
        negotiation
            .password_prompts
            .extend(self.config.password_prompts.iter().cloned());

        tracing::debug!("negotiating with {}", session.destination());
        Negotiator::new(negotiation, &session.user, &session.host).run(&mut pty, self.prompt.as_ref())
    }
}

/// Files to download from a manifest
///
/// Directories are skipped with a warning. Any unreadable file fails the
/// whole download before a channel is opened.
pub fn select_files<S: AsRef<str>>(manifest: &Manifest, patterns: &[S]) -> Result<Vec<ManifestEntry>> {
    let mut files = Vec::with_capacity(manifest.entries.len());

    for entry in &manifest.entries {
        match entry.kind {
            EntryKind::Dir => tracing::warn!("skipping directory {}", entry.path),
            EntryKind::File if !entry.readable => {
                return Err(StripeCopyError::NotReadable(entry.path.clone()));
            }
            EntryKind::File => files.push(entry.clone()),
        }
    }

    if files.is_empty() {
        let patterns: Vec<&str> = patterns.iter().map(AsRef::as_ref).collect();
        return Err(StripeCopyError::NoFilesMatched(patterns.join(" ")));
    }

    Ok(files)
}
