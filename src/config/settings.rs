//! Configuration settings for StripeCopy
//!
//! Defines the command line, its defaults, and the validated runtime
//! configuration a download runs from.

use crate::core::MAX_CHUNK_BYTES;
use crate::error::{Result, StripeCopyError};
use crate::network::PathSpec;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// StripeCopy - Copy a remote file using multiple interleaved SSH streams
#[derive(Parser, Debug, Clone)]
#[command(name = "stripecp")]
#[command(author = "StripeCopy Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Copy a remote file using multiple interleaved SSH streams")]
#[command(long_about = r#"
StripeCopy downloads files from a remote host over several SSH sessions at
once. Each session carries one interleaved stripe of the file; the stripes
are reassembled locally in order.

The remote host must have stripecp installed as well.

Examples:
  stripecp user@host:data.bin                 # Download into the current directory
  stripecp user@host:data.bin copy.bin        # Download to a named file
  stripecp -n 4 -b 64K 'host:logs/*.gz' logs/ # Four stripes of 64 KiB chunks
"#)]
#[command(after_help = "Remote files are specified as [user@]host:path; the source is always remote.")]
#[command(args_conflicts_with_subcommands = true, subcommand_negates_reqs = true)]
pub struct CliArgs {
    /// Remote sources followed by an optional local destination
    #[arg(value_name = "PATH", required = true)]
    pub paths: Vec<String>,

    /// SSH port
    #[arg(short = 'p', long, default_value = "22", env = "STRIPECP_PORT", value_name = "PORT")]
    pub port: u16,

    /// Number of parallel stripes
    #[arg(short = 'n', long, default_value = "10", value_name = "NUM")]
    pub slices: usize,

    /// Chunk size for stripes (e.g., 10000, 64K, 1M)
    #[arg(short = 'b', long, default_value = "10000", value_name = "SIZE")]
    pub chunk_size: String,

    /// Seconds to wait for the remote side while logging in
    #[arg(long, default_value = "30", value_name = "SECS")]
    pub timeout: u64,

    /// Milliseconds between starting consecutive stripes
    #[arg(long, default_value = "100", value_name = "MS")]
    pub stagger_ms: u64,

    /// Name of the stripecp program on the remote host
    #[arg(long, default_value = "stripecp", value_name = "PROGRAM")]
    pub remote_program: String,

    /// SSH client to run
    #[arg(long, default_value = "ssh", value_name = "PROGRAM")]
    pub ssh_program: String,

    /// sshpass program used to hand the password to stripe sessions
    #[arg(long, default_value = "sshpass", value_name = "PROGRAM")]
    pub sshpass_program: String,

    /// Additional password prompt text to recognize (e.g., a translated prompt)
    #[arg(long = "password-prompt", value_name = "TEXT")]
    pub password_prompts: Vec<String>,

    /// Directory for per-stripe scratch fifos (default: system temp dir)
    #[arg(long, value_name = "DIR")]
    pub scratch_dir: Option<PathBuf>,

    /// Oldest remote stripecp version accepted
    #[arg(long, hide = true, value_name = "VERSION")]
    pub min_remote_version: Option<String>,

    /// First remote stripecp version no longer accepted
    #[arg(long, hide = true, value_name = "VERSION")]
    pub max_remote_version: Option<String>,

    /// Verbose output (can be repeated: -v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Serve a request from a remote stripecp (internal use only)
    #[command(name = "agent", hide = true)]
    Agent {
        /// Request to serve
        #[command(subcommand)]
        request: AgentCommand,
    },
}

/// Requests the agent answers
#[derive(Subcommand, Debug, Clone)]
pub enum AgentCommand {
    /// Write stripe INDEX of SLICES, in CHUNK byte pieces, to stdout
    #[command(name = "stripe")]
    Stripe {
        /// Number of stripes
        slices: usize,
        /// Stripe to emit, counting from zero
        index: usize,
        /// Chunk size in bytes
        chunk: usize,
        /// File to read
        path: PathBuf,
    },

    /// Resolve glob patterns and print the manifest as JSON
    #[command(name = "manifest")]
    Manifest {
        /// Patterns to evaluate
        #[arg(required = true)]
        patterns: Vec<String>,
    },
}

/// Remote agent versions this build talks to: `minimum <= v < maximum`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRange {
    /// Oldest accepted version
    pub minimum: String,
    /// First rejected newer version
    pub maximum: String,
}

impl Default for VersionRange {
    fn default() -> Self {
        Self {
            minimum: "0.1".to_string(),
            maximum: next_minor(crate::VERSION),
        }
    }
}

/// `0.4.2` -> `0.5`
fn next_minor(version: &str) -> String {
    match semver::Version::parse(version) {
        Ok(v) => format!("{}.{}", v.major, v.minor + 1),
        Err(_) => version.to_string(),
    }
}

/// Runtime configuration derived from CLI args
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Remote paths or patterns, all on one host
    pub sources: Vec<String>,
    /// Remote user
    pub user: String,
    /// Remote host
    pub host: String,
    /// SSH port
    pub port: u16,
    /// Local destination; files land in the current directory when unset
    pub destination: Option<PathBuf>,
    /// Number of parallel stripes
    pub slices: usize,
    /// Chunk size in bytes
    pub chunk_bytes: usize,
    /// Login timeout in seconds
    pub timeout_secs: u64,
    /// Delay between stripe starts in milliseconds
    pub stagger_ms: u64,
    /// Agent program on the remote host
    pub remote_program: String,
    /// SSH client
    pub ssh_program: String,
    /// sshpass helper
    pub sshpass_program: String,
    /// Extra password prompt texts
    pub password_prompts: Vec<String>,
    /// Scratch directory parent
    pub scratch_root: Option<PathBuf>,
    /// Accepted remote versions
    pub versions: VersionRange,
    /// Quiet mode
    pub quiet: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            user: String::new(),
            host: String::new(),
            port: 22,
            destination: None,
            slices: 10,
            chunk_bytes: 10_000,
            timeout_secs: 30,
            stagger_ms: 100,
            remote_program: "stripecp".to_string(),
            ssh_program: "ssh".to_string(),
            sshpass_program: "sshpass".to_string(),
            password_prompts: Vec::new(),
            scratch_root: None,
            versions: VersionRange::default(),
            quiet: false,
        }
    }
}

impl TransferConfig {
    /// Create config from CLI arguments
    pub fn from_cli(args: &CliArgs) -> Result<Self> {
        let (sources, destination) = match args.paths.as_slice() {
            [] => {
                return Err(StripeCopyError::InvalidArgument(
                    "at least one source is required".to_string(),
                ))
            }
            [source] => (vec![PathSpec::parse(source)?], None),
            [sources @ .., destination] => (
                sources
                    .iter()
                    .map(|source| PathSpec::parse(source))
                    .collect::<Result<Vec<_>>>()?,
                Some(PathSpec::parse(destination)?),
            ),
        };

        if let Some(dest) = &destination {
            if dest.is_remote() {
                return Err(StripeCopyError::UploadUnsupported);
            }
        }

        let (user, host) = common_endpoint(&sources)?;

        let chunk_bytes = parse_size(&args.chunk_size)
            .and_then(|bytes| usize::try_from(bytes).map_err(|_| format!("{} bytes is too large", bytes)))
            .map_err(|e| StripeCopyError::InvalidArgument(format!("Invalid chunk size: {}", e)))?;

        let mut versions = VersionRange::default();
        if let Some(minimum) = &args.min_remote_version {
            versions.minimum = minimum.clone();
        }
        if let Some(maximum) = &args.max_remote_version {
            versions.maximum = maximum.clone();
        }

        let config = Self {
            sources: sources.into_iter().map(|spec| spec.path).collect(),
            user,
            host,
            port: args.port,
            destination: destination.map(|spec| PathBuf::from(spec.path)),
            slices: args.slices,
            chunk_bytes,
            timeout_secs: args.timeout,
            stagger_ms: args.stagger_ms,
            remote_program: args.remote_program.clone(),
            ssh_program: args.ssh_program.clone(),
            sshpass_program: args.sshpass_program.clone(),
            password_prompts: args.password_prompts.clone(),
            scratch_root: args.scratch_dir.clone(),
            versions,
            quiet: args.quiet,
        };

        config.validate()?;
        Ok(config)
    }

    /// Check the stripe layout
    pub fn validate(&self) -> Result<()> {
        if self.slices == 0 {
            return Err(StripeCopyError::InvalidStripe(
                "number of slices must be positive".to_string(),
            ));
        }
        if self.chunk_bytes == 0 {
            return Err(StripeCopyError::InvalidStripe(
                "chunk size must be positive".to_string(),
            ));
        }
        if self.chunk_bytes > MAX_CHUNK_BYTES {
            return Err(StripeCopyError::InvalidStripe(format!(
                "chunk size {} exceeds the {} byte limit",
                self.chunk_bytes, MAX_CHUNK_BYTES
            )));
        }
        Ok(())
    }
}

/// The one `(user, host)` every source names
fn common_endpoint(sources: &[PathSpec]) -> Result<(String, String)> {
    let mut endpoint: Option<(&str, &str)> = None;

    for source in sources {
        let Some(current) = source.endpoint() else {
            return Err(StripeCopyError::UploadUnsupported);
        };

        match endpoint {
            None => endpoint = Some(current),
            Some(first) if first == current => {}
            Some((user, host)) => {
                return Err(StripeCopyError::MixedHosts {
                    expected: format!("{}@{}", user, host),
                    found: format!("{}@{}", current.0, current.1),
                })
            }
        }
    }

    endpoint
        .map(|(user, host)| (user.to_string(), host.to_string()))
        .ok_or_else(|| StripeCopyError::InvalidArgument("at least one source is required".to_string()))
}

/// Parse human-readable size string to bytes
pub fn parse_size(size: &str) -> std::result::Result<u64, String> {
    let size = size.trim().to_uppercase();

    if size.is_empty() {
        return Err("Empty size string".to_string());
    }

    let (num_str, multiplier) = if size.ends_with("GB") || size.ends_with('G') {
        (size.trim_end_matches(['G', 'B']), 1024u64 * 1024 * 1024)
    } else if size.ends_with("MB") || size.ends_with('M') {
        (size.trim_end_matches(['M', 'B']), 1024u64 * 1024)
    } else if size.ends_with("KB") || size.ends_with('K') {
        (size.trim_end_matches(['K', 'B']), 1024u64)
    } else if size.ends_with('B') {
        (size.trim_end_matches('B'), 1u64)
    } else {
        // Assume bytes if no suffix
        (size.as_str(), 1u64)
    };

    let num: f64 = num_str
        .trim()
        .parse()
        .map_err(|_| format!("Invalid number: {}", num_str))?;

    if num < 0.0 {
        return Err(format!("Negative size: {}", num_str));
    }

    let bytes = num * multiplier as f64;
    if !bytes.is_finite() || bytes >= u64::MAX as f64 {
        return Err(format!("Size out of range: {}", size));
    }

    Ok(bytes as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &str) -> CliArgs {
        CliArgs::try_parse_from(std::iter::once("stripecp").chain(args.split_whitespace())).unwrap()
    }

    fn config(args: &str) -> Result<TransferConfig> {
        TransferConfig::from_cli(&cli(args))
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1024").unwrap(), 1024);
        assert_eq!(parse_size("1K").unwrap(), 1024);
        assert_eq!(parse_size("1KB").unwrap(), 1024);
        assert_eq!(parse_size("1M").unwrap(), 1024 * 1024);
        assert_eq!(parse_size("1G").unwrap(), 1024 * 1024 * 1024);
        assert_eq!(parse_size("1.5K").unwrap(), 1536);
        assert!(parse_size("").is_err());
        assert!(parse_size("lots").is_err());
        assert!(parse_size("1e30").is_err());
        assert!(parse_size("inf").is_err());
    }

    #[test]
    fn test_rejects_oversized_chunks() {
        for args in ["-b 100G u@h:f", "-b 1e30 u@h:f", "-b 65M u@h:f"] {
            let err = config(args).unwrap_err();
            assert!(err.is_validation_error(), "{}: {:?}", args, err);
        }
        assert_eq!(config("-b 64M u@h:f").unwrap().chunk_bytes, MAX_CHUNK_BYTES);
    }

    #[test]
    fn test_defaults() {
        let config = config("user@host:remotefile").unwrap();
        assert_eq!(config.sources, vec!["remotefile"]);
        assert_eq!((config.user.as_str(), config.host.as_str()), ("user", "host"));
        assert_eq!(config.port, 22);
        assert_eq!(config.slices, 10);
        assert_eq!(config.chunk_bytes, 10_000);
        assert_eq!(config.destination, None);
    }

    #[test]
    fn test_destination_and_options() {
        let config = config("-n 5 -b 20 -p 2222 user@host:remotefile localfile").unwrap();
        assert_eq!(config.slices, 5);
        assert_eq!(config.chunk_bytes, 20);
        assert_eq!(config.port, 2222);
        assert_eq!(config.destination, Some(PathBuf::from("localfile")));
    }

    #[test]
    fn test_several_sources() {
        let config = config("u@h:a u@h:dir/* out").unwrap();
        assert_eq!(config.sources, vec!["a", "dir/*"]);
        assert_eq!(config.destination, Some(PathBuf::from("out")));
    }

    #[test]
    fn test_rejects_upload_and_local_copies() {
        for args in ["localfile localfile", "localfile user@host:remotefile", "user@host:a user@host:b"] {
            assert!(
                matches!(config(args), Err(StripeCopyError::UploadUnsupported)),
                "{} should be rejected",
                args
            );
        }
    }

    #[test]
    fn test_rejects_mixed_hosts() {
        assert!(matches!(
            config("u@h1:a u@h2:b out"),
            Err(StripeCopyError::MixedHosts { .. })
        ));
        assert!(matches!(
            config("u1@h:a u2@h:b out"),
            Err(StripeCopyError::MixedHosts { .. })
        ));
    }

    #[test]
    fn test_rejects_bad_stripes() {
        assert!(matches!(config("-n 0 u@h:a"), Err(StripeCopyError::InvalidStripe(_))));
        assert!(matches!(config("-b 0 u@h:a"), Err(StripeCopyError::InvalidStripe(_))));
        assert!(matches!(config("-b x u@h:a"), Err(StripeCopyError::InvalidArgument(_))));
    }

    #[test]
    fn test_requires_a_path() {
        assert!(CliArgs::try_parse_from(["stripecp"]).is_err());
    }

    #[test]
    fn test_agent_subcommands() {
        let args = cli("agent stripe 4 1 100 /data/file");
        match args.command {
            Some(Commands::Agent {
                request: AgentCommand::Stripe { slices, index, chunk, path },
            }) => {
                assert_eq!((slices, index, chunk), (4, 1, 100));
                assert_eq!(path, PathBuf::from("/data/file"));
            }
            other => panic!("unexpected {:?}", other),
        }

        let args = cli("agent manifest a* b");
        assert!(matches!(
            args.command,
            Some(Commands::Agent { request: AgentCommand::Manifest { ref patterns } }) if patterns.len() == 2
        ));
    }

    #[test]
    fn test_default_range_accepts_own_version() {
        let range = VersionRange::default();
        assert_eq!(next_minor("0.4.2"), "0.5");
        crate::core::VersionGate::new(&range).unwrap().check(crate::VERSION).unwrap();
    }

    #[test]
    fn test_version_overrides() {
        let config = config("--min-remote-version 0.3 --max-remote-version 9 u@h:a").unwrap();
        assert_eq!(config.versions.minimum, "0.3");
        assert_eq!(config.versions.maximum, "9");
    }
}
