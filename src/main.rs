//! StripeCopy CLI - Striped Parallel Downloads over SSH
//!
//! Without a subcommand this downloads files; `stripecp agent ...` is what
//! a downloading stripecp runs on the remote host.

use clap::Parser;
use stripecp::config::{AgentCommand, CliArgs, Commands, TransferConfig};
use stripecp::core::{DownloadEngine, StripeDescriptor};
use stripecp::error::Result;
use stripecp::network::agent;
use stripecp::progress::ProgressReporter;
use tracing_subscriber::EnvFilter;

fn main() {
    // Parse CLI arguments
    let args = CliArgs::parse();

    // Initialize logging; stdout carries agent replies, so logs go to stderr
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match args.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Handle result
    if let Err(e) = run(args) {
        if e.is_credential_error() {
            eprintln!("Error establishing contact with remote stripecp");
        } else if e.is_version_error() {
            eprintln!("Install a matching stripecp release on the remote host");
        }
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: CliArgs) -> Result<()> {
    // Handle subcommands
    if let Some(Commands::Agent { request }) = &args.command {
        return handle_agent(request);
    }

    // Build configuration
    let config = TransferConfig::from_cli(&args)?;

    // Print configuration if verbose
    if args.verbose > 0 {
        print_config(&config);
    }

    // Create progress reporter
    let progress = if args.quiet {
        ProgressReporter::disabled()
    } else {
        ProgressReporter::new()
    };

    // Create and run download engine
    let engine = DownloadEngine::new(config).with_progress(progress);
    let summary = engine.execute()?;

    // Print results
    if !args.quiet {
        summary.print_summary();
    }

    Ok(())
}

fn handle_agent(request: &AgentCommand) -> Result<()> {
    match request {
        AgentCommand::Stripe {
            slices,
            index,
            chunk,
            path,
        } => {
            let stripe = StripeDescriptor::new(*slices, *index, *chunk)?;
            agent::run_stripe(path, stripe)?;
        }
        AgentCommand::Manifest { patterns } => {
            agent::run_manifest(patterns)?;
        }
    }

    Ok(())
}

fn print_config(config: &TransferConfig) {
    eprintln!("=== Configuration ===");
    eprintln!("Remote:      {}@{}:{}", config.user, config.host, config.port);
    eprintln!("Sources:     {}", config.sources.join(" "));
    eprintln!(
        "Destination: {}",
        config
            .destination
            .as_ref()
            .map(|d| d.display().to_string())
            .unwrap_or_else(|| ".".to_string())
    );
    eprintln!("Stripes:     {} x {} bytes", config.slices, config.chunk_bytes);
    eprintln!(
        "Versions:    {} <= remote < {}",
        config.versions.minimum, config.versions.maximum
    );
    eprintln!();
}
