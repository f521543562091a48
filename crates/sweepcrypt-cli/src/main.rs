#![deny(unsafe_code)]

mod commands;
mod config;
mod exit_code;
mod output;

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sweepcrypt_core::{JobController, JobError, LocalStorage, TransformError};

use crate::commands::run::JobFailed;
use crate::commands::{folder, jobs, keygen, plan, run, start, status, tick, Session};
use crate::config::Config;

/// Resumable bulk encryption of folder trees
#[derive(Parser)]
#[command(name = "sweepcrypt")]
#[command(author, version)]
#[command(propagate_version = true)]
#[command(after_help = "EXAMPLES:
    # Create a master key and reference it from the config file
    sweepcrypt keygen /etc/sweepcrypt/master.key

    # Encrypt a folder in one go
    sweepcrypt --user alice run projects/alpha --mode encrypt

    # Drive a job step by step
    sweepcrypt start projects/alpha --mode decrypt
    sweepcrypt tick <JOB_ID> --max-files 10
    sweepcrypt status <JOB_ID>
")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Configuration file (default: ~/.config/sweepcrypt/config.toml)
    #[arg(long, env = "SWEEPCRYPT_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Act as this user (default: $USER)
    #[arg(long, env = "SWEEPCRYPT_USER", global = true)]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Estimate how many files a job would process
    Plan(plan::Args),

    /// Create a job on a folder
    Start(start::Args),

    /// Process the next batch of a job
    Tick(tick::Args),

    /// Show a job's progress
    Status(status::Args),

    /// Start a job and tick it until it finishes
    Run(run::Args),

    /// List your jobs (all jobs for administrators)
    Jobs(jobs::Args),

    /// Show a folder's encryption status and capabilities
    Folder(folder::Args),

    /// Generate a master key file
    Keygen(keygen::Args),
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::from(exit_code::SUCCESS),
        Err(e) => {
            let code = categorize_error(&e);

            // Only print error if not quiet mode (quiet is parsed separately for this)
            let args: Vec<String> = std::env::args().collect();
            let is_quiet = args.iter().any(|a| a == "-q" || a == "--quiet");

            if !is_quiet {
                eprintln!("Error: {e:#}");
            }

            ExitCode::from(code)
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    // Set up tracing based on verbosity (skip if quiet)
    if !cli.quiet {
        setup_tracing(cli.verbose);
    }

    let session = || -> Result<Session> {
        let config = Config::load(cli.config.as_deref())?;
        open_session(&config, cli.user.clone(), cli.quiet)
    };

    match &cli.command {
        Commands::Plan(args) => plan::execute(&session()?, args),
        Commands::Start(args) => start::execute(&session()?, args),
        Commands::Tick(args) => tick::execute(&session()?, args),
        Commands::Status(args) => status::execute(&session()?, args),
        Commands::Run(args) => run::execute(&session()?, args),
        Commands::Jobs(args) => jobs::execute(&session()?, args),
        Commands::Folder(args) => folder::execute(&session()?, args),
        Commands::Keygen(args) => keygen::execute(args, cli.quiet),
    }
}

/// Build the engine from configuration and resolve the calling user.
fn open_session(config: &Config, user: Option<String>, quiet: bool) -> Result<Session> {
    let user = match user {
        Some(user) => user,
        None => std::env::var("USER")
            .context("No user given. Pass --user or set SWEEPCRYPT_USER.")?,
    };
    if user.trim().is_empty() {
        anyhow::bail!("User name must not be empty");
    }

    let engine = config.engine_config()?;
    let state_dir = engine.state_dir.clone();
    let controller = JobController::new(
        engine,
        Arc::new(LocalStorage::new(config.storage_root()?)),
        Arc::new(config.transform()?),
        Arc::new(config.access_policy()?),
    )
    .with_context(|| format!("Failed to open state directory {}", state_dir.display()))?;

    Ok(Session {
        controller,
        actor: config.actor(user),
        quiet,
    })
}

/// Set up tracing/logging based on verbosity level
fn setup_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(io::stderr)
        .init();
}

/// Categorize an error into an exit code using typed error downcasting
fn categorize_error(e: &anyhow::Error) -> u8 {
    for cause in e.chain() {
        if let Some(job_err) = cause.downcast_ref::<JobError>() {
            return match job_err {
                JobError::Validation { .. } => exit_code::USAGE_ERROR,
                JobError::Authorization(_) => exit_code::PERMISSION_DENIED,
                JobError::NotFound { .. } => exit_code::NOT_FOUND,
                JobError::Conflict(_) => exit_code::CONFLICT,
                JobError::Transform(_) => exit_code::TRANSFORM_FAILED,
                JobError::Persistence { .. } => exit_code::PERSISTENCE_FAILED,
            };
        }

        if cause.downcast_ref::<JobFailed>().is_some() {
            return exit_code::TRANSFORM_FAILED;
        }

        // I/O failures are classified by the io::Error further down the chain
        if let Some(transform_err) = cause.downcast_ref::<TransformError>()
            && !matches!(transform_err, TransformError::Io { .. })
        {
            return exit_code::TRANSFORM_FAILED;
        }

        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            match io_err.kind() {
                io::ErrorKind::PermissionDenied => return exit_code::PERMISSION_DENIED,
                io::ErrorKind::NotFound => return exit_code::NOT_FOUND,
                _ => {}
            }
        }
    }

    exit_code::GENERAL_ERROR
}
