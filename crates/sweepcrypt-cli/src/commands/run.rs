//! Run command - start a job and tick it until it finishes.

use anyhow::Result;
use clap::Args as ClapArgs;
use sweepcrypt_core::{JobId, JobMode, JobState};
use thiserror::Error;
use tracing::{info, instrument};

use super::{parse_folder, Session};
use crate::output::{format_progress, format_size, print_job, print_json};

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Folder relative to the storage root ("/" for the root)
    pub folder: String,

    /// encrypt or decrypt
    #[arg(short, long)]
    pub mode: JobMode,

    /// Files to process per tick (1-10)
    #[arg(long)]
    pub max_files: Option<usize>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// The job ended in the error state.
#[derive(Debug, Error)]
#[error("job {id} failed: {message}")]
pub struct JobFailed {
    pub id: JobId,
    pub message: String,
}

#[instrument(level = "info", name = "cmd::run", skip_all, fields(folder = %args.folder, mode = %args.mode))]
pub fn execute(session: &Session, args: &Args) -> Result<()> {
    let folder = parse_folder(&args.folder)?;
    let controller = &session.controller;

    let plan = controller.plan(&session.actor, &folder, args.mode)?;
    let id = controller.start(
        &session.actor,
        &folder,
        args.mode,
        plan.total_files,
        plan.total_bytes,
    )?;
    info!(job = %id, files = plan.total_files, "Job started");

    let mut ticks = 0u64;
    let report = loop {
        let report = controller.tick(&session.actor, &id, args.max_files)?;
        ticks += 1;
        if report.job.state.is_terminal() {
            break report;
        }
        if !session.quiet && !args.json {
            eprintln!(
                "{}: {} files, {}",
                id,
                format_progress(report.job.done_files, report.job.total_files),
                format_size(report.job.done_bytes)
            );
        }
    };

    if args.json {
        print_json(&report.job)?;
    } else {
        print_job(&report.job);
        if !session.quiet {
            eprintln!("Finished in {ticks} tick(s)");
        }
    }

    if report.job.state == JobState::Error {
        return Err(JobFailed {
            id,
            message: report.job.error.unwrap_or_default(),
        }
        .into());
    }
    Ok(())
}
