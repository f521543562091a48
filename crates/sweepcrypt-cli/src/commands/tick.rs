//! Tick command - advance a job by one bounded batch.

use anyhow::Result;
use clap::Args as ClapArgs;
use tracing::instrument;

use super::{parse_job_id, Session};
use crate::output::{format_size, print_job, print_json};

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Job id printed by `start`
    pub job_id: String,

    /// Files to process in this call (1-10)
    #[arg(long)]
    pub max_files: Option<usize>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

#[instrument(level = "info", name = "cmd::tick", skip_all, fields(job = %args.job_id))]
pub fn execute(session: &Session, args: &Args) -> Result<()> {
    let id = parse_job_id(&args.job_id)?;
    let report = session.controller.tick(&session.actor, &id, args.max_files)?;

    if args.json {
        return print_json(&report);
    }

    print_job(&report.job);
    if !session.quiet {
        eprintln!(
            "Processed {} file(s), {}",
            report.processed_files,
            format_size(report.processed_bytes)
        );
        if let Some(note) = &report.note {
            eprintln!("{note}");
        }
    }
    Ok(())
}
