//! Status command - show a job's progress.

use anyhow::Result;
use clap::Args as ClapArgs;
use tracing::instrument;

use super::{parse_job_id, Session};
use crate::output::{print_job, print_json};

#[derive(ClapArgs, Clone)]
pub struct Args {
    pub job_id: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

#[instrument(level = "info", name = "cmd::status", skip_all, fields(job = %args.job_id))]
pub fn execute(session: &Session, args: &Args) -> Result<()> {
    let id = parse_job_id(&args.job_id)?;
    let job = session.controller.status(&session.actor, &id)?;

    if args.json {
        print_json(&job)
    } else {
        print_job(&job);
        Ok(())
    }
}
