//! Jobs command - list jobs visible to the caller.

use anyhow::Result;
use clap::Args as ClapArgs;
use comfy_table::Cell;
use tracing::instrument;

use super::Session;
use crate::output::{create_table, format_progress, format_size, print_json, state_cell};

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

#[instrument(level = "info", name = "cmd::jobs", skip_all)]
pub fn execute(session: &Session, args: &Args) -> Result<()> {
    let jobs = session.controller.list_jobs(&session.actor)?;

    if args.json {
        return print_json(&jobs);
    }

    if jobs.is_empty() {
        if !session.quiet {
            eprintln!("No jobs.");
        }
        return Ok(());
    }

    let mut table = create_table();
    table.set_header(vec!["Job", "Mode", "Folder", "State", "Files", "Size"]);
    for job in &jobs {
        table.add_row(vec![
            Cell::new(&job.id),
            Cell::new(job.mode),
            Cell::new(&job.folder),
            state_cell(job.state),
            Cell::new(format_progress(job.done_files, job.total_files)),
            Cell::new(format_size(job.done_bytes)),
        ]);
    }
    println!("{table}");
    Ok(())
}
