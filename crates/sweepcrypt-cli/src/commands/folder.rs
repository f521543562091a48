//! Folder command - show encryption status and what the caller may do.

use anyhow::Result;
use clap::Args as ClapArgs;
use comfy_table::{Cell, Color};
use tracing::instrument;

use super::{parse_folder, Session};
use crate::output::{create_table, print_json};

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Folder relative to the storage root ("/" for the root)
    pub folder: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

fn yes_no(value: bool) -> Cell {
    if value {
        Cell::new("yes").fg(Color::Green)
    } else {
        Cell::new("no")
    }
}

#[instrument(level = "info", name = "cmd::folder", skip_all, fields(folder = %args.folder))]
pub fn execute(session: &Session, args: &Args) -> Result<()> {
    let folder = parse_folder(&args.folder)?;
    let report = session.controller.describe_folder(&session.actor, &folder)?;

    if args.json {
        return print_json(&report);
    }

    let mut table = create_table();
    table.set_header(vec!["Field", "Value"]);
    table.add_row(vec![Cell::new("Folder"), Cell::new(&report.folder)]);
    table.add_row(vec![Cell::new("Encrypted"), yes_no(report.status.encrypted)]);
    if report.status.inherited
        && let Some(root) = &report.status.root
    {
        table.add_row(vec![Cell::new("Inherited from"), Cell::new(root)]);
    }
    if let Some(job) = &report.job_status.job {
        let owner = report
            .job_status
            .root
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();
        table.add_row(vec![
            Cell::new("Job"),
            Cell::new(format!("{} {} ({}) on {}", job.mode, job.id, job.state, owner)),
        ]);
    }
    table.add_row(vec![Cell::new("Can encrypt"), yes_no(report.capabilities.can_encrypt)]);
    table.add_row(vec![Cell::new("Can decrypt"), yes_no(report.capabilities.can_decrypt)]);
    if let Some(denial) = &report.capabilities.denial {
        table.add_row(vec![Cell::new("Reason"), Cell::new(denial).fg(Color::Yellow)]);
    }
    println!("{table}");
    Ok(())
}
