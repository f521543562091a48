//! Plan command - estimate the work a job would do.

use anyhow::Result;
use clap::Args as ClapArgs;
use comfy_table::Cell;
use sweepcrypt_core::JobMode;
use tracing::instrument;

use super::{parse_folder, Session};
use crate::output::{create_table, format_size, print_json};

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Folder relative to the storage root ("/" for the root)
    pub folder: String,

    /// encrypt or decrypt
    #[arg(short, long)]
    pub mode: JobMode,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

#[instrument(level = "info", name = "cmd::plan", skip_all, fields(folder = %args.folder))]
pub fn execute(session: &Session, args: &Args) -> Result<()> {
    let folder = parse_folder(&args.folder)?;
    let plan = session.controller.plan(&session.actor, &folder, args.mode)?;

    if args.json {
        return print_json(&plan);
    }

    let mut table = create_table();
    table.set_header(vec!["Folder", "Mode", "Files", "Size"]);
    table.add_row(vec![
        Cell::new(&folder),
        Cell::new(args.mode),
        Cell::new(if plan.truncated {
            format!("{}+", plan.total_files)
        } else {
            plan.total_files.to_string()
        }),
        Cell::new(format_size(plan.total_bytes)),
    ]);
    println!("{table}");

    if plan.truncated && !session.quiet {
        eprintln!("Scan stopped early; totals are a lower bound.");
    }
    Ok(())
}
