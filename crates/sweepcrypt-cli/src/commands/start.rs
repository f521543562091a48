//! Start command - create a job without running it.

use anyhow::Result;
use clap::Args as ClapArgs;
use sweepcrypt_core::JobMode;
use tracing::instrument;

use super::{parse_folder, Session};
use crate::output::print_json;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Folder relative to the storage root ("/" for the root)
    pub folder: String,

    /// encrypt or decrypt
    #[arg(short, long)]
    pub mode: JobMode,

    /// Estimated file count (scanned when omitted)
    #[arg(long, requires = "total_bytes")]
    pub total_files: Option<u64>,

    /// Estimated byte count (scanned when omitted)
    #[arg(long, requires = "total_files")]
    pub total_bytes: Option<u64>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

#[instrument(level = "info", name = "cmd::start", skip_all, fields(folder = %args.folder, mode = %args.mode))]
pub fn execute(session: &Session, args: &Args) -> Result<()> {
    let folder = parse_folder(&args.folder)?;

    let (total_files, total_bytes) = match (args.total_files, args.total_bytes) {
        (Some(files), Some(bytes)) => (files, bytes),
        _ => {
            let plan = session.controller.plan(&session.actor, &folder, args.mode)?;
            (plan.total_files, plan.total_bytes)
        }
    };

    let id = session
        .controller
        .start(&session.actor, &folder, args.mode, total_files, total_bytes)?;

    if args.json {
        print_json(&serde_json::json!({ "job_id": id }))
    } else {
        println!("{id}");
        Ok(())
    }
}
