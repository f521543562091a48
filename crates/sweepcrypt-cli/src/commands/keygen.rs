//! Keygen command - write a fresh master key file.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use sweepcrypt_core::AeadFileTransform;
use tracing::instrument;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Where to write the key (must not exist)
    pub path: PathBuf,
}

#[instrument(level = "info", name = "cmd::keygen", skip_all, fields(path = %args.path.display()))]
pub fn execute(args: &Args, quiet: bool) -> Result<()> {
    AeadFileTransform::generate_key_file(&args.path)
        .with_context(|| format!("Failed to write key file {}", args.path.display()))?;

    if !quiet {
        eprintln!("Wrote master key to {}", args.path.display());
        eprintln!("Set [crypto] key_file in the config file to use it.");
    }
    Ok(())
}
