pub mod folder;
pub mod jobs;
pub mod keygen;
pub mod plan;
pub mod run;
pub mod start;
pub mod status;
pub mod tick;

use anyhow::Result;
use sweepcrypt_core::{Actor, FolderPath, JobController, JobId};

/// Everything a job command needs: the engine and who is calling it.
pub struct Session {
    pub controller: JobController,
    pub actor: Actor,
    pub quiet: bool,
}

pub(crate) fn parse_folder(raw: &str) -> Result<FolderPath> {
    Ok(FolderPath::parse(raw)?)
}

pub(crate) fn parse_job_id(raw: &str) -> Result<JobId> {
    Ok(JobId::parse(raw)?)
}
