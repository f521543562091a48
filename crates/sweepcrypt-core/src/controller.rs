//! Job lifecycle: Plan, Start, Tick and Status.
//!
//! A job is driven forward by repeated [`JobController::tick`] calls, each of
//! which transforms a small bounded batch of files and persists the walk
//! position before returning. Nothing lives in memory between calls, so any
//! process holding the same state directory can pick a job up where the last
//! call left it.
//!
//! Ticks on the same job are serialized by the job's file lock. Everything
//! that decides whether a tick may run (visibility, capabilities, the folder
//! markers) is re-evaluated inside that lock on every call.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, trace, warn};

use crate::error::JobError;
use crate::folder::{FolderPath, StorageResolver};
use crate::gate::{AccessPolicy, Actor, Capabilities, CapabilityGate, Denial};
use crate::job::{Job, JobId, JobMode, JobSnapshot, JobState};
use crate::marker::{FolderEncryptionStatus, FolderJobStatus, FolderRegistry, JobMarker};
use crate::plan::{self, PlanEstimate};
use crate::store::JobStore;
use crate::transform::{FileTransform, TransformError};
use crate::walker::{DirectoryWalker, FileSystemWalker, LocalFs, SkipRules, WalkedFile};

/// Files per tick when the caller does not say.
pub const DEFAULT_BATCH: usize = 2;

/// Upper bound on files per tick.
pub const MAX_BATCH: usize = 10;

/// Failed jobs are kept for this long so their starter can see the error.
pub const DEFAULT_ERROR_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Directory entries a Plan scan visits before giving up.
pub const DEFAULT_PLAN_ENTRY_LIMIT: u64 = 200_000;

/// Engine settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Holds `jobs/` and `folders/`
    pub state_dir: PathBuf,
    pub default_batch: usize,
    pub plan_entry_limit: u64,
    pub error_retention: Duration,
    /// `None` blocks until the job lock is free
    pub lock_timeout: Option<Duration>,
    pub skip_rules: SkipRules,
}

impl EngineConfig {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            default_batch: DEFAULT_BATCH,
            plan_entry_limit: DEFAULT_PLAN_ENTRY_LIMIT,
            error_retention: DEFAULT_ERROR_RETENTION,
            lock_timeout: None,
            skip_rules: SkipRules::default(),
        }
    }

    #[must_use]
    pub fn with_default_batch(mut self, batch: usize) -> Self {
        self.default_batch = batch;
        self
    }

    #[must_use]
    pub fn with_plan_entry_limit(mut self, limit: u64) -> Self {
        self.plan_entry_limit = limit;
        self
    }

    #[must_use]
    pub fn with_error_retention(mut self, retention: Duration) -> Self {
        self.error_retention = retention;
        self
    }

    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_skip_rules(mut self, rules: SkipRules) -> Self {
        self.skip_rules = rules;
        self
    }
}

/// Result of one Tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub job: JobSnapshot,
    /// Files transformed (or found already transformed) by this call
    pub processed_files: u64,
    pub processed_bytes: u64,
    /// Set when the call did no work, e.g. the job had already finished
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl TickReport {
    fn idle(job: &Job, note: &str) -> Self {
        Self {
            job: job.snapshot(),
            processed_files: 0,
            processed_bytes: 0,
            note: Some(note.to_string()),
        }
    }
}

/// Everything a front-end needs to render a folder's encryption controls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FolderReport {
    pub folder: FolderPath,
    pub status: FolderEncryptionStatus,
    pub job_status: FolderJobStatus,
    pub capabilities: Capabilities,
}

/// Drives encrypt/decrypt jobs.
pub struct JobController {
    config: EngineConfig,
    store: JobStore,
    folders: FolderRegistry,
    storage: Arc<dyn StorageResolver>,
    transform: Arc<dyn FileTransform>,
    access: Arc<dyn AccessPolicy>,
    fs: Arc<dyn FileSystemWalker>,
}

impl JobController {
    /// Open (creating if needed) the state directory and wire collaborators.
    pub fn new(
        config: EngineConfig,
        storage: Arc<dyn StorageResolver>,
        transform: Arc<dyn FileTransform>,
        access: Arc<dyn AccessPolicy>,
    ) -> Result<Self, JobError> {
        let store = JobStore::open(&config.state_dir)?.with_lock_timeout(config.lock_timeout);
        let folders = FolderRegistry::open(&config.state_dir)?;
        Ok(Self {
            config,
            store,
            folders,
            storage,
            transform,
            access,
            fs: Arc::new(LocalFs),
        })
    }

    /// Replace the filesystem used for directory listings.
    #[must_use]
    pub fn with_filesystem(mut self, fs: Arc<dyn FileSystemWalker>) -> Self {
        self.fs = fs;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn folders(&self) -> &FolderRegistry {
        &self.folders
    }

    fn gate(&self) -> CapabilityGate<'_> {
        CapabilityGate::new(
            self.access.as_ref(),
            self.transform.as_ref(),
            self.storage.as_ref(),
            &self.folders,
        )
    }

    /// Estimate the work a job on `folder` would do. Persists nothing.
    #[instrument(level = "info", name = "job::plan", skip_all, fields(folder = %folder, mode = %mode, actor = %actor.name))]
    pub fn plan(&self, actor: &Actor, folder: &FolderPath, mode: JobMode) -> Result<PlanEstimate, JobError> {
        self.gate().check_manage(actor, folder)?;
        let root = self.storage.resolve(folder)?;

        let estimate = plan::estimate(
            self.fs.as_ref(),
            &self.config.skip_rules,
            &root,
            self.config.plan_entry_limit,
        );
        debug!(
            files = estimate.total_files,
            bytes = estimate.total_bytes,
            truncated = estimate.truncated,
            "Plan complete"
        );
        Ok(estimate)
    }

    /// Create a running job on `folder`.
    ///
    /// Encrypt jobs mark the folder encrypted right away, so new uploads are
    /// encrypted while the sweep catches up with existing files.
    #[instrument(level = "info", name = "job::start", skip_all, fields(folder = %folder, mode = %mode, actor = %actor.name))]
    pub fn start(
        &self,
        actor: &Actor,
        folder: &FolderPath,
        mode: JobMode,
        total_files: u64,
        total_bytes: u64,
    ) -> Result<JobId, JobError> {
        self.gate().authorize_start(actor, folder)?;
        self.storage.resolve(folder)?;

        let flipped = mode == JobMode::Encrypt && !self.folders.status(folder)?.root_encrypted;
        if mode == JobMode::Encrypt {
            self.folders.set_encrypted(folder, true, actor)?;
        }

        let job = Job::new(mode, folder.clone(), actor, total_files, total_bytes);
        if let Err(e) = self.persist_new_job(&job) {
            if flipped && let Err(undo) = self.folders.set_encrypted(folder, false, actor) {
                warn!(folder = %folder, "Failed to clear encrypted flag after failed start: {}", undo);
            }
            return Err(e);
        }

        info!(job = %job.id, "Job started");
        Ok(job.id)
    }

    /// Write the record and the folder marker, or neither.
    fn persist_new_job(&self, job: &Job) -> Result<(), JobError> {
        self.store.create(job)?;

        if let Err(e) = self
            .folders
            .set_job_marker(&job.folder, Some(JobMarker::from_job(job)))
        {
            if let Err(cleanup) = self.store.delete(&job.id) {
                warn!(job = %job.id, "Failed to remove job record after marker failure: {}", cleanup);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Advance a job by at most `max_files` files (default
    /// [`EngineConfig::default_batch`], clamped to `1..=MAX_BATCH`).
    #[instrument(level = "info", name = "job::tick", skip_all, fields(job = %id, actor = %actor.name))]
    pub fn tick(&self, actor: &Actor, id: &JobId, max_files: Option<usize>) -> Result<TickReport, JobError> {
        let batch = max_files
            .unwrap_or(self.config.default_batch)
            .clamp(1, MAX_BATCH);
        self.store.with_lock(id, || self.tick_locked(actor, id, batch))
    }

    fn tick_locked(&self, actor: &Actor, id: &JobId, batch: usize) -> Result<TickReport, JobError> {
        let mut job = match self.store.load(id) {
            Ok(job) => job,
            Err(e @ JobError::NotFound { .. }) => {
                // Unknown or already finished: drop the lock file opened for this call
                self.store.delete(id)?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        self.gate().authorize_continue(actor, &job)?;

        match job.state {
            JobState::Running => {}
            JobState::Done => {
                self.finalize(&job)?;
                return Ok(TickReport::idle(&job, "job already finished"));
            }
            JobState::Error => {
                return Ok(TickReport::idle(&job, "job failed and will not be resumed"));
            }
        }

        let root = self.storage.resolve(&job.folder)?;
        let walker = DirectoryWalker::new(self.fs.as_ref(), &self.config.skip_rules);

        let mut processed_files = 0u64;
        let mut processed_bytes = 0u64;
        let mut failure = None;

        for _ in 0..batch {
            let Some(file) = walker.next(&mut job.walk, &root) else {
                job.state = JobState::Done;
                break;
            };

            match self.transform_file(&file, job.mode) {
                Ok(()) => {
                    processed_files += 1;
                    processed_bytes += file.size;
                    job.done_files += 1;
                    job.done_bytes += file.size;
                }
                Err(e) if e.is_not_found() => {
                    debug!(path = %file.relative, "File vanished before it could be transformed");
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if let Some(e) = failure {
            warn!(job = %job.id, "Job failed: {}", e);
            job.fail(&e.to_string());
        } else {
            if job.state == JobState::Running && walker.is_finished(&job.walk, &root) {
                job.state = JobState::Done;
            }
            job.touch();
        }

        self.store.save(&job)?;
        debug!(
            files = processed_files,
            bytes = processed_bytes,
            done_files = job.done_files,
            state = %job.state,
            "Batch persisted"
        );

        match job.state {
            JobState::Done => self.finalize(&job)?,
            JobState::Error => {
                if let Err(e) = self
                    .folders
                    .set_job_marker(&job.folder, Some(JobMarker::from_job(&job)))
                {
                    warn!(job = %job.id, "Failed to record error marker: {}", e);
                }
            }
            JobState::Running => {}
        }

        Ok(TickReport {
            job: job.snapshot(),
            processed_files,
            processed_bytes,
            note: None,
        })
    }

    fn transform_file(&self, file: &WalkedFile, mode: JobMode) -> Result<(), TransformError> {
        if self.transform.is_in_target_state(&file.absolute, mode)? {
            trace!(path = %file.relative, "Already in target state");
            return Ok(());
        }
        trace!(path = %file.relative, mode = %mode, "Transforming");
        self.transform.apply(&file.absolute, mode)
    }

    /// Wrap up a `done` job. Safe to repeat.
    fn finalize(&self, job: &Job) -> Result<(), JobError> {
        if job.mode == JobMode::Decrypt {
            let starter = Actor::new(job.started_by.clone());
            match self.folders.set_encrypted(&job.folder, false, &starter) {
                Ok(_) => {}
                Err(JobError::Authorization(Denial::Inherited { root })) => {
                    warn!(folder = %job.folder, root = %root, "Folder still inherits encryption after decrypt");
                }
                Err(e) => return Err(e),
            }
        }

        if let Err(e) = self.folders.clear_job_marker(&job.folder, &job.id) {
            warn!(job = %job.id, "Failed to clear job marker: {}", e);
        }
        self.store.delete(&job.id)?;

        info!(
            job = %job.id,
            folder = %job.folder,
            mode = %job.mode,
            files = job.done_files,
            bytes = job.done_bytes,
            "Job finished"
        );
        Ok(())
    }

    /// Redacted view of a job, for its starter or an administrator.
    ///
    /// Failed jobs past the retention period are purged here and reported
    /// as not found.
    #[instrument(level = "debug", name = "job::status", skip_all, fields(job = %id, actor = %actor.name))]
    pub fn status(&self, actor: &Actor, id: &JobId) -> Result<JobSnapshot, JobError> {
        let job = self.store.load(id)?;
        if !job.is_visible_to(actor) {
            return Err(JobError::Authorization(Denial::Forbidden));
        }

        if self.is_expired(&job) {
            self.purge(id)?;
            return Err(JobError::not_found("job", id));
        }

        Ok(job.snapshot())
    }

    fn is_expired(&self, job: &Job) -> bool {
        let retention = TimeDelta::from_std(self.config.error_retention).unwrap_or(TimeDelta::MAX);
        job.state == JobState::Error && Utc::now().signed_duration_since(job.updated_at) > retention
    }

    fn purge(&self, id: &JobId) -> Result<(), JobError> {
        self.store.with_lock(id, || {
            let job = match self.store.load(id) {
                Ok(job) => job,
                Err(JobError::NotFound { .. }) => return self.store.delete(id),
                Err(e) => return Err(e),
            };
            if !self.is_expired(&job) {
                return Ok(());
            }

            if let Err(e) = self.folders.clear_job_marker(&job.folder, &job.id) {
                warn!(job = %job.id, "Failed to clear job marker: {}", e);
            }
            self.store.delete(id)?;
            info!(job = %id, folder = %job.folder, "Purged expired failed job");
            Ok(())
        })
    }

    /// Jobs visible to `actor`, oldest first.
    #[instrument(level = "debug", name = "job::list", skip_all, fields(actor = %actor.name))]
    pub fn list_jobs(&self, actor: &Actor) -> Result<Vec<JobSnapshot>, JobError> {
        let mut jobs: Vec<Job> = self
            .store
            .list()?
            .into_iter()
            .filter(|job| job.is_visible_to(actor))
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(jobs.iter().map(Job::snapshot).collect())
    }

    /// Encryption status, job status and capabilities of a folder.
    #[instrument(level = "debug", name = "folder::describe", skip_all, fields(folder = %folder, actor = %actor.name))]
    pub fn describe_folder(&self, actor: &Actor, folder: &FolderPath) -> Result<FolderReport, JobError> {
        let gate = self.gate();
        // Only callers who may manage the folder learn whether it exists
        if gate.check_manage(actor, folder).is_ok() {
            self.storage.resolve(folder)?;
        }
        Ok(FolderReport {
            folder: folder.clone(),
            status: self.folders.status(folder)?,
            job_status: self.folders.job_status(folder)?,
            capabilities: gate.capabilities(actor, folder)?,
        })
    }
}
