//! Capability checks for starting and continuing jobs.
//!
//! Permissions are recomputed on every Start and every Tick, so revoking a
//! user's access or removing the master key stops a running job instead of
//! only blocking new ones.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::JobError;
use crate::folder::{FolderPath, StorageResolver};
use crate::job::{Job, JobId, JobMode};
use crate::marker::FolderRegistry;
use crate::transform::FileTransform;

/// Who is making the call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub name: String,
    #[serde(default)]
    pub admin: bool,
}

impl Actor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            admin: false,
        }
    }

    pub fn admin(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            admin: true,
        }
    }
}

/// Answers from the external ACL evaluator for one folder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FolderPermissions {
    pub manage: bool,
    pub owner: bool,
}

/// External capability/ACL evaluator.
pub trait AccessPolicy: Send + Sync {
    fn permissions(&self, actor: &Actor, folder: &FolderPath) -> FolderPermissions;
}

/// Access policy backed by a fixed table of folder managers.
///
/// A user listed for a folder manages that folder and everything below it.
#[derive(Debug, Clone, Default)]
pub struct StaticAccessPolicy {
    managers: BTreeMap<FolderPath, BTreeSet<String>>,
}

impl StaticAccessPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_manager(mut self, folder: FolderPath, user: impl Into<String>) -> Self {
        self.managers.entry(folder).or_default().insert(user.into());
        self
    }
}

impl AccessPolicy for StaticAccessPolicy {
    fn permissions(&self, actor: &Actor, folder: &FolderPath) -> FolderPermissions {
        let manage = folder.ancestors().any(|f| {
            self.managers
                .get(&f)
                .is_some_and(|users| users.contains(&actor.name))
        });
        FolderPermissions {
            manage,
            owner: false,
        }
    }
}

/// Why an operation was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Denial {
    #[error("{actor} may not manage folder {folder}")]
    NotPermitted { actor: String, folder: FolderPath },

    #[error("only administrators may transform the storage root")]
    RootRequiresAdmin,

    #[error("forbidden")]
    Forbidden,

    #[error("encryption is not available: no master key configured")]
    EncryptionUnavailable,

    #[error("folder {0} is not on local storage")]
    StorageNotLocal(FolderPath),

    #[error("folder inherits encryption from {root}")]
    Inherited { root: FolderPath },

    #[error("job {job} is already active on {root}")]
    JobActive { root: FolderPath, job: JobId },
}

/// What the gate allows on a folder right now.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub can_encrypt: bool,
    pub can_decrypt: bool,
    /// First failed requirement, if any
    #[serde(serialize_with = "serialize_denial")]
    pub denial: Option<Denial>,
}

fn serialize_denial<S: serde::Serializer>(denial: &Option<Denial>, s: S) -> Result<S::Ok, S::Error> {
    match denial {
        Some(d) => s.serialize_some(&d.to_string()),
        None => s.serialize_none(),
    }
}

/// Combines folder permissions, subsystem availability and folder status.
pub struct CapabilityGate<'a> {
    access: &'a dyn AccessPolicy,
    transform: &'a dyn FileTransform,
    storage: &'a dyn StorageResolver,
    folders: &'a FolderRegistry,
}

impl<'a> CapabilityGate<'a> {
    pub fn new(
        access: &'a dyn AccessPolicy,
        transform: &'a dyn FileTransform,
        storage: &'a dyn StorageResolver,
        folders: &'a FolderRegistry,
    ) -> Self {
        Self {
            access,
            transform,
            storage,
            folders,
        }
    }

    /// Admin, or manage/ownership on the folder. The root is admin-only.
    pub fn check_manage(&self, actor: &Actor, folder: &FolderPath) -> Result<(), Denial> {
        if actor.admin {
            return Ok(());
        }
        if folder.is_root() {
            return Err(Denial::RootRequiresAdmin);
        }
        let perms = self.access.permissions(actor, folder);
        if perms.manage || perms.owner {
            Ok(())
        } else {
            Err(Denial::NotPermitted {
                actor: actor.name.clone(),
                folder: folder.clone(),
            })
        }
    }

    /// Master key configured and the folder on local storage.
    pub fn check_available(&self, folder: &FolderPath) -> Result<(), Denial> {
        if !self.transform.is_available() {
            return Err(Denial::EncryptionUnavailable);
        }
        if !self.storage.is_local(folder) {
            return Err(Denial::StorageNotLocal(folder.clone()));
        }
        Ok(())
    }

    /// Evaluate every requirement in order, stopping at the first denial.
    ///
    /// `own_job` is excluded from the active-job check, so a running job
    /// does not block itself.
    fn evaluate(
        &self,
        actor: &Actor,
        folder: &FolderPath,
        own_job: Option<&JobId>,
    ) -> Result<Result<(), Denial>, JobError> {
        if let Err(denial) = self.check_manage(actor, folder) {
            return Ok(Err(denial));
        }
        if let Err(denial) = self.check_available(folder) {
            return Ok(Err(denial));
        }

        let jobs = self.folders.job_status(folder)?;
        if let (true, Some(marker), Some(root)) = (jobs.active, jobs.job, jobs.root)
            && own_job != Some(&marker.id)
        {
            return Ok(Err(Denial::JobActive {
                root,
                job: marker.id,
            }));
        }

        let status = self.folders.status(folder)?;
        if status.inherited {
            return Ok(Err(Denial::Inherited {
                root: status.root.unwrap_or_default(),
            }));
        }

        Ok(Ok(()))
    }

    /// The capability set shown to a user for a folder.
    pub fn capabilities(&self, actor: &Actor, folder: &FolderPath) -> Result<Capabilities, JobError> {
        let outcome = self.evaluate(actor, folder, None)?;
        let allowed = outcome.is_ok();
        Ok(Capabilities {
            can_encrypt: allowed,
            can_decrypt: allowed,
            denial: outcome.err(),
        })
    }

    /// Gate for Start. An active job on the chain is a `Conflict`, any other
    /// failed requirement an `Authorization` error.
    pub fn authorize_start(&self, actor: &Actor, folder: &FolderPath) -> Result<(), JobError> {
        match self.evaluate(actor, folder, None)? {
            Ok(()) => Ok(()),
            Err(denial @ Denial::JobActive { .. }) => Err(JobError::Conflict(denial.to_string())),
            Err(denial) => Err(JobError::Authorization(denial)),
        }
    }

    /// Gate for Tick.
    ///
    /// Encrypt jobs must still pass the full check, ignoring their own
    /// marker. Decrypt jobs only re-check management and availability: the
    /// folder is still marked encrypted and busy while they run.
    pub fn authorize_continue(&self, actor: &Actor, job: &Job) -> Result<(), JobError> {
        if !job.is_visible_to(actor) {
            return Err(JobError::Authorization(Denial::Forbidden));
        }

        let outcome = match job.mode {
            JobMode::Encrypt => self.evaluate(actor, &job.folder, Some(&job.id))?,
            JobMode::Decrypt => self
                .check_manage(actor, &job.folder)
                .and_then(|()| self.check_available(&job.folder)),
        };
        outcome.map_err(JobError::Authorization)
    }
}
