//! Per-folder encryption markers.
//!
//! Every folder may carry a small metadata record with two things in it: its
//! own `encrypted` flag, and a [`JobMarker`] pointing at the job currently (or
//! most recently) working on it. Effective status is computed by walking the
//! ancestor chain, so marking `docs` encrypted protects `docs/sub` as well.
//!
//! Records live in `<state_dir>/folders/<sha256(folder)>.json`. The marker is
//! advisory: a lost or stale marker only means a job is harder to discover,
//! the job record itself stays authoritative.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{JobError, StoreContext};
use crate::folder::FolderPath;
use crate::gate::{Actor, Denial};
use crate::job::{Job, JobId, JobMode, JobState};
use crate::store::{read_json, write_json_atomic};

/// Current on-disk schema version of [`FolderMeta`].
pub const FOLDER_RECORD_VERSION: u32 = 1;

/// Cheap pointer from a folder to the job working on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMarker {
    pub id: JobId,
    #[serde(rename = "type")]
    pub mode: JobMode,
    #[serde(default)]
    pub state: JobState,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub started_at: DateTime<Utc>,
}

impl JobMarker {
    pub fn from_job(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            mode: job.mode,
            state: job.state,
            error: job.error.clone(),
            started_at: job.created_at,
        }
    }

    /// Only running jobs block other work on the subtree.
    pub fn is_active(&self) -> bool {
        self.state == JobState::Running
    }
}

fn default_version() -> u32 {
    FOLDER_RECORD_VERSION
}

/// The metadata record stored for one folder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderMeta {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub folder: FolderPath,
    #[serde(default)]
    pub encrypted: bool,
    #[serde(default)]
    pub changed_by: Option<String>,
    #[serde(default)]
    pub changed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub job: Option<JobMarker>,
}

impl FolderMeta {
    fn empty(folder: &FolderPath) -> Self {
        Self {
            version: FOLDER_RECORD_VERSION,
            folder: folder.clone(),
            ..Self::default()
        }
    }

    fn is_blank(&self) -> bool {
        !self.encrypted && self.job.is_none()
    }
}

/// Effective encryption status of a folder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderEncryptionStatus {
    /// The folder or one of its ancestors is marked encrypted
    pub encrypted: bool,
    /// The folder's own marker is set
    pub root_encrypted: bool,
    /// A strict ancestor is marked encrypted
    pub inherited: bool,
    /// Folder owning the governing marker
    pub root: Option<FolderPath>,
}

/// Job discoverability for a folder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderJobStatus {
    /// A running job covers this folder
    pub active: bool,
    /// Folder the job was started on
    pub root: Option<FolderPath>,
    pub job: Option<JobMarker>,
}

/// Reads and writes folder metadata records.
#[derive(Debug, Clone)]
pub struct FolderRegistry {
    folders_dir: PathBuf,
}

impl FolderRegistry {
    /// Open the registry below `state_dir`, creating its directory if needed.
    pub fn open(state_dir: &Path) -> Result<Self, JobError> {
        let folders_dir = state_dir.join("folders");
        fs::create_dir_all(&folders_dir).map_err(|e| {
            JobError::persistence(
                e,
                StoreContext::new().with_operation("create").with_path(&folders_dir),
            )
        })?;
        Ok(Self { folders_dir })
    }

    fn record_path(&self, folder: &FolderPath) -> PathBuf {
        let digest = Sha256::digest(folder.as_str().as_bytes());
        self.folders_dir.join(format!("{}.json", hex::encode(digest)))
    }

    /// Load a folder's own record. Absent or unreadable records are blank.
    pub fn load(&self, folder: &FolderPath) -> Result<FolderMeta, JobError> {
        match read_json::<FolderMeta>(&self.record_path(folder)) {
            Ok(Some(mut meta)) => {
                meta.folder = folder.clone();
                Ok(meta)
            }
            Ok(None) => Ok(FolderMeta::empty(folder)),
            Err(JobError::Persistence { source, context })
                if source.kind() == io::ErrorKind::InvalidData =>
            {
                warn!("Ignoring corrupt folder record ({}): {}", context, source);
                Ok(FolderMeta::empty(folder))
            }
            Err(e) => Err(e),
        }
    }

    fn store(&self, meta: &FolderMeta) -> Result<(), JobError> {
        let path = self.record_path(&meta.folder);
        if meta.is_blank() {
            return match fs::remove_file(&path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(JobError::persistence(
                    e,
                    StoreContext::new().with_operation("delete").with_path(&path),
                )),
            };
        }
        write_json_atomic(&path, meta)
    }

    /// Effective encryption status, taking ancestors into account.
    ///
    /// `root` is the nearest encrypted strict ancestor when the status is
    /// inherited, otherwise the folder itself if its own marker is set.
    pub fn status(&self, folder: &FolderPath) -> Result<FolderEncryptionStatus, JobError> {
        let root_encrypted = self.load(folder)?.encrypted;

        let mut inherited_from = None;
        for ancestor in folder.ancestors().skip(1) {
            if self.load(&ancestor)?.encrypted {
                inherited_from = Some(ancestor);
                break;
            }
        }

        let inherited = inherited_from.is_some();
        let root = inherited_from.or_else(|| root_encrypted.then(|| folder.clone()));
        Ok(FolderEncryptionStatus {
            encrypted: root_encrypted || inherited,
            root_encrypted,
            inherited,
            root,
        })
    }

    /// Find the nearest running job on the folder or any ancestor.
    ///
    /// When nothing is running, the folder's own marker (for example a failed
    /// job) is still reported with `active = false`.
    pub fn job_status(&self, folder: &FolderPath) -> Result<FolderJobStatus, JobError> {
        let own = self.load(folder)?.job;

        for ancestor in folder.ancestors() {
            let marker = if ancestor == *folder {
                own.clone()
            } else {
                self.load(&ancestor)?.job
            };
            if let Some(marker) = marker.filter(JobMarker::is_active) {
                return Ok(FolderJobStatus {
                    active: true,
                    root: Some(ancestor),
                    job: Some(marker),
                });
            }
        }

        Ok(FolderJobStatus {
            active: false,
            root: own.as_ref().map(|_| folder.clone()),
            job: own,
        })
    }

    /// Set or clear a folder's own encrypted flag.
    ///
    /// A folder whose status comes from an ancestor cannot be toggled.
    pub fn set_encrypted(
        &self,
        folder: &FolderPath,
        encrypted: bool,
        actor: &Actor,
    ) -> Result<FolderEncryptionStatus, JobError> {
        let status = self.status(folder)?;
        if status.inherited {
            return Err(JobError::Authorization(Denial::Inherited {
                root: status.root.unwrap_or_default(),
            }));
        }

        let mut meta = self.load(folder)?;
        if meta.encrypted != encrypted {
            meta.encrypted = encrypted;
            meta.changed_by = Some(actor.name.clone());
            meta.changed_at = Some(Utc::now());
            self.store(&meta)?;
            debug!(folder = %folder, encrypted, actor = %actor.name, "Folder marker changed");
        }

        Ok(FolderEncryptionStatus {
            encrypted,
            root_encrypted: encrypted,
            inherited: false,
            root: encrypted.then(|| folder.clone()),
        })
    }

    /// Replace the folder's job marker.
    pub fn set_job_marker(&self, folder: &FolderPath, marker: Option<JobMarker>) -> Result<(), JobError> {
        let mut meta = self.load(folder)?;
        meta.job = marker;
        self.store(&meta)
    }

    /// Clear the folder's job marker if it still points at `id`.
    ///
    /// Returns whether a marker was removed.
    pub fn clear_job_marker(&self, folder: &FolderPath, id: &JobId) -> Result<bool, JobError> {
        let mut meta = self.load(folder)?;
        if meta.job.as_ref().is_some_and(|m| m.id == *id) {
            meta.job = None;
            self.store(&meta)?;
            return Ok(true);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folder(s: &str) -> FolderPath {
        FolderPath::parse(s).unwrap()
    }

    fn registry() -> (tempfile::TempDir, FolderRegistry) {
        let temp = tempfile::TempDir::new().unwrap();
        let registry = FolderRegistry::open(temp.path()).unwrap();
        (temp, registry)
    }

    fn running_marker(mode: JobMode) -> JobMarker {
        JobMarker {
            id: JobId::generate(),
            mode,
            state: JobState::Running,
            error: None,
            started_at: Utc::now(),
        }
    }

    #[test]
    fn test_unmarked_folder() {
        let (_temp, reg) = registry();
        let status = reg.status(&folder("docs")).unwrap();
        assert_eq!(status, FolderEncryptionStatus::default());
    }

    #[test]
    fn test_own_marker() {
        let (_temp, reg) = registry();
        let actor = Actor::new("alice");
        reg.set_encrypted(&folder("docs"), true, &actor).unwrap();

        let status = reg.status(&folder("docs")).unwrap();
        assert!(status.encrypted);
        assert!(status.root_encrypted);
        assert!(!status.inherited);
        assert_eq!(status.root, Some(folder("docs")));

        let meta = reg.load(&folder("docs")).unwrap();
        assert_eq!(meta.changed_by.as_deref(), Some("alice"));
    }

    #[test]
    fn test_inherited_from_ancestor() {
        let (_temp, reg) = registry();
        reg.set_encrypted(&folder("docs"), true, &Actor::new("a")).unwrap();

        let status = reg.status(&folder("docs/sub/deep")).unwrap();
        assert!(status.encrypted);
        assert!(!status.root_encrypted);
        assert!(status.inherited);
        assert_eq!(status.root, Some(folder("docs")));
    }

    #[test]
    fn test_own_marker_ignored_for_inherited() {
        let (_temp, reg) = registry();
        let actor = Actor::new("a");
        reg.set_encrypted(&folder("docs/sub"), true, &actor).unwrap();
        reg.set_encrypted(&folder("docs"), true, &actor).unwrap();

        let status = reg.status(&folder("docs/sub")).unwrap();
        assert!(status.inherited);
        assert!(status.root_encrypted);
        assert_eq!(status.root, Some(folder("docs")));
    }

    #[test]
    fn test_cannot_toggle_inherited() {
        let (_temp, reg) = registry();
        let actor = Actor::new("a");
        reg.set_encrypted(&folder("docs"), true, &actor).unwrap();

        let err = reg.set_encrypted(&folder("docs/sub"), false, &actor).unwrap_err();
        assert!(matches!(
            err,
            JobError::Authorization(Denial::Inherited { ref root }) if *root == folder("docs")
        ));
    }

    #[test]
    fn test_clearing_removes_record() {
        let (temp, reg) = registry();
        let actor = Actor::new("a");
        reg.set_encrypted(&folder("docs"), true, &actor).unwrap();
        reg.set_encrypted(&folder("docs"), false, &actor).unwrap();

        let count = fs::read_dir(temp.path().join("folders")).unwrap().count();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_job_status_walks_ancestors() {
        let (_temp, reg) = registry();
        let marker = running_marker(JobMode::Encrypt);
        reg.set_job_marker(&folder("docs"), Some(marker.clone())).unwrap();

        let status = reg.job_status(&folder("docs/sub")).unwrap();
        assert!(status.active);
        assert_eq!(status.root, Some(folder("docs")));
        assert_eq!(status.job, Some(marker));

        let unrelated = reg.job_status(&folder("music")).unwrap();
        assert!(!unrelated.active);
        assert!(unrelated.job.is_none());
    }

    #[test]
    fn test_error_marker_is_not_active() {
        let (_temp, reg) = registry();
        let mut marker = running_marker(JobMode::Decrypt);
        marker.state = JobState::Error;
        marker.error = Some("disk full".into());
        reg.set_job_marker(&folder("docs"), Some(marker.clone())).unwrap();

        let status = reg.job_status(&folder("docs")).unwrap();
        assert!(!status.active);
        assert_eq!(status.job, Some(marker));
        assert!(!reg.job_status(&folder("docs/sub")).unwrap().active);
    }

    #[test]
    fn test_clear_job_marker_only_for_matching_id() {
        let (_temp, reg) = registry();
        let marker = running_marker(JobMode::Encrypt);
        reg.set_job_marker(&folder("docs"), Some(marker.clone())).unwrap();

        assert!(!reg.clear_job_marker(&folder("docs"), &JobId::generate()).unwrap());
        assert!(reg.clear_job_marker(&folder("docs"), &marker.id).unwrap());
        assert!(reg.load(&folder("docs")).unwrap().job.is_none());
    }

    #[test]
    fn test_corrupt_record_reads_blank() {
        let (_temp, reg) = registry();
        fs::write(reg.record_path(&folder("docs")), b"garbage").unwrap();
        assert!(!reg.status(&folder("docs")).unwrap().encrypted);
    }
}
