//! The persisted job record and its redacted snapshot.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::JobError;
use crate::folder::FolderPath;
use crate::gate::Actor;
use crate::walker::WalkState;

/// Current on-disk schema version of [`Job`].
pub const JOB_RECORD_VERSION: u32 = 1;

/// Stored error messages are cut to this many characters.
pub const MAX_ERROR_LEN: usize = 1024;

/// Direction of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobMode {
    Encrypt,
    Decrypt,
}

impl JobMode {
    pub fn as_str(self) -> &'static str {
        match self {
            JobMode::Encrypt => "encrypt",
            JobMode::Decrypt => "decrypt",
        }
    }
}

impl fmt::Display for JobMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobMode {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "encrypt" => Ok(JobMode::Encrypt),
            "decrypt" => Ok(JobMode::Decrypt),
            other => Err(JobError::validation(
                "mode",
                format!("expected 'encrypt' or 'decrypt', got {other:?}"),
            )),
        }
    }
}

/// Stored lifecycle state. `Done` and `Error` are terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    #[default]
    Running,
    Done,
    Error,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobState::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Running => "running",
            JobState::Done => "done",
            JobState::Error => "error",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job identifier: a hyphenated UUID.
///
/// Ids are validated on the way in, so they are always safe to use as file
/// names in the job store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(String);

impl JobId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().hyphenated().to_string())
    }

    pub fn parse(raw: &str) -> Result<Self, JobError> {
        Uuid::parse_str(raw.trim())
            .map(|uuid| Self(uuid.hyphenated().to_string()))
            .map_err(|e| JobError::validation("job id", format!("{raw:?}: {e}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for JobId {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for JobId {
    type Error = JobError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<JobId> for String {
    fn from(value: JobId) -> Self {
        value.0
    }
}

fn default_version() -> u32 {
    JOB_RECORD_VERSION
}

/// One encrypt or decrypt sweep over a folder subtree.
///
/// `walk` together with the folder's physical root is everything needed to
/// continue the job; there is no other hidden state. Fields an older or
/// partially written record may lack fall back to their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    #[serde(default = "default_version")]
    pub version: u32,
    pub id: JobId,
    #[serde(rename = "type")]
    pub mode: JobMode,
    pub folder: FolderPath,
    #[serde(default)]
    pub started_by: String,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub state: JobState,
    #[serde(default)]
    pub error: Option<String>,
    /// Advisory estimate supplied at start
    #[serde(default)]
    pub total_files: u64,
    /// Advisory estimate supplied at start
    #[serde(default)]
    pub total_bytes: u64,
    #[serde(default)]
    pub done_files: u64,
    #[serde(default)]
    pub done_bytes: u64,
    #[serde(flatten)]
    pub walk: WalkState,
}

impl Job {
    /// A fresh running job positioned at the folder root.
    pub fn new(
        mode: JobMode,
        folder: FolderPath,
        started_by: &Actor,
        total_files: u64,
        total_bytes: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            version: JOB_RECORD_VERSION,
            id: JobId::generate(),
            mode,
            folder,
            started_by: started_by.name.clone(),
            created_at: now,
            updated_at: now,
            state: JobState::Running,
            error: None,
            total_files,
            total_bytes,
            done_files: 0,
            done_bytes: 0,
            walk: WalkState::new(),
        }
    }

    /// The starter and administrators may see and drive a job.
    pub fn is_visible_to(&self, actor: &Actor) -> bool {
        actor.admin || actor.name == self.started_by
    }

    /// Move to the terminal error state.
    pub fn fail(&mut self, message: &str) {
        self.state = JobState::Error;
        self.error = Some(bound_message(message));
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id.clone(),
            mode: self.mode,
            folder: self.folder.clone(),
            state: self.state,
            error: self.error.clone(),
            total_files: self.total_files,
            total_bytes: self.total_bytes,
            done_files: self.done_files,
            done_bytes: self.done_bytes,
            updated_at: self.updated_at,
        }
    }
}

fn bound_message(message: &str) -> String {
    if message.chars().count() <= MAX_ERROR_LEN {
        message.to_string()
    } else {
        let mut bounded: String = message.chars().take(MAX_ERROR_LEN - 1).collect();
        bounded.push('…');
        bounded
    }
}

/// What callers get to see of a job: no queue, no cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    #[serde(rename = "type")]
    pub mode: JobMode,
    pub folder: FolderPath,
    pub state: JobState,
    pub error: Option<String>,
    pub total_files: u64,
    pub total_bytes: u64,
    pub done_files: u64,
    pub done_bytes: u64,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parse() {
        assert_eq!("encrypt".parse::<JobMode>().unwrap(), JobMode::Encrypt);
        assert_eq!(" Decrypt ".parse::<JobMode>().unwrap(), JobMode::Decrypt);
        assert!(matches!(
            "shred".parse::<JobMode>(),
            Err(JobError::Validation { field: "mode", .. })
        ));
    }

    #[test]
    fn test_job_id_canonicalized() {
        let id = JobId::parse("67E55044-10B1-426F-9247-BB680E5FE0C8").unwrap();
        assert_eq!(id.as_str(), "67e55044-10b1-426f-9247-bb680e5fe0c8");
        assert!(JobId::parse("../../etc/passwd").is_err());
        assert!(JobId::parse("").is_err());
    }

    #[test]
    fn test_new_job_starts_at_root() {
        let job = Job::new(
            JobMode::Encrypt,
            FolderPath::parse("docs").unwrap(),
            &Actor::new("alice"),
            4,
            360,
        );
        assert_eq!(job.state, JobState::Running);
        assert_eq!(job.walk.queue, vec![String::new()]);
        assert!(job.walk.current_dir.is_none());
        assert_eq!(job.done_files, 0);
        assert_eq!(job.started_by, "alice");
    }

    #[test]
    fn test_record_is_flat_json() {
        let job = Job::new(
            JobMode::Decrypt,
            FolderPath::parse("docs").unwrap(),
            &Actor::new("alice"),
            0,
            0,
        );
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["type"], "decrypt");
        assert_eq!(value["state"], "running");
        assert_eq!(value["queue"], serde_json::json!([""]));
        assert_eq!(value["current_dir"], serde_json::Value::Null);
        assert_eq!(value["current_offset"], 0);
    }

    #[test]
    fn test_partial_record_defaults() {
        let json = r#"{
            "id": "67e55044-10b1-426f-9247-bb680e5fe0c8",
            "type": "encrypt",
            "folder": "docs"
        }"#;
        let job: Job = serde_json::from_str(json).unwrap();
        assert_eq!(job.version, JOB_RECORD_VERSION);
        assert_eq!(job.state, JobState::Running);
        assert_eq!(job.done_files, 0);
        assert!(job.walk.queue.is_empty());
        assert!(job.walk.is_exhausted());
        assert_eq!(job.created_at, DateTime::<Utc>::default());
    }

    #[test]
    fn test_fail_bounds_message() {
        let mut job = Job::new(
            JobMode::Encrypt,
            FolderPath::root(),
            &Actor::new("a"),
            0,
            0,
        );
        job.fail(&"x".repeat(5000));
        assert_eq!(job.state, JobState::Error);
        assert_eq!(job.error.as_ref().unwrap().chars().count(), MAX_ERROR_LEN);
    }

    #[test]
    fn test_snapshot_redacts_walk_state() {
        let job = Job::new(
            JobMode::Encrypt,
            FolderPath::root(),
            &Actor::new("a"),
            0,
            0,
        );
        let value = serde_json::to_value(job.snapshot()).unwrap();
        assert!(value.get("queue").is_none());
        assert!(value.get("current_offset").is_none());
        assert_eq!(value["type"], "encrypt");
    }

    #[test]
    fn test_visibility() {
        let job = Job::new(
            JobMode::Encrypt,
            FolderPath::root(),
            &Actor::new("alice"),
            0,
            0,
        );
        assert!(job.is_visible_to(&Actor::new("alice")));
        assert!(job.is_visible_to(&Actor::admin("root")));
        assert!(!job.is_visible_to(&Actor::new("bob")));
    }
}
