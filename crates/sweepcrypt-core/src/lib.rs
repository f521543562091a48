//! Resumable folder encryption-at-rest job engine.
//!
//! A job bulk-encrypts or bulk-decrypts every regular file below a folder.
//! There is no background worker: callers drive a job forward with repeated
//! [`JobController::tick`] calls, each of which processes a small bounded
//! batch and persists the walk position before returning.
//!
//! # Components
//!
//! - [`walker::DirectoryWalker`] - resumable pre-order traversal over a plain
//!   data [`walker::WalkState`]
//! - [`store::JobStore`] - one JSON record and one lock file per job
//! - [`marker::FolderRegistry`] - per-folder encryption flag and active-job pointer
//! - [`gate::CapabilityGate`] - may this actor start or continue a job here
//! - [`controller::JobController`] - Plan, Start, Tick, Status
//! - [`transform::FileTransform`] - the per-file encrypt/decrypt primitive
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use sweepcrypt_core::{
//!     Actor, AeadFileTransform, EngineConfig, FolderPath, JobController, JobMode,
//!     LocalStorage, StaticAccessPolicy,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let controller = JobController::new(
//!     EngineConfig::new("/var/lib/sweepcrypt"),
//!     Arc::new(LocalStorage::new("/srv/files")),
//!     Arc::new(AeadFileTransform::from_key_file(Path::new("/etc/sweepcrypt/master.key"))?),
//!     Arc::new(StaticAccessPolicy::default()),
//! )?;
//!
//! let admin = Actor::admin("root");
//! let folder = FolderPath::parse("docs")?;
//! let plan = controller.plan(&admin, &folder, JobMode::Encrypt)?;
//! let id = controller.start(&admin, &folder, JobMode::Encrypt, plan.total_files, plan.total_bytes)?;
//! loop {
//!     let report = controller.tick(&admin, &id, None)?;
//!     if report.job.state.is_terminal() {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod controller;
pub mod error;
pub mod folder;
pub mod gate;
pub mod job;
pub mod marker;
pub mod plan;
pub mod store;
pub mod transform;
pub mod walker;

pub use controller::{
    EngineConfig, FolderReport, JobController, TickReport, DEFAULT_BATCH, DEFAULT_ERROR_RETENTION,
    DEFAULT_PLAN_ENTRY_LIMIT, MAX_BATCH,
};
pub use error::{JobError, StoreContext};
pub use folder::{FolderPath, LocalStorage, StorageResolver};
pub use gate::{
    AccessPolicy, Actor, CapabilityGate, Capabilities, Denial, FolderPermissions,
    StaticAccessPolicy,
};
pub use job::{Job, JobId, JobMode, JobSnapshot, JobState};
pub use marker::{FolderEncryptionStatus, FolderJobStatus, FolderMeta, FolderRegistry, JobMarker};
pub use plan::PlanEstimate;
pub use store::JobStore;
pub use transform::{AeadFileTransform, FileTransform, TransformError};
pub use walker::{
    DirectoryWalker, EntryKind, FileSystemWalker, FsEntry, LocalFs, MemoryFs, SkipRules,
    WalkState, WalkedFile,
};
