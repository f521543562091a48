//! Job record persistence.
//!
//! Each job lives in `<state_dir>/jobs/<id>.json`, next to an empty
//! `<id>.lock` file used only for advisory locking.
//!
//! # Concurrency Safety
//!
//! The record is protected by an exclusive `fs2` lock on the lock file. Use
//! [`JobStore::with_lock`] for every read-modify-write of a record. Plain
//! [`JobStore::load`] is fine for read-only callers that can tolerate a
//! snapshot that is one tick stale.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{JobError, StoreContext};
use crate::job::{Job, JobId};

/// Poll interval while waiting for a lock with a timeout.
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Manages job records and their lock files.
#[derive(Debug, Clone)]
pub struct JobStore {
    jobs_dir: PathBuf,
    lock_timeout: Option<Duration>,
}

impl JobStore {
    /// Open the store below `state_dir`, creating the jobs directory if needed.
    pub fn open(state_dir: &Path) -> Result<Self, JobError> {
        let jobs_dir = state_dir.join("jobs");
        fs::create_dir_all(&jobs_dir).map_err(|e| {
            JobError::persistence(
                e,
                StoreContext::new().with_operation("create").with_path(&jobs_dir),
            )
        })?;
        Ok(Self {
            jobs_dir,
            lock_timeout: None,
        })
    }

    /// Bound how long [`with_lock`](Self::with_lock) waits. `None` blocks
    /// until the lock is free.
    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn jobs_dir(&self) -> &Path {
        &self.jobs_dir
    }

    fn record_path(&self, id: &JobId) -> PathBuf {
        self.jobs_dir.join(format!("{id}.json"))
    }

    fn lock_path(&self, id: &JobId) -> PathBuf {
        self.jobs_dir.join(format!("{id}.lock"))
    }

    /// Persist a brand new record. Fails with `Conflict` if the id exists.
    pub fn create(&self, job: &Job) -> Result<(), JobError> {
        let path = self.record_path(&job.id);
        let temp = write_temp(&self.jobs_dir, job, &path)?;
        temp.persist_noclobber(&path).map_err(|e| {
            if e.error.kind() == io::ErrorKind::AlreadyExists {
                JobError::Conflict(format!("job {} already exists", job.id))
            } else {
                JobError::persistence(
                    e.error,
                    StoreContext::new().with_operation("create").with_path(&path),
                )
            }
        })?;
        debug!(job = %job.id, "Created job record");
        Ok(())
    }

    /// Load a record. Unknown ids are `NotFound`.
    pub fn load(&self, id: &JobId) -> Result<Job, JobError> {
        let path = self.record_path(id);
        match read_json(&path)? {
            Some(job) => Ok(job),
            None => Err(JobError::not_found("job", id)),
        }
    }

    /// Atomically replace a record.
    pub fn save(&self, job: &Job) -> Result<(), JobError> {
        write_json_atomic(&self.record_path(&job.id), job)
    }

    /// Remove a record and its lock file. Missing files are not an error.
    pub fn delete(&self, id: &JobId) -> Result<(), JobError> {
        for path in [self.record_path(id), self.lock_path(id)] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(JobError::persistence(
                        e,
                        StoreContext::new().with_operation("delete").with_path(&path),
                    ));
                }
            }
        }
        debug!(job = %id, "Deleted job record");
        Ok(())
    }

    /// All readable records. Corrupt files are logged and skipped.
    pub fn list(&self) -> Result<Vec<Job>, JobError> {
        let entries = fs::read_dir(&self.jobs_dir).map_err(|e| {
            JobError::persistence(
                e,
                StoreContext::new().with_operation("list").with_path(&self.jobs_dir),
            )
        })?;

        let mut jobs = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_json::<Job>(&path) {
                Ok(Some(job)) => jobs.push(job),
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable job record: {}", e),
            }
        }
        Ok(jobs)
    }

    /// Execute `f` while holding the exclusive lock for `id`.
    ///
    /// The lock is released when `f` returns, whatever it returns. Dropping
    /// the lock file handle also releases it if `f` panics.
    pub fn with_lock<F, R>(&self, id: &JobId, f: F) -> Result<R, JobError>
    where
        F: FnOnce() -> Result<R, JobError>,
    {
        let lock_path = self.lock_path(id);
        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| {
                JobError::persistence(
                    e,
                    StoreContext::new().with_operation("open lock").with_path(&lock_path),
                )
            })?;

        self.acquire(&lock_file, &lock_path)?;
        let result = f();

        if let Err(e) = FileExt::unlock(&lock_file) {
            warn!("Failed to release lock {}: {}", lock_path.display(), e);
        }

        result
    }

    fn acquire(&self, lock_file: &File, lock_path: &Path) -> Result<(), JobError> {
        let lock_error = |e: io::Error| {
            JobError::persistence(
                e,
                StoreContext::new().with_operation("lock").with_path(lock_path),
            )
        };

        let Some(timeout) = self.lock_timeout else {
            return FileExt::lock_exclusive(lock_file).map_err(lock_error);
        };

        let start = Instant::now();
        loop {
            match FileExt::try_lock_exclusive(lock_file) {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock || is_lock_contended(&e) => {
                    if start.elapsed() > timeout {
                        return Err(lock_error(io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!("timed out after {timeout:?} waiting for job lock"),
                        )));
                    }
                    std::thread::sleep(LOCK_POLL_INTERVAL);
                }
                Err(e) => return Err(lock_error(e)),
            }
        }
    }
}

fn is_lock_contended(e: &io::Error) -> bool {
    e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Read and parse a JSON file. A missing file is `Ok(None)`.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, JobError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(JobError::persistence(
                e,
                StoreContext::new().with_operation("read").with_path(path),
            ));
        }
    };

    serde_json::from_str(&contents).map(Some).map_err(|e| {
        JobError::persistence(
            io::Error::new(io::ErrorKind::InvalidData, e),
            StoreContext::new().with_operation("parse").with_path(path),
        )
    })
}

/// Write JSON to a temp file in the target's directory and rename it over
/// the target, so readers never observe a half-written record.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), JobError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let temp = write_temp(dir, value, path)?;
    temp.persist(path).map_err(|e| {
        JobError::persistence(
            e.error,
            StoreContext::new().with_operation("write").with_path(path),
        )
    })?;
    Ok(())
}

fn write_temp<T: Serialize>(dir: &Path, value: &T, target: &Path) -> Result<NamedTempFile, JobError> {
    let context = || StoreContext::new().with_operation("write").with_path(target);
    let contents = serde_json::to_vec_pretty(value)
        .map_err(|e| JobError::persistence(io::Error::new(io::ErrorKind::InvalidData, e), context()))?;

    let mut temp = NamedTempFile::new_in(dir).map_err(|e| JobError::persistence(e, context()))?;
    temp.write_all(&contents)
        .and_then(|()| temp.as_file().sync_all())
        .map_err(|e| JobError::persistence(e, context()))?;
    Ok(temp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::folder::FolderPath;
    use crate::gate::Actor;
    use crate::job::{JobMode, JobState};

    fn sample_job() -> Job {
        Job::new(
            JobMode::Encrypt,
            FolderPath::parse("docs").unwrap(),
            &Actor::new("alice"),
            4,
            360,
        )
    }

    #[test]
    fn test_create_load_save() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = JobStore::open(temp.path()).unwrap();
        let mut job = sample_job();

        store.create(&job).unwrap();
        assert_eq!(store.load(&job.id).unwrap(), job);

        job.done_files = 2;
        job.walk.current_dir = Some(String::new());
        job.walk.current_offset = 2;
        store.save(&job).unwrap();
        assert_eq!(store.load(&job.id).unwrap(), job);
    }

    #[test]
    fn test_create_twice_conflicts() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = JobStore::open(temp.path()).unwrap();
        let job = sample_job();

        store.create(&job).unwrap();
        assert!(matches!(store.create(&job), Err(JobError::Conflict(_))));
    }

    #[test]
    fn test_load_missing_is_not_found() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = JobStore::open(temp.path()).unwrap();
        let err = store.load(&JobId::generate()).unwrap_err();
        assert!(matches!(err, JobError::NotFound { what: "job", .. }));
    }

    #[test]
    fn test_corrupt_record_is_persistence_error() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = JobStore::open(temp.path()).unwrap();
        let id = JobId::generate();
        fs::write(store.jobs_dir().join(format!("{id}.json")), b"{ not json").unwrap();

        assert!(matches!(store.load(&id), Err(JobError::Persistence { .. })));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_delete_removes_record_and_lock() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = JobStore::open(temp.path()).unwrap();
        let job = sample_job();
        store.create(&job).unwrap();
        store.with_lock(&job.id, || Ok(())).unwrap();
        assert!(store.lock_path(&job.id).exists());

        store.delete(&job.id).unwrap();
        assert!(!store.record_path(&job.id).exists());
        assert!(!store.lock_path(&job.id).exists());
        // Idempotent
        store.delete(&job.id).unwrap();
    }

    #[test]
    fn test_with_lock_releases_on_error() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = JobStore::open(temp.path())
            .unwrap()
            .with_lock_timeout(Some(Duration::from_millis(200)));
        let id = JobId::generate();

        let result: Result<(), JobError> =
            store.with_lock(&id, || Err(JobError::Conflict("boom".into())));
        assert!(result.is_err());

        // A second acquisition succeeds well within the timeout
        store.with_lock(&id, || Ok(())).unwrap();
    }

    #[test]
    fn test_lock_timeout_when_held() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = JobStore::open(temp.path())
            .unwrap()
            .with_lock_timeout(Some(Duration::from_millis(100)));
        let id = JobId::generate();

        let inner = store.clone();
        let err = store
            .with_lock(&id, || inner.with_lock(&id, || Ok(())))
            .unwrap_err();
        assert!(matches!(err, JobError::Persistence { .. }));
    }

    #[test]
    fn test_list_returns_all_jobs() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = JobStore::open(temp.path()).unwrap();
        let mut a = sample_job();
        a.state = JobState::Error;
        let b = sample_job();
        store.create(&a).unwrap();
        store.create(&b).unwrap();

        let mut ids: Vec<JobId> = store.list().unwrap().into_iter().map(|j| j.id).collect();
        ids.sort();
        let mut expected = vec![a.id, b.id];
        expected.sort();
        assert_eq!(ids, expected);
    }
}
