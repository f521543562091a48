//! Shared fixtures for the engine integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sweepcrypt_core::{
    Actor, AeadFileTransform, EngineConfig, FileTransform, FolderPath, JobController, JobError,
    JobMode, LocalStorage, StaticAccessPolicy, StorageResolver, TransformError,
};
use tempfile::TempDir;

pub fn folder(s: &str) -> FolderPath {
    FolderPath::parse(s).unwrap()
}

pub fn alice() -> Actor {
    Actor::new("alice")
}

pub fn admin() -> Actor {
    Actor::admin("root")
}

pub fn policy() -> StaticAccessPolicy {
    StaticAccessPolicy::new().with_manager(folder("docs"), "alice")
}

/// Real files on disk, real AES-GCM transform.
pub struct DiskFixture {
    pub temp: TempDir,
    pub controller: JobController,
}

impl DiskFixture {
    pub fn new() -> Self {
        Self::with(|config| config, |t| t)
    }

    /// Build with a tweaked config and a wrapped transform.
    pub fn with(
        configure: impl FnOnce(EngineConfig) -> EngineConfig,
        wrap: impl FnOnce(Arc<dyn FileTransform>) -> Arc<dyn FileTransform>,
    ) -> Self {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("files")).unwrap();

        let transform: Arc<dyn FileTransform> = Arc::new(AeadFileTransform::new([9u8; 32]));
        let controller = JobController::new(
            configure(EngineConfig::new(temp.path().join("state"))),
            Arc::new(LocalStorage::new(temp.path().join("files"))),
            wrap(transform),
            Arc::new(policy()),
        )
        .unwrap();

        Self { temp, controller }
    }

    pub fn root(&self) -> PathBuf {
        self.temp.path().join("files")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.temp.path().join("state")
    }

    pub fn write(&self, relative: &str, len: usize) {
        let path = self.root().join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, vec![b'x'; len]).unwrap();
    }

    pub fn read(&self, relative: &str) -> Vec<u8> {
        fs::read(self.root().join(relative)).unwrap()
    }

    pub fn is_encrypted(&self, relative: &str) -> bool {
        self.read(relative).starts_with(b"SWPCRYP1")
    }

    /// `docs/{a,b,c}` plus `docs/sub/d`: 4 files, 360 bytes.
    pub fn scenario_tree(&self) {
        self.write("docs/a", 100);
        self.write("docs/b", 200);
        self.write("docs/c", 50);
        self.write("docs/sub/d", 10);
    }
}

/// Fails on any file with the given name, delegating everything else.
pub struct FailingTransform {
    pub inner: Arc<dyn FileTransform>,
    pub fail_name: String,
}

impl FileTransform for FailingTransform {
    fn is_available(&self) -> bool {
        self.inner.is_available()
    }

    fn is_in_target_state(&self, path: &Path, mode: JobMode) -> Result<bool, TransformError> {
        self.inner.is_in_target_state(path, mode)
    }

    fn apply(&self, path: &Path, mode: JobMode) -> Result<(), TransformError> {
        if path.file_name().and_then(|n| n.to_str()) == Some(self.fail_name.as_str()) {
            return Err(TransformError::Decrypt {
                path: path.to_path_buf(),
                reason: "injected failure".to_string(),
            });
        }
        self.inner.apply(path, mode)
    }
}

/// In-memory transform that records every visit and watches for overlap.
#[derive(Default)]
pub struct RecordingTransform {
    encrypted: Mutex<HashSet<PathBuf>>,
    visits: Mutex<Vec<PathBuf>>,
    applied: Mutex<HashMap<PathBuf, usize>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub delay: Option<Duration>,
}

impl RecordingTransform {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn visits(&self) -> Vec<PathBuf> {
        self.visits.lock().unwrap().clone()
    }

    pub fn applied_counts(&self) -> HashMap<PathBuf, usize> {
        self.applied.lock().unwrap().clone()
    }
}

impl FileTransform for RecordingTransform {
    fn is_available(&self) -> bool {
        true
    }

    fn is_in_target_state(&self, path: &Path, mode: JobMode) -> Result<bool, TransformError> {
        self.visits.lock().unwrap().push(path.to_path_buf());
        let encrypted = self.encrypted.lock().unwrap().contains(path);
        Ok(encrypted == (mode == JobMode::Encrypt))
    }

    fn apply(&self, path: &Path, mode: JobMode) -> Result<(), TransformError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        *self
            .applied
            .lock()
            .unwrap()
            .entry(path.to_path_buf())
            .or_default() += 1;
        let mut encrypted = self.encrypted.lock().unwrap();
        match mode {
            JobMode::Encrypt => encrypted.insert(path.to_path_buf()),
            JobMode::Decrypt => encrypted.remove(path),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Resolves every folder below a fixed in-memory root.
pub struct MemoryStorage(pub PathBuf);

impl StorageResolver for MemoryStorage {
    fn resolve(&self, folder: &FolderPath) -> Result<PathBuf, JobError> {
        Ok(folder.join_to(&self.0))
    }

    fn is_local(&self, _folder: &FolderPath) -> bool {
        true
    }
}
