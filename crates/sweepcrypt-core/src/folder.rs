//! Folder identifiers and the storage resolver seam.
//!
//! Folders are addressed by a normalized, `/`-separated path relative to the
//! storage root. The empty path is the root itself. Ancestry is purely
//! lexical: the parent of `docs/sub` is `docs`, whose parent is the root.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::JobError;

/// A validated folder path relative to the storage root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FolderPath(String);

impl FolderPath {
    /// The storage root.
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Parse and normalize a folder path.
    ///
    /// Leading and trailing slashes are ignored, so `/docs/`, `docs` and
    /// `docs/` all name the same folder. Empty components, `.`, `..`,
    /// backslashes and NUL bytes are rejected.
    pub fn parse(raw: &str) -> Result<Self, JobError> {
        let trimmed = raw.trim().trim_matches('/');
        if trimmed.is_empty() {
            return Ok(Self::root());
        }

        for component in trimmed.split('/') {
            let reason = match component {
                "" => Some("empty path component"),
                "." | ".." => Some("relative components are not allowed"),
                c if c.contains('\0') => Some("NUL byte in path"),
                c if c.contains('\\') => Some("backslash in path"),
                _ => None,
            };
            if let Some(reason) = reason {
                return Err(JobError::validation("folder", format!("{reason}: {raw:?}")));
            }
        }

        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// The parent folder, or `None` for the root.
    pub fn parent(&self) -> Option<FolderPath> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => Some(Self::root()),
        }
    }

    /// Iterate from this folder up to and including the root.
    pub fn ancestors(&self) -> Ancestors {
        Ancestors {
            next: Some(self.clone()),
        }
    }

    /// Map this folder onto a physical base directory.
    pub fn join_to(&self, base: &Path) -> PathBuf {
        if self.is_root() {
            base.to_path_buf()
        } else {
            self.0.split('/').fold(base.to_path_buf(), |acc, c| acc.join(c))
        }
    }
}

impl fmt::Display for FolderPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0)
    }
}

impl TryFrom<String> for FolderPath {
    type Error = JobError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<FolderPath> for String {
    fn from(value: FolderPath) -> Self {
        value.0
    }
}

/// Iterator over a folder and its ancestors, nearest first.
#[derive(Debug, Clone)]
pub struct Ancestors {
    next: Option<FolderPath>,
}

impl Iterator for Ancestors {
    type Item = FolderPath;

    fn next(&mut self) -> Option<FolderPath> {
        let current = self.next.take()?;
        self.next = current.parent();
        Some(current)
    }
}

/// Resolves logical folders to physical directories.
///
/// Multi-backend storage lives outside this crate; the engine only needs to
/// know where a folder is on disk and whether in-place encryption is possible
/// there at all.
pub trait StorageResolver: Send + Sync {
    /// Physical root directory of `folder`. Unknown folders are `NotFound`.
    fn resolve(&self, folder: &FolderPath) -> Result<PathBuf, JobError>;

    /// Whether `folder` lives on local storage.
    fn is_local(&self, folder: &FolderPath) -> bool;
}

/// A single local directory tree.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl StorageResolver for LocalStorage {
    fn resolve(&self, folder: &FolderPath) -> Result<PathBuf, JobError> {
        let path = folder.join_to(&self.root);
        // symlink_metadata: a symlinked folder is never a valid job root
        match std::fs::symlink_metadata(&path) {
            Ok(meta) if meta.is_dir() => Ok(path),
            _ => Err(JobError::not_found("folder", folder)),
        }
    }

    fn is_local(&self, _folder: &FolderPath) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_normalizes_slashes() {
        assert_eq!(FolderPath::parse("/docs/sub/").unwrap().as_str(), "docs/sub");
        assert_eq!(FolderPath::parse("docs").unwrap().as_str(), "docs");
        assert!(FolderPath::parse("/").unwrap().is_root());
        assert!(FolderPath::parse("").unwrap().is_root());
    }

    #[test]
    fn test_parse_rejects_traversal() {
        for bad in ["../etc", "docs/../x", "docs/./x", "a//b", "a\\b", "a\0b"] {
            let err = FolderPath::parse(bad).unwrap_err();
            assert!(matches!(err, JobError::Validation { field: "folder", .. }), "{bad}");
        }
    }

    #[test]
    fn test_ancestors_nearest_first() {
        let folder = FolderPath::parse("a/b/c").unwrap();
        let chain: Vec<String> = folder.ancestors().map(String::from).collect();
        assert_eq!(chain, vec!["a/b/c", "a/b", "a", ""]);
        assert_eq!(FolderPath::root().ancestors().count(), 1);
    }

    #[test]
    fn test_display() {
        assert_eq!(FolderPath::root().to_string(), "/");
        assert_eq!(FolderPath::parse("docs/sub").unwrap().to_string(), "/docs/sub");
    }

    #[test]
    fn test_serde_validates() {
        let ok: FolderPath = serde_json::from_str("\"docs\"").unwrap();
        assert_eq!(ok.as_str(), "docs");
        assert!(serde_json::from_str::<FolderPath>("\"../x\"").is_err());
    }

    #[test]
    fn test_local_storage_resolve() {
        let temp = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("docs/sub")).unwrap();
        std::fs::write(temp.path().join("file.txt"), b"x").unwrap();
        let storage = LocalStorage::new(temp.path());

        let sub = FolderPath::parse("docs/sub").unwrap();
        assert_eq!(storage.resolve(&sub).unwrap(), temp.path().join("docs").join("sub"));

        let missing = FolderPath::parse("nope").unwrap();
        assert!(matches!(storage.resolve(&missing), Err(JobError::NotFound { .. })));

        let file = FolderPath::parse("file.txt").unwrap();
        assert!(storage.resolve(&file).is_err());
    }
}
