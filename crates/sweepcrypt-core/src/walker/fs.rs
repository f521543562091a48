use std::{fs, io, path::Path};

use tracing::warn;

/// What a directory entry is, as seen without following symlinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File { size: u64 },
    Directory,
    Symlink,
    /// Sockets, FIFOs, devices.
    Other,
}

/// A single directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEntry {
    pub name: String,
    pub kind: EntryKind,
}

impl FsEntry {
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::File { size },
        }
    }

    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Directory,
        }
    }
}

/// Directory listing seam used by the walker and the planner.
///
/// Implementations must never follow symbolic links: a link is reported as
/// [`EntryKind::Symlink`] regardless of its target. Order is unspecified; the
/// walker sorts.
pub trait FileSystemWalker: Send + Sync {
    fn list_dir(&self, dir: &Path) -> io::Result<Vec<FsEntry>>;
}

/// The real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

impl FileSystemWalker for LocalFs {
    fn list_dir(&self, dir: &Path) -> io::Result<Vec<FsEntry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let Ok(name) = entry.file_name().into_string() else {
                warn!(dir = %dir.display(), "Skipping entry with non UTF-8 name");
                continue;
            };
            // DirEntry::metadata does not traverse symlinks
            let meta = match entry.metadata() {
                Ok(meta) => meta,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            let file_type = meta.file_type();
            let kind = if file_type.is_symlink() {
                EntryKind::Symlink
            } else if file_type.is_dir() {
                EntryKind::Directory
            } else if file_type.is_file() {
                EntryKind::File { size: meta.len() }
            } else {
                EntryKind::Other
            };
            entries.push(FsEntry { name, kind });
        }
        Ok(entries)
    }
}
