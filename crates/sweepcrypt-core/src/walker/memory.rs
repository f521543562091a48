use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use super::fs::{EntryKind, FileSystemWalker, FsEntry};

#[derive(Debug, Clone, Copy)]
enum Node {
    Dir,
    File(u64),
    Symlink,
}

/// In-memory directory tree for exercising the walker without touching disk.
///
/// Parent directories are created implicitly. Paths are compared verbatim,
/// so callers should use the same root they hand to the walker.
#[derive(Debug, Default)]
pub struct MemoryFs {
    nodes: RwLock<BTreeMap<PathBuf, Node>>,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_dir(&self, path: impl AsRef<Path>) -> &Self {
        self.insert(path.as_ref(), Node::Dir);
        self
    }

    pub fn add_file(&self, path: impl AsRef<Path>, size: u64) -> &Self {
        self.insert(path.as_ref(), Node::File(size));
        self
    }

    pub fn add_symlink(&self, path: impl AsRef<Path>) -> &Self {
        self.insert(path.as_ref(), Node::Symlink);
        self
    }

    /// Remove `path` and everything below it.
    pub fn remove(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        nodes.retain(|p, _| !p.starts_with(path));
    }

    fn insert(&self, path: &Path, node: Node) {
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        let mut parent = path.parent();
        while let Some(dir) = parent {
            if dir.as_os_str().is_empty() {
                break;
            }
            nodes.entry(dir.to_path_buf()).or_insert(Node::Dir);
            parent = dir.parent();
        }
        nodes.insert(path.to_path_buf(), node);
    }
}

impl FileSystemWalker for MemoryFs {
    fn list_dir(&self, dir: &Path) -> io::Result<Vec<FsEntry>> {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        match nodes.get(dir) {
            Some(Node::Dir) => {}
            Some(_) => return Err(io::Error::other(format!("not a directory: {}", dir.display()))),
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no such directory: {}", dir.display()),
                ));
            }
        }

        let entries = nodes
            .iter()
            .filter(|(path, _)| path.parent() == Some(dir))
            .filter_map(|(path, node)| {
                let name = path.file_name()?.to_str()?.to_string();
                let kind = match node {
                    Node::Dir => EntryKind::Directory,
                    Node::File(size) => EntryKind::File { size: *size },
                    Node::Symlink => EntryKind::Symlink,
                };
                Some(FsEntry { name, kind })
            })
            .collect();
        Ok(entries)
    }
}
