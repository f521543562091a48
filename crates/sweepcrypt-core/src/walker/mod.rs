//! Resumable, non-recursive directory traversal.
//!
//! A recursive walk cannot survive between two independent calls, so the
//! traversal is kept as plain data instead: a queue of directories still to
//! visit, the directory currently being scanned, and how far into its sorted
//! listing the scan has got. [`DirectoryWalker::next`] is a pure function of
//! that [`WalkState`] and the root path, which is what makes a job resumable
//! from its persisted record alone.
//!
//! # Order
//!
//! Entries are visited in byte-wise lexicographic order within a directory.
//! Subdirectories are queued when they are encountered and visited after the
//! current directory is finished, so files of a directory always come before
//! the files of its children.

mod fs;
mod memory;

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

pub use fs::{EntryKind, FileSystemWalker, FsEntry, LocalFs};
pub use memory::MemoryFs;

/// Names that are never descended into or transformed.
pub const DEFAULT_RESERVED_NAMES: &[&str] = &[".trash", ".profile-picture", ".thumbnails"];

/// Prefix of lock and scratch entries written by the file manager.
pub const DEFAULT_LOCK_PREFIX: &str = ".lock";

/// Serializable position of a paused traversal.
///
/// Relative paths use `/` separators; the empty string is the walk root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkState {
    /// Directories discovered but not yet scanned
    #[serde(default)]
    pub queue: VecDeque<String>,
    /// Directory currently being scanned
    #[serde(default)]
    pub current_dir: Option<String>,
    /// Number of sorted entries of `current_dir` already consumed
    #[serde(default)]
    pub current_offset: u64,
}

impl WalkState {
    /// A walk that starts at the root.
    pub fn new() -> Self {
        Self {
            queue: VecDeque::from([String::new()]),
            current_dir: None,
            current_offset: 0,
        }
    }

    /// No directory left to scan.
    pub fn is_exhausted(&self) -> bool {
        self.current_dir.is_none() && self.queue.is_empty()
    }
}

/// Entry names the walker and planner pass over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipRules {
    #[serde(default = "default_reserved_names")]
    pub reserved_names: Vec<String>,
    #[serde(default = "default_lock_prefix")]
    pub lock_prefix: String,
}

fn default_reserved_names() -> Vec<String> {
    DEFAULT_RESERVED_NAMES.iter().map(ToString::to_string).collect()
}

fn default_lock_prefix() -> String {
    DEFAULT_LOCK_PREFIX.to_string()
}

impl Default for SkipRules {
    fn default() -> Self {
        Self {
            reserved_names: default_reserved_names(),
            lock_prefix: default_lock_prefix(),
        }
    }
}

impl SkipRules {
    pub fn is_skipped(&self, name: &str) -> bool {
        self.reserved_names.iter().any(|r| r == name)
            || (!self.lock_prefix.is_empty() && name.starts_with(&self.lock_prefix))
    }
}

/// A regular file produced by the walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkedFile {
    /// Path relative to the walk root, `/`-separated
    pub relative: String,
    pub absolute: PathBuf,
    pub size: u64,
}

/// Driver over a [`WalkState`].
///
/// All traversal position lives in the state. The walker itself only keeps
/// the sorted listing of the directory it is scanning, so a walker should be
/// short-lived (one tick, one plan) and must not outlive changes it is
/// expected to observe.
pub struct DirectoryWalker<'a> {
    fs: &'a dyn FileSystemWalker,
    rules: &'a SkipRules,
    listing: RefCell<Option<(PathBuf, Rc<[FsEntry]>)>>,
    entry_limit: Option<u64>,
    consumed: Cell<u64>,
    limit_hit: Cell<bool>,
}

impl<'a> DirectoryWalker<'a> {
    pub fn new(fs: &'a dyn FileSystemWalker, rules: &'a SkipRules) -> Self {
        Self {
            fs,
            rules,
            listing: RefCell::new(None),
            entry_limit: None,
            consumed: Cell::new(0),
            limit_hit: Cell::new(false),
        }
    }

    /// Stop after `limit` directory entries (files, directories and skipped
    /// names alike) have been consumed.
    #[must_use]
    pub fn with_entry_limit(mut self, limit: u64) -> Self {
        self.entry_limit = Some(limit);
        self
    }

    /// Directory entries consumed so far by this walker.
    pub fn entries_consumed(&self) -> u64 {
        self.consumed.get()
    }

    /// Whether a `None` from [`next`](Self::next) came from the entry limit
    /// rather than the end of the traversal.
    pub fn limit_reached(&self) -> bool {
        self.limit_hit.get()
    }

    /// Advance `state` to the next eligible regular file below `root`.
    ///
    /// Returns `None` once the traversal is exhausted or the entry limit is
    /// reached. Directories that cannot be listed are treated as empty.
    pub fn next(&self, state: &mut WalkState, root: &Path) -> Option<WalkedFile> {
        loop {
            let dir = if let Some(dir) = &state.current_dir {
                dir.clone()
            } else {
                let dir = state.queue.pop_front()?;
                state.current_dir = Some(dir.clone());
                state.current_offset = 0;
                dir
            };

            let absolute_dir = join_relative(root, &dir);
            let entries = match self.list_sorted(&absolute_dir) {
                Ok(entries) => entries,
                Err(e) => {
                    debug!(dir = %absolute_dir.display(), error = %e, "Skipping unreadable directory");
                    state.current_dir = None;
                    state.current_offset = 0;
                    continue;
                }
            };

            let start = usize::try_from(state.current_offset).unwrap_or(usize::MAX);
            for entry in entries.iter().skip(start) {
                if self.entry_limit.is_some_and(|limit| self.consumed.get() >= limit) {
                    self.limit_hit.set(true);
                    return None;
                }
                self.consumed.set(self.consumed.get() + 1);
                state.current_offset += 1;

                if self.rules.is_skipped(&entry.name) {
                    trace!(name = %entry.name, "Skipping reserved entry");
                    continue;
                }

                let relative = if dir.is_empty() {
                    entry.name.clone()
                } else {
                    format!("{dir}/{}", entry.name)
                };

                match entry.kind {
                    EntryKind::Directory => state.queue.push_back(relative),
                    EntryKind::File { size } => {
                        return Some(WalkedFile {
                            absolute: join_relative(root, &relative),
                            relative,
                            size,
                        });
                    }
                    EntryKind::Symlink | EntryKind::Other => {
                        trace!(path = %relative, "Skipping non-regular entry");
                    }
                }
            }

            state.current_dir = None;
            state.current_offset = 0;
        }
    }

    /// Whether `state` has no files left, without advancing it.
    ///
    /// Does not count against the entry limit.
    pub fn is_finished(&self, state: &WalkState, root: &Path) -> bool {
        let consumed = self.consumed.get();
        let limit_hit = self.limit_hit.get();
        let mut probe = state.clone();
        let finished = self.next(&mut probe, root).is_none() && !self.limit_hit.get();
        self.consumed.set(consumed);
        self.limit_hit.set(limit_hit);
        finished
    }

    /// Sorted listing of `dir`, read from disk once per walker.
    fn list_sorted(&self, dir: &Path) -> io::Result<Rc<[FsEntry]>> {
        if let Some((cached, entries)) = self.listing.borrow().as_ref()
            && cached == dir
        {
            return Ok(Rc::clone(entries));
        }

        let mut entries = self.fs.list_dir(dir)?;
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        let entries: Rc<[FsEntry]> = entries.into();
        *self.listing.borrow_mut() = Some((dir.to_path_buf(), Rc::clone(&entries)));
        Ok(entries)
    }
}

fn join_relative(root: &Path, relative: &str) -> PathBuf {
    if relative.is_empty() {
        root.to_path_buf()
    } else {
        relative.split('/').fold(root.to_path_buf(), |acc, c| acc.join(c))
    }
}
