//! Read-only size estimate of a folder subtree.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::walker::{DirectoryWalker, FileSystemWalker, SkipRules, WalkState};

/// Advisory totals shown before a job starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEstimate {
    pub total_files: u64,
    pub total_bytes: u64,
    /// The scan stopped at the entry limit; totals are a lower bound
    pub truncated: bool,
}

/// Count eligible files below `root`, consuming at most `entry_limit`
/// directory entries.
///
/// Uses the same traversal and skip rules as a job, so the estimate covers
/// exactly the files a job would visit. Every entry counts against the
/// limit, including directories and skipped names, and each directory is
/// listed once.
pub fn estimate(
    fs: &dyn FileSystemWalker,
    rules: &SkipRules,
    root: &Path,
    entry_limit: u64,
) -> PlanEstimate {
    let walker = DirectoryWalker::new(fs, rules).with_entry_limit(entry_limit);
    let mut state = WalkState::new();
    let mut estimate = PlanEstimate::default();

    while let Some(file) = walker.next(&mut state, root) {
        estimate.total_files += 1;
        estimate.total_bytes += file.size;
    }
    estimate.truncated = walker.limit_reached();

    trace!(
        entries = walker.entries_consumed(),
        truncated = estimate.truncated,
        "Plan scan finished"
    );
    estimate
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::controller::DEFAULT_PLAN_ENTRY_LIMIT;
    use crate::walker::{FsEntry, MemoryFs};

    #[test]
    fn test_counts_eligible_files() {
        let fs = MemoryFs::new();
        fs.add_file("/r/a", 10)
            .add_file("/r/sub/b", 20)
            .add_file("/r/.thumbnails/c", 99)
            .add_symlink("/r/link");

        let plan = estimate(&fs, &SkipRules::default(), Path::new("/r"), 1000);
        assert_eq!(
            plan,
            PlanEstimate {
                total_files: 2,
                total_bytes: 30,
                truncated: false
            }
        );
    }

    #[test]
    fn test_truncates_at_limit() {
        let fs = MemoryFs::new();
        for i in 0..10 {
            fs.add_file(format!("/r/f{i:02}"), 1);
        }

        let plan = estimate(&fs, &SkipRules::default(), Path::new("/r"), 4);
        assert!(plan.truncated);
        assert_eq!(plan.total_files, 4);
    }

    #[test]
    fn test_limit_reached_on_last_file_is_not_truncated() {
        let fs = MemoryFs::new();
        fs.add_file("/r/a", 1).add_file("/r/b", 1);

        let plan = estimate(&fs, &SkipRules::default(), Path::new("/r"), 2);
        assert!(!plan.truncated);
        assert_eq!(plan.total_files, 2);
    }

    #[test]
    fn test_empty_folder() {
        let fs = MemoryFs::new();
        fs.add_dir("/r");
        assert_eq!(
            estimate(&fs, &SkipRules::default(), Path::new("/r"), 10),
            PlanEstimate::default()
        );
    }

    #[test]
    fn test_directories_count_against_limit() {
        let fs = MemoryFs::new();
        for i in 0..500 {
            fs.add_dir(format!("/r/d{i:03}"));
        }

        let plan = estimate(&fs, &SkipRules::default(), Path::new("/r"), 10);
        assert!(plan.truncated);
        assert_eq!(plan.total_files, 0);

        let plan = estimate(&fs, &SkipRules::default(), Path::new("/r"), 1000);
        assert!(!plan.truncated);
    }

    #[test]
    fn test_skipped_entries_count_against_limit() {
        let fs = MemoryFs::new();
        fs.add_file("/r/.trash/a", 1)
            .add_file("/r/.trash/b", 1)
            .add_symlink("/r/link")
            .add_file("/r/z", 1);

        let plan = estimate(&fs, &SkipRules::default(), Path::new("/r"), 2);
        assert!(plan.truncated);
        assert_eq!(plan.total_files, 0);
    }

    #[test]
    fn test_flat_directory_is_listed_once() {
        let inner = MemoryFs::new();
        for i in 0..2000 {
            inner.add_file(format!("/r/f{i:04}"), 1);
        }
        let fs = CountingFs {
            inner,
            listings: AtomicUsize::new(0),
            entries: AtomicUsize::new(0),
        };

        let plan = estimate(&fs, &SkipRules::default(), Path::new("/r"), DEFAULT_PLAN_ENTRY_LIMIT);
        assert_eq!(plan.total_files, 2000);
        assert!(!plan.truncated);
        assert_eq!(fs.listings.load(Ordering::SeqCst), 1);
        assert_eq!(fs.entries.load(Ordering::SeqCst), 2000);
    }

    /// Counts listings and listed entries.
    struct CountingFs {
        inner: MemoryFs,
        listings: AtomicUsize,
        entries: AtomicUsize,
    }

    impl FileSystemWalker for CountingFs {
        fn list_dir(&self, dir: &Path) -> std::io::Result<Vec<FsEntry>> {
            let entries = self.inner.list_dir(dir)?;
            self.listings.fetch_add(1, Ordering::SeqCst);
            self.entries.fetch_add(entries.len(), Ordering::SeqCst);
            Ok(entries)
        }
    }
}
