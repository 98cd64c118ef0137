//! Recursive directory walker shared by the initial scan (§2 control flow)
//! and the polling backend's periodic sweep (§4.8).
//!
//! Grounded on the pack's `LogSleuth` directory watcher, which walks with
//! `walkdir`, skips per-entry errors (`.flatten()`), and never follows
//! symlinks unless explicitly asked to.

use std::path::{Path, PathBuf};

use crate::stat::Stat;

#[derive(Debug, Clone)]
pub struct ScanEntry {
    pub path: PathBuf,
    pub is_dir: bool,
    pub stat: Option<Stat>,
}

/// Walks `root` up to `max_depth` levels (unbounded when `None`), returning
/// every entry found. Per-entry I/O errors (permission faults mid-walk,
/// entries that vanish between `readdir` and `stat`) are silently skipped —
/// the caller's error-propagation policy decides what, if anything, a
/// consumer sees for those.
pub fn walk(root: &Path, max_depth: Option<usize>, follow_symlinks: bool) -> Vec<ScanEntry> {
    let mut walker = walkdir::WalkDir::new(root).follow_links(follow_symlinks);
    if let Some(depth) = max_depth {
        // walkdir's max_depth is relative to the root (depth 0 = root
        // itself); `depth` here counts descendants, so add one.
        walker = walker.max_depth(depth.saturating_add(1));
    }

    walker
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path() != root)
        .filter_map(|entry| {
            let metadata = entry.metadata().ok()?;
            Some(ScanEntry {
                path: entry.path().to_path_buf(),
                is_dir: metadata.is_dir(),
                stat: Some(Stat::from_metadata(&metadata, entry.path_is_symlink())),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn walk_finds_nested_files_and_dirs() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/file.txt"), b"hi").unwrap();
        fs::write(dir.path().join("top.txt"), b"hi").unwrap();

        let mut entries = walk(dir.path(), None, false);
        entries.sort_by(|a, b| a.path.cmp(&b.path));

        assert_eq!(entries.len(), 3);
        assert!(entries.iter().any(|e| e.is_dir && e.path.ends_with("sub")));
        assert!(entries.iter().any(|e| !e.is_dir && e.path.ends_with("top.txt")));
    }

    #[test]
    fn depth_limits_descent() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        fs::write(dir.path().join("a/b/deep.txt"), b"hi").unwrap();
        fs::write(dir.path().join("a/shallow.txt"), b"hi").unwrap();

        let entries = walk(dir.path(), Some(1), false);
        assert!(entries.iter().any(|e| e.path.ends_with("a")));
        assert!(entries.iter().any(|e| e.path.ends_with("shallow.txt")));
        assert!(!entries.iter().any(|e| e.path.ends_with("deep.txt")));
    }
}
