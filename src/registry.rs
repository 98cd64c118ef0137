//! Directory registry (spec §4.3, §3).
//!
//! The registry is the ground truth for whether a given observation is a
//! *new* add or a duplicate (Invariant A/B in §3). It holds no I/O and no
//! async state — it's owned exclusively by the dispatcher task (§5), so a
//! plain `HashMap` is safe without any further synchronization.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

#[derive(Debug, Default)]
pub struct DirectoryRegistry {
    dirs: HashMap<PathBuf, BTreeSet<String>>,
}

impl DirectoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent: ensure `dir` has a registry entry.
    pub fn touch(&mut self, dir: &Path) {
        self.dirs.entry(dir.to_path_buf()).or_default();
    }

    /// Returns `true` if `basename` was newly added under `dir` (i.e. this
    /// is a fresh `add`/`addDir`, not a duplicate).
    pub fn add_child(&mut self, dir: &Path, basename: &str) -> bool {
        self.dirs
            .entry(dir.to_path_buf())
            .or_default()
            .insert(basename.to_string())
    }

    /// Returns `true` if `basename` existed and was removed.
    pub fn remove_child(&mut self, dir: &Path, basename: &str) -> bool {
        self.dirs
            .get_mut(dir)
            .map(|children| children.remove(basename))
            .unwrap_or(false)
    }

    pub fn contains_child(&self, dir: &Path, basename: &str) -> bool {
        self.dirs
            .get(dir)
            .map(|children| children.contains(basename))
            .unwrap_or(false)
    }

    pub fn is_registered(&self, dir: &Path) -> bool {
        self.dirs.contains_key(dir)
    }

    pub fn children(&self, dir: &Path) -> Vec<String> {
        self.dirs
            .get(dir)
            .map(|c| c.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Removes `dir`'s entry entirely, returning its former children so the
    /// caller can emit `unlink`/`unlinkDir` for each before tearing down
    /// nested registry entries.
    pub fn drop_dir(&mut self, dir: &Path) -> Vec<String> {
        self.dirs
            .remove(dir)
            .map(|c| c.into_iter().collect())
            .unwrap_or_default()
    }

    pub fn dir_count(&self) -> usize {
        self.dirs.len()
    }

    /// Snapshot for `Watcher::get_watched()` — sorted at both levels (§10.5).
    pub fn snapshot(&self) -> BTreeMap<PathBuf, Vec<String>> {
        self.dirs
            .iter()
            .map(|(dir, children)| (dir.clone(), children.iter().cloned().collect()))
            .collect()
    }
}
