//! Symlink map (spec §3): absolute symlink path → resolved real path.
//!
//! Used to avoid infinite loops when `follow_symlinks` is enabled and to
//! rewrite emitted paths so users see the symlink path they watched, not the
//! target (§4.6).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Default)]
pub struct SymlinkMap {
    symlink_to_real: HashMap<PathBuf, PathBuf>,
    real_to_symlink: HashMap<PathBuf, PathBuf>,
}

impl SymlinkMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, symlink: PathBuf, real: PathBuf) {
        self.real_to_symlink.insert(real.clone(), symlink.clone());
        self.symlink_to_real.insert(symlink, real);
    }

    pub fn remove_symlink(&mut self, symlink: &Path) {
        if let Some(real) = self.symlink_to_real.remove(symlink) {
            self.real_to_symlink.remove(&real);
        }
    }

    /// `true` if `real` is already reachable through a tracked symlink —
    /// consulted before descending into a new symlink target to avoid
    /// following a cycle back into an already-watched subtree.
    pub fn is_already_tracked_target(&self, real: &Path) -> bool {
        self.real_to_symlink.contains_key(real)
    }

    /// Rewrites `path`, which arrived as a real (post-resolution) path, back
    /// to the symlink view the user actually watched, if any ancestor of
    /// `path` is a tracked symlink target.
    pub fn rewrite_to_symlink_view(&self, path: &Path) -> PathBuf {
        for (real, symlink) in &self.real_to_symlink {
            if let Ok(suffix) = path.strip_prefix(real) {
                return if suffix.as_os_str().is_empty() {
                    symlink.clone()
                } else {
                    symlink.join(suffix)
                };
            }
        }
        path.to_path_buf()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_real_path_under_a_tracked_symlink() {
        let mut map = SymlinkMap::new();
        map.insert(PathBuf::from("/watched/link"), PathBuf::from("/real/target"));
        let rewritten = map.rewrite_to_symlink_view(Path::new("/real/target/child.txt"));
        assert_eq!(rewritten, PathBuf::from("/watched/link/child.txt"));
    }

    #[test]
    fn leaves_untracked_paths_unchanged() {
        let map = SymlinkMap::new();
        let p = Path::new("/real/target/child.txt");
        assert_eq!(map.rewrite_to_symlink_view(p), p.to_path_buf());
    }

    #[test]
    fn detects_already_tracked_targets() {
        let mut map = SymlinkMap::new();
        map.insert(PathBuf::from("/watched/link"), PathBuf::from("/real/target"));
        assert!(map.is_already_tracked_target(Path::new("/real/target")));
        map.remove_symlink(Path::new("/watched/link"));
        assert!(!map.is_already_tracked_target(Path::new("/real/target")));
    }
}
