//! Ignore evaluation (spec §4.9, "Ignore evaluation").
//!
//! "The compiled composite matcher is cached and invalidated whenever the
//! ignore set mutates" — `IgnoreFilter` owns both the compiled glob set and
//! the explicit path set, so every mutation path goes through one place and
//! there is no way to consult a stale matcher.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::glob_matcher::GlobMatcher;

#[derive(Debug)]
pub struct IgnoreFilter {
    compiled: Option<GlobMatcher>,
    pattern_source: Vec<String>,
    explicit: BTreeSet<PathBuf>,
    atomic_dotfiles: bool,
    case_insensitive: bool,
    expansion_limit: usize,
}

impl IgnoreFilter {
    pub fn new(atomic_dotfiles: bool, case_insensitive: bool, expansion_limit: usize) -> Self {
        Self {
            compiled: None,
            pattern_source: Vec::new(),
            explicit: BTreeSet::new(),
            atomic_dotfiles,
            case_insensitive,
            expansion_limit,
        }
    }

    /// (Re)compiles the glob side of the filter from the given patterns.
    pub fn set_patterns(&mut self, patterns: Vec<String>) -> Result<()> {
        self.compiled = if patterns.is_empty() {
            None
        } else {
            Some(GlobMatcher::compile(
                &patterns,
                self.case_insensitive,
                self.expansion_limit,
            )?)
        };
        self.pattern_source = patterns;
        Ok(())
    }

    /// Adds a path to the explicit ignore set — populated by `unwatch()` and
    /// by negated (`!pattern`) `add()` inputs.
    pub fn add_explicit(&mut self, path: PathBuf) {
        self.explicit.insert(path);
    }

    pub fn remove_explicit(&mut self, path: &Path) {
        self.explicit.remove(path);
    }

    /// `path` (absolute, canonical) and `normalized` (the forward-slash
    /// string form matched against glob patterns).
    pub fn is_ignored(&self, path: &Path, normalized: &str) -> bool {
        if self.atomic_dotfiles {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if name.starts_with('.') {
                    return true;
                }
            }
        }

        if self
            .explicit
            .iter()
            .any(|ignored| path == ignored || path.starts_with(ignored))
        {
            return true;
        }

        let Some(matcher) = self.compiled.as_ref() else {
            return false;
        };

        // A basename-only pattern like `*.tmp` is meant to match anywhere in
        // the tree, not just when the whole path happens to have no
        // directory component — `literal_separator(true)` means `*` never
        // crosses a `/`, so the basename itself has to be tried too
        // (chokidar does the same: a pattern with no slash matches on
        // basename).
        let basename = path.file_name().and_then(|n| n.to_str()).unwrap_or(normalized);
        matcher.matches(normalized) || matcher.matches(basename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_pattern_ignores_matching_path() {
        let mut filter = IgnoreFilter::new(false, false, crate::glob_matcher::DEFAULT_EXPANSION_LIMIT);
        filter.set_patterns(vec!["*.tmp".to_string()]).unwrap();
        assert!(filter.is_ignored(Path::new("/a/x.tmp"), "x.tmp"));
        assert!(!filter.is_ignored(Path::new("/a/x.js"), "x.js"));
    }

    /// The real call site (`Dispatcher::is_ignored`) always normalizes the
    /// *full* absolute path, never a bare basename — a basename-only glob
    /// still has to match, since `literal_separator` stops `*` from crossing
    /// the directory separators in that full path.
    #[test]
    fn basename_only_glob_matches_nested_full_paths() {
        let mut filter = IgnoreFilter::new(false, false, crate::glob_matcher::DEFAULT_EXPANSION_LIMIT);
        filter.set_patterns(vec!["*.tmp".to_string()]).unwrap();
        assert!(filter.is_ignored(Path::new("/tmp/work/x.tmp"), "/tmp/work/x.tmp"));
        assert!(!filter.is_ignored(Path::new("/tmp/work/x.log"), "/tmp/work/x.log"));
    }

    #[test]
    fn explicit_set_ignores_path_and_descendants() {
        let mut filter = IgnoreFilter::new(false, false, crate::glob_matcher::DEFAULT_EXPANSION_LIMIT);
        filter.add_explicit(PathBuf::from("/a/b"));
        assert!(filter.is_ignored(Path::new("/a/b"), "a/b"));
        assert!(filter.is_ignored(Path::new("/a/b/c"), "a/b/c"));
        assert!(!filter.is_ignored(Path::new("/a/other"), "a/other"));
    }

    #[test]
    fn atomic_mode_ignores_dotfiles() {
        let filter = IgnoreFilter::new(true, false, crate::glob_matcher::DEFAULT_EXPANSION_LIMIT);
        assert!(filter.is_ignored(Path::new("/a/.file.swp"), "a/.file.swp"));
        assert!(!filter.is_ignored(Path::new("/a/file.txt"), "a/file.txt"));
    }

    #[test]
    fn removing_explicit_entry_unignores_it() {
        let mut filter = IgnoreFilter::new(false, false, crate::glob_matcher::DEFAULT_EXPANSION_LIMIT);
        filter.add_explicit(PathBuf::from("/a/b"));
        filter.remove_explicit(Path::new("/a/b"));
        assert!(!filter.is_ignored(Path::new("/a/b"), "a/b"));
    }
}
