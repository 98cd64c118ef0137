//! Path normalizer (spec §4.1).
//!
//! Canonical form uses `/` as separator, collapses repeated slashes (except a
//! leading `//` on UNC-style paths), and preserves relative form when no
//! `cwd` is configured.

use std::path::{Path, PathBuf};

const GLOB_META: &[char] = &['*', '?', '[', '{', '!'];

/// Normalize a user-supplied path string to canonical forward-slash form.
/// Does not touch the filesystem — this is pure string surgery, `add()`
/// resolves symlinks and absoluteness separately.
pub fn normalize(input: &str) -> String {
    let backslashes_replaced = if cfg!(windows) {
        input.replace('\\', "/")
    } else {
        input.to_string()
    };

    let leading_unc = backslashes_replaced.starts_with("//") && !backslashes_replaced.starts_with("///");

    let mut collapsed = String::with_capacity(backslashes_replaced.len());
    let mut prev_slash = false;
    for (i, c) in backslashes_replaced.chars().enumerate() {
        if c == '/' {
            if prev_slash && !(leading_unc && i == 1) {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        collapsed.push(c);
    }

    if collapsed.len() > 1 && collapsed.ends_with('/') {
        collapsed.pop();
    }
    collapsed
}

/// A leading `!` moves an input into the ignore set (§4.1). Returns the
/// pattern with the negation marker stripped, plus whether it was negated.
pub fn strip_negation(input: &str) -> (&str, bool) {
    match input.strip_prefix('!') {
        Some(rest) => (rest, true),
        None => (input, false),
    }
}

/// Whether `p` contains any glob metacharacter outside of an escaped form.
pub fn is_glob(p: &str) -> bool {
    p.chars().any(|c| GLOB_META.contains(&c))
}

/// The deepest ancestor of a glob pattern that is purely literal — the
/// directory a backend subscribes on (§4.1, GLOSSARY "glob_parent").
pub fn glob_parent(pattern: &str) -> String {
    let normalized = normalize(pattern);
    let mut literal_components: Vec<&str> = Vec::new();
    for component in normalized.split('/') {
        if component.is_empty() {
            continue;
        }
        if is_glob(component) {
            break;
        }
        literal_components.push(component);
    }

    let prefix = if normalized.starts_with('/') { "/" } else { "" };
    if literal_components.is_empty() {
        if prefix.is_empty() {
            ".".to_string()
        } else {
            prefix.to_string()
        }
    } else {
        format!("{prefix}{}", literal_components.join("/"))
    }
}

/// Rewrites an absolute emitted path relative to `cwd`, per §4.9 step 2
/// ("report paths relative to this directory"). Falls back to the
/// untouched absolute path when `path` doesn't live under `cwd` — a watch
/// root outside `cwd` still needs to report *something* usable.
pub fn relativize(path: &Path, cwd: Option<&Path>) -> PathBuf {
    let Some(base) = cwd else {
        return path.to_path_buf();
    };
    let canonical_base = std::fs::canonicalize(base).unwrap_or_else(|_| base.to_path_buf());
    // `path` may already be gone (an unlink), so canonicalizing it directly
    // would fail; canonicalize its parent instead and rejoin the basename.
    let canonical_path = std::fs::canonicalize(path).unwrap_or_else(|_| {
        match (path.parent(), path.file_name()) {
            (Some(parent), Some(name)) => std::fs::canonicalize(parent)
                .map(|p| p.join(name))
                .unwrap_or_else(|_| path.to_path_buf()),
            _ => path.to_path_buf(),
        }
    });
    canonical_path
        .strip_prefix(&canonical_base)
        .map(Path::to_path_buf)
        .unwrap_or(canonical_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_repeated_slashes() {
        assert_eq!(normalize("a//b///c"), "a/b/c");
    }

    #[test]
    fn preserves_unc_leading_double_slash() {
        assert_eq!(normalize("//server/share//dir"), "//server/share/dir");
    }

    #[test]
    fn strips_trailing_slash() {
        assert_eq!(normalize("a/b/"), "a/b");
        assert_eq!(normalize("/"), "/");
    }

    #[test]
    fn negation_is_stripped() {
        assert_eq!(strip_negation("!foo/*.tmp"), ("foo/*.tmp", true));
        assert_eq!(strip_negation("foo/*.tmp"), ("foo/*.tmp", false));
    }

    #[test]
    fn detects_glob_metacharacters() {
        assert!(is_glob("src/*.rs"));
        assert!(is_glob("src/**/mod.rs"));
        assert!(is_glob("src/file?.rs"));
        assert!(is_glob("src/{a,b}.rs"));
        assert!(!is_glob("src/main.rs"));
    }

    #[test]
    fn glob_parent_stops_at_first_metacharacter() {
        assert_eq!(glob_parent("src/**/mod.rs"), "src");
        assert_eq!(glob_parent("/var/log/*.log"), "/var/log");
        assert_eq!(glob_parent("plain/dir/path"), "plain/dir/path");
        assert_eq!(glob_parent("*.rs"), ".");
    }

    #[test]
    fn relativize_without_cwd_is_a_no_op() {
        let p = Path::new("/abs/file.txt");
        assert_eq!(relativize(p, None), p.to_path_buf());
    }

    #[test]
    fn relativize_under_a_real_cwd() {
        let dir = std::env::temp_dir().join(format!("watchful-relativize-{}", std::process::id()));
        let child = dir.join("child.txt");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(&child, b"x").unwrap();
        assert_eq!(relativize(&child, Some(&dir)), PathBuf::from("child.txt"));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
