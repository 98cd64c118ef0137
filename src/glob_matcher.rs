//! Glob matcher (spec §4.2).
//!
//! Brace/range expansion (`{a,b}`, `{1..9}`, `{a..z}`) is hand-rolled — no
//! crate in this pack's dependency graph does numeric-range brace expansion —
//! and unrolls each pattern into a set of literal alternatives *before* any
//! of them reach `globset`, which supplies `*`, `**`, `?`, and `[...]`
//! matching. Expansion that would exceed `expansion_limit` fails closed with
//! [`WatchError::ExpansionLimit`] rather than silently truncating.

use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};

use crate::error::{Result, WatchError};

pub const DEFAULT_EXPANSION_LIMIT: usize = 1000;

/// A compiled predicate over normalized, forward-slash paths.
#[derive(Debug)]
pub struct GlobMatcher {
    set: GlobSet,
    source_patterns: Vec<String>,
}

impl GlobMatcher {
    /// Compile one or more patterns (each may itself contain brace/range
    /// groups) into a single predicate.
    pub fn compile(
        patterns: &[String],
        case_insensitive: bool,
        expansion_limit: usize,
    ) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        let mut source_patterns = Vec::new();

        for pattern in patterns {
            let expanded = expand_braces(pattern, expansion_limit)?;
            for literal in expanded {
                let glob = compile_one(&literal, case_insensitive)?;
                builder.add(glob);
                source_patterns.push(literal);
            }
        }

        let set = builder
            .build()
            .map_err(|e| WatchError::InvalidArgument(e.to_string()))?;

        Ok(Self {
            set,
            source_patterns,
        })
    }

    pub fn matches(&self, path: &str) -> bool {
        self.set.is_match(path)
    }
}

fn compile_one(pattern: &str, case_insensitive: bool) -> Result<Glob> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .case_insensitive(case_insensitive)
        .build()
        .map_err(|e| WatchError::InvalidArgument(format!("invalid glob {pattern:?}: {e}")))
}

/// Expand every `{...}` group in `pattern` into the cartesian product of its
/// alternatives. A bare `{1..9}`/`{a..z}` range expands numerically or
/// alphabetically; everything else is comma-split literally. Returns the
/// single input pattern unchanged when it has no brace group.
fn expand_braces(pattern: &str, limit: usize) -> Result<Vec<String>> {
    let Some(start) = pattern.find('{') else {
        return Ok(vec![pattern.to_string()]);
    };
    let Some(end) = matching_brace(pattern, start) else {
        // Unbalanced `{` — treat as a literal character, not a group.
        return Ok(vec![pattern.to_string()]);
    };

    let prefix = &pattern[..start];
    let body = &pattern[start + 1..end];
    let suffix = &pattern[end + 1..];

    let alternatives = brace_alternatives(body);
    if alternatives.len() > limit {
        return Err(WatchError::ExpansionLimit {
            pattern: pattern.to_string(),
            limit,
        });
    }

    let mut expanded = Vec::new();
    for alt in alternatives {
        let candidate = format!("{prefix}{alt}{suffix}");
        // A pattern may contain more than one brace group; recurse on the
        // remainder so `{a,b}/{1..3}` fully unrolls.
        let nested = expand_braces(&candidate, limit)?;
        if expanded.len() + nested.len() > limit {
            return Err(WatchError::ExpansionLimit {
                pattern: pattern.to_string(),
                limit,
            });
        }
        expanded.extend(nested);
    }
    Ok(expanded)
}

fn matching_brace(pattern: &str, open_index: usize) -> Option<usize> {
    let mut depth = 0usize;
    // `open_index` is a byte offset (from `str::find`); `char_indices`
    // yields byte offsets too, but `.skip(n)` counts *items*, not bytes —
    // filtering on the index itself keeps a multi-byte prefix from
    // misaligning the two.
    for (i, c) in pattern.char_indices().filter(|(i, _)| *i >= open_index) {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn brace_alternatives(body: &str) -> Vec<String> {
    if let Some(range) = numeric_or_alpha_range(body) {
        return range;
    }
    body.split(',').map(|s| s.to_string()).collect()
}

/// Recognizes `{1..9}`, `{01..09}` (zero-padded), and `{a..z}` range forms.
fn numeric_or_alpha_range(body: &str) -> Option<Vec<String>> {
    let (lo, hi) = body.split_once("..")?;
    if lo.is_empty() || hi.is_empty() {
        return None;
    }

    if let (Ok(lo_n), Ok(hi_n)) = (lo.parse::<i64>(), hi.parse::<i64>()) {
        let width = if lo.starts_with('0') || hi.starts_with('0') {
            lo.len().max(hi.len())
        } else {
            0
        };
        let items: Vec<String> = if lo_n <= hi_n {
            (lo_n..=hi_n).map(|n| pad(n, width)).collect()
        } else {
            (hi_n..=lo_n).rev().map(|n| pad(n, width)).collect()
        };
        return Some(items);
    }

    let lo_chars: Vec<char> = lo.chars().collect();
    let hi_chars: Vec<char> = hi.chars().collect();
    if lo_chars.len() == 1 && hi_chars.len() == 1 {
        let (lo_c, hi_c) = (lo_chars[0], hi_chars[0]);
        if lo_c.is_ascii_alphabetic() && hi_c.is_ascii_alphabetic() {
            let items: Vec<String> = if lo_c <= hi_c {
                (lo_c as u8..=hi_c as u8).map(|b| (b as char).to_string()).collect()
            } else {
                (hi_c as u8..=lo_c as u8)
                    .rev()
                    .map(|b| (b as char).to_string())
                    .collect()
            };
            return Some(items);
        }
    }

    None
}

fn pad(n: i64, width: usize) -> String {
    if width == 0 {
        n.to_string()
    } else {
        format!("{n:0width$}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_pattern_matches() {
        let m = GlobMatcher::compile(&["*.tmp".to_string()], false, DEFAULT_EXPANSION_LIMIT).unwrap();
        assert!(m.matches("x.tmp"));
        assert!(!m.matches("dir/x.tmp"));
    }

    #[test]
    fn double_star_crosses_separators() {
        let m = GlobMatcher::compile(&["**/*.log".to_string()], false, DEFAULT_EXPANSION_LIMIT).unwrap();
        assert!(m.matches("a/b/c.log"));
        assert!(m.matches("c.log"));
    }

    #[test]
    fn brace_alternation_expands() {
        let expanded = expand_braces("src/{a,b}.rs", DEFAULT_EXPANSION_LIMIT).unwrap();
        assert_eq!(expanded, vec!["src/a.rs", "src/b.rs"]);
    }

    #[test]
    fn brace_after_a_multibyte_prefix_still_expands() {
        let expanded = expand_braces("café/{a,b}.rs", DEFAULT_EXPANSION_LIMIT).unwrap();
        assert_eq!(expanded, vec!["café/a.rs", "café/b.rs"]);
    }

    #[test]
    fn numeric_range_expands_in_order() {
        let expanded = expand_braces("log.{1..3}.txt", DEFAULT_EXPANSION_LIMIT).unwrap();
        assert_eq!(expanded, vec!["log.1.txt", "log.2.txt", "log.3.txt"]);
    }

    #[test]
    fn zero_padded_numeric_range_preserves_width() {
        let expanded = expand_braces("log.{01..03}.txt", DEFAULT_EXPANSION_LIMIT).unwrap();
        assert_eq!(expanded, vec!["log.01.txt", "log.02.txt", "log.03.txt"]);
    }

    #[test]
    fn alphabetic_range_expands() {
        let expanded = expand_braces("{a..c}.rs", DEFAULT_EXPANSION_LIMIT).unwrap();
        assert_eq!(expanded, vec!["a.rs", "b.rs", "c.rs"]);
    }

    #[test]
    fn expansion_past_limit_fails_closed() {
        let err = GlobMatcher::compile(&["{1..2000}".to_string()], false, DEFAULT_EXPANSION_LIMIT)
            .unwrap_err();
        assert!(matches!(err, WatchError::ExpansionLimit { .. }));
    }

    #[test]
    fn case_insensitive_option_applies() {
        let m = GlobMatcher::compile(&["*.LOG".to_string()], true, DEFAULT_EXPANSION_LIMIT).unwrap();
        assert!(m.matches("x.log"));
    }
}
