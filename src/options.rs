//! Watch option record (spec §6) and environment overrides.
//!
//! "Dynamic option records" become a single configuration structure per
//! Design Note §9 — unknown fields have no way to reach this struct at all
//! (it's constructed through typed setters), which is the Rust-native
//! equivalent of "unknown fields are rejected at construction".

use std::path::PathBuf;
use std::time::Duration;

/// `await_write_finish` settings (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AwaitWriteFinish {
    pub stability_threshold: Duration,
    pub poll_interval: Duration,
}

impl Default for AwaitWriteFinish {
    fn default() -> Self {
        Self {
            stability_threshold: Duration::from_millis(2000),
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// `atomic` editor-save collapsing (§6, §4.9 step 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Atomic {
    pub delay: Duration,
}

impl Default for Atomic {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(75),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WatchOptions {
    pub persistent: bool,
    pub ignore_initial: bool,
    pub ignored: Vec<String>,
    pub follow_symlinks: bool,
    pub cwd: Option<PathBuf>,
    pub depth: Option<usize>,
    pub disable_globbing: bool,
    pub use_polling: bool,
    pub interval: Duration,
    pub binary_interval: Duration,
    /// Every backend here already attaches a fresh `stat` to every `add`/
    /// `change` it reports (§6), so there's no "missing stat" case this flag
    /// needs to backfill — it's carried for API parity with the option
    /// table and so a future backend that *doesn't* stat eagerly has
    /// somewhere to check.
    pub always_stat: bool,
    pub atomic: Option<Atomic>,
    pub await_write_finish: Option<AwaitWriteFinish>,
    pub ignore_permission_errors: bool,
    pub expansion_limit: usize,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            persistent: true,
            ignore_initial: false,
            ignored: Vec::new(),
            follow_symlinks: false,
            cwd: None,
            depth: None,
            disable_globbing: false,
            use_polling: false,
            interval: Duration::from_millis(100),
            binary_interval: Duration::from_millis(300),
            always_stat: false,
            atomic: None,
            await_write_finish: None,
            ignore_permission_errors: false,
            expansion_limit: crate::glob_matcher::DEFAULT_EXPANSION_LIMIT,
        }
    }
}

impl WatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn persistent(mut self, value: bool) -> Self {
        self.persistent = value;
        self
    }

    pub fn ignore_initial(mut self, value: bool) -> Self {
        self.ignore_initial = value;
        self
    }

    pub fn ignored<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignored = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn follow_symlinks(mut self, value: bool) -> Self {
        self.follow_symlinks = value;
        self
    }

    pub fn cwd(mut self, path: impl Into<PathBuf>) -> Self {
        self.cwd = Some(path.into());
        self
    }

    pub fn depth(mut self, value: usize) -> Self {
        self.depth = Some(value);
        self
    }

    pub fn disable_globbing(mut self, value: bool) -> Self {
        self.disable_globbing = value;
        self
    }

    pub fn use_polling(mut self, value: bool) -> Self {
        self.use_polling = value;
        self
    }

    pub fn interval(mut self, value: Duration) -> Self {
        self.interval = value;
        self
    }

    pub fn binary_interval(mut self, value: Duration) -> Self {
        self.binary_interval = value;
        self
    }

    pub fn always_stat(mut self, value: bool) -> Self {
        self.always_stat = value;
        self
    }

    pub fn atomic(mut self, value: Atomic) -> Self {
        self.atomic = Some(value);
        self
    }

    pub fn await_write_finish(mut self, value: AwaitWriteFinish) -> Self {
        self.await_write_finish = Some(value);
        self
    }

    pub fn ignore_permission_errors(mut self, value: bool) -> Self {
        self.ignore_permission_errors = value;
        self
    }

    pub fn expansion_limit(mut self, value: usize) -> Self {
        self.expansion_limit = value;
        self
    }

    /// Layers `WATCHFUL_USEPOLLING`/`WATCHFUL_INTERVAL` over whatever was set
    /// programmatically, matching §6's environment-override contract.
    pub fn apply_env_overrides(mut self) -> Self {
        if let Ok(raw) = std::env::var("WATCHFUL_USEPOLLING") {
            self.use_polling = coerce_truthy(&raw);
        }
        if let Ok(raw) = std::env::var("WATCHFUL_INTERVAL") {
            if let Ok(ms) = raw.trim().parse::<u64>() {
                self.interval = Duration::from_millis(ms);
            }
        }
        self
    }
}

/// Truthy: `1`, `true` (case-insensitive). Falsy: `0`, `false`. Anything else
/// coerces to boolean truthiness via non-emptiness (§6).
fn coerce_truthy(raw: &str) -> bool {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" => true,
        "0" | "false" | "" => false,
        other => !other.is_empty(),
    }
}
