//! Pending-unlink slot for `atomic` mode (spec §3, §4.9 step 4).
//!
//! An editor's atomic save looks like `unlink` immediately followed by
//! `add` on the same path. When `atomic` is enabled we defer the `unlink`
//! briefly; if a matching `add` arrives first, both collapse into a single
//! `change`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct PendingUnlink {
    pub was_dir: bool,
}

#[derive(Debug, Default)]
pub struct PendingUnlinkTable {
    slots: HashMap<PathBuf, PendingUnlink>,
}

impl PendingUnlinkTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defers the `unlink`/`unlinkDir` for `path`. Returns `true` if this is
    /// a new deferral the caller should schedule a drain timer for.
    pub fn defer(&mut self, path: &Path, was_dir: bool) -> bool {
        self.slots
            .insert(path.to_path_buf(), PendingUnlink { was_dir })
            .is_none()
    }

    pub fn has_pending(&self, path: &Path) -> bool {
        self.slots.contains_key(path)
    }

    /// A matching `add` arrived before the drain timer fired: collapse into
    /// `change` and cancel the deferred unlink.
    pub fn collapse_on_add(&mut self, path: &Path) -> Option<PendingUnlink> {
        self.slots.remove(path)
    }

    /// The drain timer fired with no matching `add`: the `unlink` proceeds.
    /// Returns `None` if an `add` already collapsed it in the meantime.
    pub fn drain(&mut self, path: &Path) -> Option<PendingUnlink> {
        self.slots.remove(path)
    }
}

/// Per §4.9 step 3: under `atomic` mode, a dotfile basename (editor swap
/// file, e.g. `.file.txt.swp`) is a temporary artifact and never emitted.
pub fn is_editor_swapfile(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}
