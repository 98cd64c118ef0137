//! Throttle/debounce table (spec §4.4).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThrottleKind {
    /// Default window 50ms.
    Change,
    /// 5ms — collapses bursts from layered OS events on the same inode.
    WatchAttach,
    /// 1000ms — prevents storms when many children change in one directory.
    Readdir,
}

impl ThrottleKind {
    pub fn default_window(self) -> Duration {
        match self {
            ThrottleKind::Change => Duration::from_millis(50),
            ThrottleKind::WatchAttach => Duration::from_millis(5),
            ThrottleKind::Readdir => Duration::from_millis(1000),
        }
    }
}

#[derive(Debug, Default)]
struct Slot {
    suppressed_count: u64,
}

/// `try_acquire(kind, path, window_ms) -> {fresh | suppressed}`.
#[derive(Debug, Default)]
pub struct ThrottleTable {
    slots: HashMap<(ThrottleKind, PathBuf), Slot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    /// A new slot was reserved; the caller must schedule its release after
    /// the window elapses (the dispatcher does this via a `DelayQueue`).
    Fresh,
    /// An existing slot absorbed this event; `suppressed_count` is the
    /// running total of collapsed duplicates.
    Suppressed { suppressed_count: u64 },
}

impl ThrottleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&mut self, kind: ThrottleKind, path: &Path) -> Acquire {
        let key = (kind, path.to_path_buf());
        if let Some(slot) = self.slots.get_mut(&key) {
            slot.suppressed_count += 1;
            Acquire::Suppressed {
                suppressed_count: slot.suppressed_count,
            }
        } else {
            self.slots.insert(key, Slot::default());
            Acquire::Fresh
        }
    }

    /// Called when the scheduled window elapses; drops the slot so the next
    /// event for `(kind, path)` is fresh again.
    pub fn release(&mut self, kind: ThrottleKind, path: &Path) {
        self.slots.remove(&(kind, path.to_path_buf()));
    }

    pub fn is_active(&self, kind: ThrottleKind, path: &Path) -> bool {
        self.slots.contains_key(&(kind, path.to_path_buf()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_acquire_is_fresh_then_suppressed() {
        let mut table = ThrottleTable::new();
        let p = PathBuf::from("/a/b");
        assert_eq!(table.try_acquire(ThrottleKind::Change, &p), Acquire::Fresh);
        assert_eq!(
            table.try_acquire(ThrottleKind::Change, &p),
            Acquire::Suppressed { suppressed_count: 1 }
        );
        assert_eq!(
            table.try_acquire(ThrottleKind::Change, &p),
            Acquire::Suppressed { suppressed_count: 2 }
        );
    }

    #[test]
    fn release_frees_the_slot_for_reuse() {
        let mut table = ThrottleTable::new();
        let p = PathBuf::from("/a/b");
        table.try_acquire(ThrottleKind::Change, &p);
        table.release(ThrottleKind::Change, &p);
        assert_eq!(table.try_acquire(ThrottleKind::Change, &p), Acquire::Fresh);
    }

    #[test]
    fn kinds_are_independent_per_path() {
        let mut table = ThrottleTable::new();
        let p = PathBuf::from("/a/b");
        assert_eq!(table.try_acquire(ThrottleKind::Change, &p), Acquire::Fresh);
        assert_eq!(table.try_acquire(ThrottleKind::Readdir, &p), Acquire::Fresh);
    }
}
