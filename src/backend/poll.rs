//! Polling backend (spec §4.8).
//!
//! The fallback that works everywhere: periodically re-`walk`s each watched
//! root and diffs the fresh listing against its own last-seen snapshot. No
//! OS notification primitive is involved, so — unlike `native`/`per_dir` —
//! this backend runs as a plain `tokio::task`, grounded on the pack's
//! `LogSleuth` poller (`walkdir` sweep + stat comparison on a timer) rather
//! than on anything in `notify`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::backend::{BackendKind, BackendMsg};
use crate::scan::{self, ScanEntry};
use crate::stat::Stat;

/// Extensions treated as binary for the purpose of picking the slower
/// `binary_interval` cadence (§6: "binaryInterval ... used for binary
/// files"). Source-ish extensions always get the faster `interval`.
const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "pdf", "zip", "gz", "tar", "7z", "rar",
    "exe", "dll", "so", "dylib", "bin", "wasm", "sqlite", "db", "mp3", "mp4", "mov", "avi", "ttf",
    "woff", "woff2",
];

fn is_binary_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| BINARY_EXTENSIONS.iter().any(|b| b.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

pub struct PollBackend {
    handle: JoinHandle<()>,
}

impl PollBackend {
    /// Spawns the sweep loop for `root`. `interval`/`binary_interval` pick
    /// the cadence per §6; `max_depth`/`follow_symlinks` mirror the scan
    /// used for the initial walk so polling sees the same tree shape.
    pub fn spawn(
        root: PathBuf,
        tx: mpsc::Sender<BackendMsg>,
        interval: Duration,
        binary_interval: Duration,
        max_depth: Option<usize>,
        follow_symlinks: bool,
    ) -> Self {
        let handle = tokio::spawn(async move {
            run(root, tx, interval, binary_interval, max_depth, follow_symlinks).await;
        });
        PollBackend { handle }
    }
}

impl Drop for PollBackend {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn run(
    root: PathBuf,
    tx: mpsc::Sender<BackendMsg>,
    interval: Duration,
    binary_interval: Duration,
    max_depth: Option<usize>,
    follow_symlinks: bool,
) {
    // The tightest cadence any path in the tree could need; per-path gating
    // against `next_due` below keeps binary files from being re-stat'd on
    // every tick.
    let tick = interval.min(binary_interval).max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut known: HashMap<PathBuf, KnownEntry> = HashMap::new();
    let mut next_due: HashMap<PathBuf, tokio::time::Instant> = HashMap::new();

    // The dispatcher's own initial scan (`scan_and_seed`) already reported
    // every pre-existing entry; priming the baseline here — without sending
    // anything — keeps the first tick from re-reporting all of them as a
    // burst of phantom `change`s.
    for entry in scan::walk(&root, max_depth, follow_symlinks) {
        known.insert(
            entry.path.clone(),
            KnownEntry {
                stat: entry.stat.clone(),
                is_dir: entry.is_dir,
            },
        );
    }

    loop {
        ticker.tick().await;
        let now = tokio::time::Instant::now();

        let entries = scan::walk(&root, max_depth, follow_symlinks);
        let mut seen: std::collections::HashSet<PathBuf> =
            std::collections::HashSet::with_capacity(entries.len());

        for entry in &entries {
            seen.insert(entry.path.clone());

            let cadence = if is_binary_path(&entry.path) {
                binary_interval
            } else {
                interval
            };
            let due = next_due.get(&entry.path).copied().unwrap_or(now);
            if now < due {
                continue;
            }
            next_due.insert(entry.path.clone(), now + cadence);

            if !report_if_changed(entry, &known, &tx).await {
                continue;
            }
            known.insert(
                entry.path.clone(),
                KnownEntry {
                    stat: entry.stat.clone(),
                    is_dir: entry.is_dir,
                },
            );
        }

        // Anything previously known but missing from this sweep is gone —
        // report it once, then drop it from the snapshot.
        let vanished: Vec<PathBuf> = known
            .keys()
            .filter(|path| !seen.contains(*path))
            .cloned()
            .collect();
        for path in vanished {
            known.remove(&path);
            next_due.remove(&path);
            let sent = tx
                .send(BackendMsg::PathObserved {
                    backend: BackendKind::Poll,
                    path,
                    stat: None,
                    raw_description: "poll: vanished".to_string(),
                })
                .await;
            if sent.is_err() {
                warn!("poll backend: dispatcher channel closed, stopping sweep");
                return;
            }
        }
    }
}

struct KnownEntry {
    stat: Option<Stat>,
    is_dir: bool,
}

/// Returns `true` (and sends a message) when `entry` is new or its stat
/// changed since the last sweep. Inode changes (Linux safe-save: the editor
/// unlinks and recreates the file under the same name) count as a change
/// even when size/mtime happen to coincide, per §4.8.
async fn report_if_changed(
    entry: &ScanEntry,
    known: &HashMap<PathBuf, KnownEntry>,
    tx: &mpsc::Sender<BackendMsg>,
) -> bool {
    let changed = match known.get(&entry.path) {
        None => true,
        Some(prev) => {
            prev.is_dir != entry.is_dir
                || match (&prev.stat, &entry.stat) {
                    (Some(old), Some(new)) => {
                        old.size != new.size || old.mtime != new.mtime || old.ino != new.ino
                    }
                    (None, Some(_)) | (Some(_), None) => true,
                    (None, None) => false,
                }
        }
    };

    if !changed {
        return false;
    }

    let sent = tx
        .send(BackendMsg::PathObserved {
            backend: BackendKind::Poll,
            path: entry.path.clone(),
            stat: entry.stat.clone(),
            raw_description: "poll: sweep".to_string(),
        })
        .await;
    sent.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_extensions_are_recognized_case_insensitively() {
        assert!(is_binary_path(Path::new("/a/photo.PNG")));
        assert!(is_binary_path(Path::new("/a/archive.zip")));
        assert!(!is_binary_path(Path::new("/a/main.rs")));
        assert!(!is_binary_path(Path::new("/a/README")));
    }
}
