//! Per-dir-watch backend (spec §4.7).
//!
//! For platforms where the OS tells you "this directory changed" without
//! saying what. `notify`'s non-recursive subscriptions behave exactly this
//! way on backends that don't expose per-file deltas (e.g. kqueue) — this
//! backend deliberately discards the per-file detail `notify` *does* hand
//! back and only forwards which directory fired, so the dispatcher always
//! re-lists and diffs against the registry per §4.7's algorithm rather than
//! trusting backend-reported specifics.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::warn;

use crate::backend::{BackendKind, BackendMsg};
use crate::error::{Result, WatchError};

/// One shared OS watcher with a non-recursive subscription per directory —
/// consolidating into a single handle instead of one per directory matches
/// `notify`'s intended usage and keeps the per-directory resource sharing of
/// §5 trivial (unwatching a directory is just `unwatch(dir)`).
pub struct PerDirBackend {
    watcher: RecommendedWatcher,
    watched: HashMap<PathBuf, ()>,
}

impl PerDirBackend {
    pub fn new(tx: mpsc::Sender<BackendMsg>) -> Result<Self> {
        let watcher = RecommendedWatcher::new(
            move |res: std::result::Result<Event, notify::Error>| {
                handle_result(res, &tx);
            },
            NotifyConfig::default(),
        )
        .map_err(|err| WatchError::BackendInitFailed {
            path: PathBuf::new(),
            reason: err.to_string(),
        })?;

        Ok(Self {
            watcher,
            watched: HashMap::new(),
        })
    }

    pub fn watch_dir(&mut self, dir: &Path) -> Result<()> {
        if self.watched.contains_key(dir) {
            return Ok(());
        }
        self.watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|err| WatchError::BackendInitFailed {
                path: dir.to_path_buf(),
                reason: err.to_string(),
            })?;
        self.watched.insert(dir.to_path_buf(), ());
        Ok(())
    }

    pub fn unwatch_dir(&mut self, dir: &Path) {
        if self.watched.remove(dir).is_some() {
            let _ = self.watcher.unwatch(dir);
        }
    }

    pub fn is_watching(&self, dir: &Path) -> bool {
        self.watched.contains_key(dir)
    }
}

fn handle_result(res: std::result::Result<Event, notify::Error>, tx: &mpsc::Sender<BackendMsg>) {
    match res {
        Ok(event) => {
            // Only the directory matters here (§4.7); derive it from the
            // first reported path and deliberately drop the rest of the
            // event's detail.
            let Some(first) = event.paths.first() else {
                return;
            };
            let dir = if first.is_dir() {
                first.clone()
            } else {
                first.parent().map(Path::to_path_buf).unwrap_or_else(|| first.clone())
            };
            if tx.blocking_send(BackendMsg::DirectoryChanged { dir }).is_err() {
                warn!("per-dir backend: dispatcher channel closed, dropping signal");
            }
        }
        Err(err) => {
            let msg = BackendMsg::Fault {
                backend: BackendKind::PerDir,
                path: None,
                error: WatchError::OsWatchFault {
                    path: PathBuf::new(),
                    reason: err.to_string(),
                },
            };
            let _ = tx.blocking_send(msg);
        }
    }
}
