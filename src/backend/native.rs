//! Native-event backend.
//!
//! Subscribes at the `glob_parent` of each requested path using `notify`'s
//! recommended (OS-native, recursive) watcher. This backend does not
//! pre-debounce: throttling and write-settle both belong to the
//! dispatcher, so raw events are forwarded as soon as they're classified.

use std::path::Path;

use notify::event::{EventKind as NotifyKind, ModifyKind, RenameMode};
use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::warn;

use crate::backend::{BackendKind, BackendMsg};
use crate::error::{Result, WatchError};
use crate::stat;

/// Owns the OS watch handle; dropping it unsubscribes (§5, "refcounted
/// container... OS handle is released when the refcount drops to zero" —
/// the refcounting itself lives in the dispatcher's handle table, this is
/// just the leaf handle).
pub struct NativeHandle {
    _watcher: RecommendedWatcher,
}

/// Subscribes recursively at `root`, forwarding every event onto `tx`.
pub fn subscribe(root: &Path, tx: mpsc::Sender<BackendMsg>) -> Result<NativeHandle> {
    let root_owned = root.to_path_buf();
    let mut watcher = RecommendedWatcher::new(
        move |res: std::result::Result<Event, notify::Error>| {
            handle_notify_result(res, &root_owned, &tx);
        },
        NotifyConfig::default(),
    )
    .map_err(|err| WatchError::BackendInitFailed {
        path: root.to_path_buf(),
        reason: err.to_string(),
    })?;

    watcher
        .watch(root, RecursiveMode::Recursive)
        .map_err(|err| WatchError::BackendInitFailed {
            path: root.to_path_buf(),
            reason: err.to_string(),
        })?;

    Ok(NativeHandle { _watcher: watcher })
}

fn handle_notify_result(
    res: std::result::Result<Event, notify::Error>,
    root: &Path,
    tx: &mpsc::Sender<BackendMsg>,
) {
    match res {
        Ok(event) => handle_event(event, root, tx),
        Err(err) => {
            let msg = BackendMsg::Fault {
                backend: BackendKind::Native,
                path: None,
                error: WatchError::OsWatchFault {
                    path: root.to_path_buf(),
                    reason: err.to_string(),
                },
            };
            if tx.blocking_send(msg).is_err() {
                warn!("native backend: dispatcher channel closed, dropping fault");
            }
        }
    }
}

fn handle_event(event: Event, root: &Path, tx: &mpsc::Sender<BackendMsg>) {
    match &event.kind {
        NotifyKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() >= 2 => {
            let from = event.paths[0].clone();
            let to = event.paths[1].clone();
            match stat::lstat(&to) {
                Ok(to_stat) => send(
                    tx,
                    BackendMsg::Renamed {
                        backend: BackendKind::Native,
                        from,
                        to,
                        to_stat,
                    },
                ),
                Err(err) => send_fault(tx, &to, err),
            }
        }
        // `Other` covers platform-specific overflow/rescan signals (e.g. an
        // inotify queue overflow, or Windows' buffer-overflow notification)
        // that carry no reliable per-path delta (§4.6).
        NotifyKind::Other => {
            send(tx, BackendMsg::ForceRescan { root: root.to_path_buf() });
        }
        _ => {
            for path in &event.paths {
                let raw_description = format!("{:?}", event.kind);
                // `NotFound` legitimately means "gone" and is forwarded as
                // such; a permission/other I/O failure is surfaced as a
                // fault instead of being silently folded into "gone" (§7).
                match stat::lstat(path) {
                    Ok(observed_stat) => send(
                        tx,
                        BackendMsg::PathObserved {
                            backend: BackendKind::Native,
                            path: path.clone(),
                            stat: observed_stat,
                            raw_description,
                        },
                    ),
                    Err(err) => send_fault(tx, path, err),
                }
            }
        }
    }
}

fn send(tx: &mpsc::Sender<BackendMsg>, msg: BackendMsg) {
    if tx.blocking_send(msg).is_err() {
        warn!("native backend: dispatcher channel closed, dropping event");
    }
}

fn send_fault(tx: &mpsc::Sender<BackendMsg>, path: &Path, error: WatchError) {
    send(
        tx,
        BackendMsg::Fault {
            backend: BackendKind::Native,
            path: Some(path.to_path_buf()),
            error,
        },
    );
}

/// Path the native backend should subscribe a *new* watch path onto: when
/// more than [`CONSOLIDATE_THRESHOLD`] sibling paths already share the same
/// parent, the caller should subscribe the parent once instead of one
/// handle per child (§4.6 consolidation, §9).
pub const CONSOLIDATE_THRESHOLD: usize = 10;

pub fn should_consolidate(sibling_count: usize) -> bool {
    sibling_count > CONSOLIDATE_THRESHOLD
}
