//! End-to-end watch scenarios exercising the dispatcher against a real
//! filesystem. Each test gives the backend a generous but bounded window to
//! report the expected event before failing, rather than asserting on exact
//! timing.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use tempfile::tempdir;
use tokio::time::timeout;

use watchful::{watch, Atomic, AwaitWriteFinish, Event, EventKind, WatchOptions};

async fn next_matching<F>(
    rx: &mut tokio::sync::broadcast::Receiver<Event>,
    within: Duration,
    mut pred: F,
) -> Option<Event>
where
    F: FnMut(&Event) -> bool,
{
    let deadline = tokio::time::Instant::now() + within;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return None;
        }
        match timeout(remaining, rx.recv()).await {
            Ok(Ok(event)) => {
                if pred(&event) {
                    return Some(event);
                }
            }
            _ => return None,
        }
    }
}

fn path_basename(path: &PathBuf) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string()
}

/// S1: watching an empty directory reaches `ready`, then a file created
/// afterward produces a single `add`.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn empty_dir_add_then_create() {
    let dir = tempdir().unwrap();
    let watcher = watch([dir.path().to_str().unwrap()], WatchOptions::new()).unwrap();
    let mut events = watcher.subscribe();

    let ready = next_matching(&mut events, Duration::from_secs(2), |e| e.kind() == EventKind::Ready).await;
    assert!(ready.is_some(), "expected a ready event");

    let file = dir.path().join("new.txt");
    fs::write(&file, b"hello").unwrap();

    let added = next_matching(&mut events, Duration::from_secs(3), |e| {
        matches!(e, Event::Add { path, .. } if path_basename(path) == "new.txt")
    })
    .await;
    assert!(added.is_some(), "expected an add event for new.txt");
}

/// S2: `ignore_initial` suppresses events for pre-existing entries but not
/// for files created after the watch starts.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ignore_initial_suppresses_existing_entries() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("pre-existing.txt"), b"old").unwrap();

    let options = WatchOptions::new().ignore_initial(true);
    let watcher = watch([dir.path().to_str().unwrap()], options).unwrap();
    let mut events = watcher.subscribe();

    // The only thing that should arrive before the new file appears is
    // `ready` — any `add`/`addDir` here would mean ignore_initial failed.
    let first = next_matching(&mut events, Duration::from_secs(2), |e| {
        matches!(e.kind(), EventKind::Ready | EventKind::Add | EventKind::AddDir)
    })
    .await;
    assert_eq!(first.map(|e| e.kind()), Some(EventKind::Ready));

    fs::write(dir.path().join("fresh.txt"), b"new").unwrap();
    let added = next_matching(&mut events, Duration::from_secs(3), |e| {
        matches!(e, Event::Add { path, .. } if path_basename(path) == "fresh.txt")
    })
    .await;
    assert!(added.is_some(), "expected add for the post-watch file");
}

/// S3: with `atomic` enabled, an unlink immediately followed by a matching
/// add (an editor's atomic save) collapses into a single `change`.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn atomic_collapses_unlink_then_add_into_change() {
    let dir = tempdir().unwrap();
    let target = dir.path().join("doc.txt");
    fs::write(&target, b"v1").unwrap();

    let options = WatchOptions::new()
        .ignore_initial(true)
        .atomic(Atomic {
            delay: Duration::from_millis(80),
        });
    let watcher = watch([dir.path().to_str().unwrap()], options).unwrap();
    let mut events = watcher.subscribe();

    let _ready = next_matching(&mut events, Duration::from_secs(2), |e| e.kind() == EventKind::Ready).await;

    fs::remove_file(&target).unwrap();
    fs::write(&target, b"v2").unwrap();

    let settled = next_matching(&mut events, Duration::from_secs(3), |e| {
        matches!(e.kind(), EventKind::Change | EventKind::Unlink)
    })
    .await;
    assert_eq!(
        settled.map(|e| e.kind()),
        Some(EventKind::Change),
        "atomic save should collapse to change, not a bare unlink"
    );
}

/// S4: with `await_write_finish`, a file growing over several writes only
/// produces one `add` once its size has been stable across polls.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn await_write_finish_gates_growing_files() {
    let dir = tempdir().unwrap();

    let options = WatchOptions::new().await_write_finish(AwaitWriteFinish {
        stability_threshold: Duration::from_millis(150),
        poll_interval: Duration::from_millis(30),
    });
    let watcher = watch([dir.path().to_str().unwrap()], options).unwrap();
    let mut events = watcher.subscribe();
    let _ready = next_matching(&mut events, Duration::from_secs(2), |e| e.kind() == EventKind::Ready).await;

    let file = dir.path().join("growing.bin");
    fs::write(&file, vec![0u8; 10]).unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    fs::write(&file, vec![0u8; 100]).unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    fs::write(&file, vec![0u8; 1000]).unwrap();

    let added = next_matching(&mut events, Duration::from_secs(3), |e| {
        matches!(e, Event::Add { path, .. } if path_basename(path) == "growing.bin")
    })
    .await;
    match added {
        Some(Event::Add { stat: Some(stat), .. }) => {
            assert_eq!(stat.size, 1000, "should report the final, stable size");
        }
        other => panic!("expected a settled add event, got {other:?}"),
    }
}

/// S5: a path matching an `ignored` glob never reaches the event stream.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ignored_glob_pattern_is_never_reported() {
    let dir = tempdir().unwrap();
    let options = WatchOptions::new().ignored(["*.log"]);
    let watcher = watch([dir.path().to_str().unwrap()], options).unwrap();
    let mut events = watcher.subscribe();
    let _ready = next_matching(&mut events, Duration::from_secs(2), |e| e.kind() == EventKind::Ready).await;

    fs::write(dir.path().join("debug.log"), b"noise").unwrap();
    fs::write(dir.path().join("data.txt"), b"signal").unwrap();

    let first_add = next_matching(&mut events, Duration::from_secs(3), |e| e.kind() == EventKind::Add).await;
    match first_add {
        Some(Event::Add { path, .. }) => {
            assert_eq!(path_basename(&path), "data.txt", "ignored .log file should never surface");
        }
        other => panic!("expected an add event for data.txt, got {other:?}"),
    }
}

/// S6: the polling backend notices a safe-save replace (rename a temp file
/// over the target) as a change even though no native OS event drives it.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn polling_backend_detects_replace_over_existing_file() {
    let dir = tempdir().unwrap();
    let target = dir.path().join("config.toml");
    fs::write(&target, b"a = 1").unwrap();

    let options = WatchOptions::new()
        .use_polling(true)
        .interval(Duration::from_millis(40))
        .ignore_initial(true);
    let watcher = watch([dir.path().to_str().unwrap()], options).unwrap();
    let mut events = watcher.subscribe();
    let _ready = next_matching(&mut events, Duration::from_secs(2), |e| e.kind() == EventKind::Ready).await;

    let tmp = dir.path().join("config.toml.tmp");
    fs::write(&tmp, b"a = 2").unwrap();
    fs::rename(&tmp, &target).unwrap();

    let changed = next_matching(&mut events, Duration::from_secs(3), |e| {
        matches!(e, Event::Change { path, .. } if path_basename(path) == "config.toml")
    })
    .await;
    assert!(changed.is_some(), "expected the poller to detect the replace as a change");
}

/// `cwd` rewrites every emitted path relative to the configured directory
/// rather than the absolute, canonicalized form.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cwd_option_rewrites_paths_relative_to_itself() {
    let dir = tempdir().unwrap();
    let options = WatchOptions::new().cwd(dir.path());
    let watcher = watch([dir.path().to_str().unwrap()], options).unwrap();
    let mut events = watcher.subscribe();
    let _ready = next_matching(&mut events, Duration::from_secs(2), |e| e.kind() == EventKind::Ready).await;

    fs::write(dir.path().join("rel.txt"), b"hi").unwrap();
    let added = next_matching(&mut events, Duration::from_secs(3), |e| e.kind() == EventKind::Add).await;
    match added {
        Some(Event::Add { path, .. }) => {
            assert_eq!(path, PathBuf::from("rel.txt"), "path should be relative to cwd, not absolute");
        }
        other => panic!("expected an add event for rel.txt, got {other:?}"),
    }
}

/// A literal watch root that is itself a single file (not a directory to
/// recurse into) still produces its own `add` before `ready` (§8 invariant
/// 1) — the directory walker never reports the root path itself.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn watching_a_single_file_root_emits_its_own_add() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("solo.txt");
    fs::write(&file, b"content").unwrap();

    let watcher = watch([file.to_str().unwrap()], WatchOptions::new()).unwrap();
    let mut events = watcher.subscribe();

    let added = next_matching(&mut events, Duration::from_secs(2), |e| {
        matches!(e, Event::Add { path, .. } if path_basename(path) == "solo.txt")
    })
    .await;
    assert!(added.is_some(), "a single-file watch root should itself emit an add");
}

/// `unwatch` stops reporting changes for a removed root while leaving the
/// rest of the watch set active.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unwatch_silences_just_that_root() {
    let dir = tempdir().unwrap();
    let kept = dir.path().join("kept");
    let dropped = dir.path().join("dropped");
    fs::create_dir_all(&kept).unwrap();
    fs::create_dir_all(&dropped).unwrap();

    let watcher = watch(
        [kept.to_str().unwrap(), dropped.to_str().unwrap()],
        WatchOptions::new().ignore_initial(true),
    )
    .unwrap();
    let mut events = watcher.subscribe();
    let _ready = next_matching(&mut events, Duration::from_secs(2), |e| e.kind() == EventKind::Ready).await;

    watcher.unwatch([dropped.to_str().unwrap()]).await.unwrap();

    fs::write(dropped.join("ignored.txt"), b"noise").unwrap();
    fs::write(kept.join("seen.txt"), b"signal").unwrap();

    let added = next_matching(&mut events, Duration::from_secs(3), |e| e.kind() == EventKind::Add).await;
    match added {
        Some(Event::Add { path, .. }) => {
            assert_eq!(path_basename(&path), "seen.txt", "unwatched root should never surface its events");
        }
        other => panic!("expected an add event for seen.txt, got {other:?}"),
    }
}

/// Adding more individually-named sibling files than the native backend's
/// consolidation threshold still reports changes for every one of them —
/// exercising the "watch the parent once and filter" path (§4.6, §9) rather
/// than one backend handle per file.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn many_sibling_roots_still_report_changes_after_consolidation() {
    let dir = tempdir().unwrap();
    let mut files = Vec::new();
    for i in 0..15 {
        let f = dir.path().join(format!("f{i}.txt"));
        fs::write(&f, b"v1").unwrap();
        files.push(f);
    }

    let paths: Vec<&str> = files.iter().map(|f| f.to_str().unwrap()).collect();
    let watcher = watch(paths, WatchOptions::new().ignore_initial(true)).unwrap();
    let mut events = watcher.subscribe();
    let _ready = next_matching(&mut events, Duration::from_secs(2), |e| e.kind() == EventKind::Ready).await;

    // The last-added sibling is the one whose add crossed the consolidation
    // threshold; a neighbor never explicitly watched must stay silent.
    fs::write(dir.path().join("neighbor.txt"), b"noise").unwrap();
    fs::write(&files[14], b"v2").unwrap();

    let changed = next_matching(&mut events, Duration::from_secs(3), |e| {
        matches!(e, Event::Change { path, .. } if path_basename(path) == "f14.txt")
    })
    .await;
    assert!(changed.is_some(), "expected a change event for the 15th sibling after consolidation");
}
