//! The watcher's single mutable-state owner (spec §5).
//!
//! One task owns the directory registry, throttle table, write-settle table,
//! pending-unlink table, symlink map, ignore filter, and every backend
//! handle. Backends only ever produce [`BackendMsg`]s onto one channel;
//! commands from [`crate::Watcher`] arrive on another. Nothing here is
//! shared across threads, so none of this needs a mutex — grounded on
//! `ferrex-core`'s `fs_watch` actor, which owns its session table the same
//! way.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::time::DelayQueue;
use tracing::{debug, warn};

use crate::atomic::{is_editor_swapfile, PendingUnlinkTable};
use crate::backend::native::NativeHandle;
use crate::backend::per_dir::PerDirBackend;
use crate::backend::poll::PollBackend;
use crate::backend::{BackendKind, BackendMsg};
use crate::error::{Result, WatchError};
use crate::events::{Event, RawEvent};
use crate::glob_matcher::GlobMatcher;
use crate::ignore::IgnoreFilter;
use crate::options::WatchOptions;
use crate::path_util;
use crate::registry::DirectoryRegistry;
use crate::scan::{self, ScanEntry};
use crate::stat::{self, Stat};
use crate::symlink_map::SymlinkMap;
use crate::throttle::{Acquire, ThrottleKind, ThrottleTable};
use crate::write_settle::{PendingKind, PollOutcome, WriteSettleTable};

/// Requests from [`crate::Watcher`] into the dispatcher task.
pub enum Command {
    Add {
        paths: Vec<String>,
        reply: oneshot::Sender<Result<()>>,
    },
    Unwatch {
        paths: Vec<String>,
        reply: oneshot::Sender<Result<()>>,
    },
    GetWatched {
        reply: oneshot::Sender<BTreeMap<PathBuf, Vec<String>>>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// Keeps each root's backend handle alive for as long as the root is
/// watched; dropping the entry releases the OS subscription.
#[allow(dead_code)]
enum RootBackend {
    Native(NativeHandle),
    PerDir,
    Poll(PollBackend),
}

#[derive(Debug, Clone)]
enum TimerKey {
    ThrottleRelease(ThrottleKind, PathBuf),
    WriteSettlePoll(PathBuf),
    PendingUnlinkDrain(PathBuf),
}

pub struct Dispatcher {
    options: WatchOptions,
    event_tx: broadcast::Sender<Event>,
    backend_tx: mpsc::Sender<BackendMsg>,
    backend_rx: mpsc::Receiver<BackendMsg>,
    cmd_rx: mpsc::Receiver<Command>,

    registry: DirectoryRegistry,
    throttle: ThrottleTable,
    write_settle: WriteSettleTable,
    pending_unlink: PendingUnlinkTable,
    symlink_map: SymlinkMap,
    ignore: IgnoreFilter,

    roots: HashMap<PathBuf, RootBackend>,
    per_dir_backend: Option<PerDirBackend>,
    per_dir_known: HashSet<PathBuf>,
    glob_filters: Vec<(PathBuf, GlobMatcher)>,

    /// Individually-added literal roots, grouped by shared parent, tracked
    /// so a crossing of [`crate::backend::native::CONSOLIDATE_THRESHOLD`]
    /// can be detected (§4.6 consolidation, §9).
    literal_members: HashMap<PathBuf, HashSet<PathBuf>>,
    /// Parents that have been consolidated onto a single native subscription,
    /// each with the set of individually-requested paths that remain allowed
    /// to emit — everything else under the parent is in-process filtered out.
    consolidated_parents: HashMap<PathBuf, HashSet<PathBuf>>,

    /// Last-seen `Stat` per path, consulted by `rescan_directory` so a
    /// per-dir-watch backend's `DirectoryChanged` (which carries no per-file
    /// detail) only turns into a `change` for children whose `mtime`/`size`/
    /// `ino` actually moved (§4.7 step 4), rather than one for every child on
    /// every signal.
    last_seen_stat: HashMap<PathBuf, Stat>,

    timers: DelayQueue<TimerKey>,

    closed: bool,
    ready_pending: usize,
    ready_emitted: bool,
}

impl Dispatcher {
    pub fn new(
        options: WatchOptions,
        event_tx: broadcast::Sender<Event>,
        cmd_rx: mpsc::Receiver<Command>,
    ) -> Result<Self> {
        let (backend_tx, backend_rx) = mpsc::channel(1024);
        let atomic_dotfiles = options.atomic.is_some();
        let mut ignore = IgnoreFilter::new(atomic_dotfiles, false, options.expansion_limit);
        ignore.set_patterns(options.ignored.clone())?;

        Ok(Self {
            options,
            event_tx,
            backend_tx,
            backend_rx,
            cmd_rx,
            registry: DirectoryRegistry::new(),
            throttle: ThrottleTable::new(),
            write_settle: WriteSettleTable::new(),
            pending_unlink: PendingUnlinkTable::new(),
            symlink_map: SymlinkMap::new(),
            ignore,
            roots: HashMap::new(),
            per_dir_backend: None,
            per_dir_known: HashSet::new(),
            glob_filters: Vec::new(),
            literal_members: HashMap::new(),
            consolidated_parents: HashMap::new(),
            last_seen_stat: HashMap::new(),
            timers: DelayQueue::new(),
            closed: false,
            ready_pending: 0,
            ready_emitted: false,
        })
    }

    pub async fn run(mut self, initial_paths: Vec<String>) {
        if !initial_paths.is_empty() {
            if let Err(err) = self.add_paths(initial_paths).await {
                self.emit(Event::Error(std::sync::Arc::new(err)));
            }
        }
        self.maybe_emit_ready();

        loop {
            if self.closed {
                break;
            }
            tokio::select! {
                Some(cmd) = self.cmd_rx.recv() => {
                    if self.handle_command(cmd).await {
                        break;
                    }
                }
                Some(msg) = self.backend_rx.recv() => {
                    self.handle_backend_msg(msg).await;
                }
                Some(expired) = futures_next(&mut self.timers) => {
                    self.handle_timer(expired.into_inner()).await;
                }
                else => break,
            }
        }
    }

    async fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Add { paths, reply } => {
                let result = self.add_paths(paths).await;
                self.maybe_emit_ready();
                let _ = reply.send(result);
                false
            }
            Command::Unwatch { paths, reply } => {
                let result = self.unwatch_paths(paths);
                let _ = reply.send(result);
                false
            }
            Command::GetWatched { reply } => {
                let _ = reply.send(self.registry.snapshot());
                false
            }
            Command::Close { reply } => {
                self.closed = true;
                self.roots.clear();
                self.per_dir_backend = None;
                let _ = reply.send(());
                true
            }
        }
    }

    // ---- add/unwatch --------------------------------------------------

    async fn add_paths(&mut self, paths: Vec<String>) -> Result<()> {
        for raw in paths {
            let (pattern, negated) = path_util::strip_negation(&raw);
            let normalized = path_util::normalize(pattern);
            if negated {
                self.ignore.add_explicit(PathBuf::from(&normalized));
                continue;
            }

            if self.options.disable_globbing || !path_util::is_glob(&normalized) {
                self.add_literal_root(PathBuf::from(&normalized)).await?;
            } else {
                let parent = path_util::glob_parent(&normalized);
                let matcher = GlobMatcher::compile(
                    &[normalized.clone()],
                    false,
                    self.options.expansion_limit,
                )?;
                self.add_glob_root(PathBuf::from(parent), matcher).await?;
            }
        }
        Ok(())
    }

    fn unwatch_paths(&mut self, paths: Vec<String>) -> Result<()> {
        for raw in paths {
            let (pattern, _) = path_util::strip_negation(&raw);
            let normalized = path_util::normalize(pattern);
            let path = PathBuf::from(&normalized);
            self.ignore.add_explicit(path.clone());
            self.roots.remove(&path);
            if let Some(parent) = path.parent() {
                if let Some(allowed) = self.consolidated_parents.get_mut(parent) {
                    allowed.remove(&path);
                }
            }
            if self.per_dir_known.remove(&path) {
                if let Some(backend) = self.per_dir_backend.as_mut() {
                    backend.unwatch_dir(&path);
                }
            }
        }
        Ok(())
    }

    async fn add_literal_root(&mut self, root: PathBuf) -> Result<()> {
        if self.roots.contains_key(&root) {
            return Ok(());
        }

        // A root whose parent is already consolidated (§4.6) just joins the
        // existing parent subscription's allow-list instead of getting a
        // backend handle of its own.
        if let Some(parent) = root.parent() {
            if let Some(allowed) = self.consolidated_parents.get_mut(parent) {
                allowed.insert(root.clone());
                self.ready_pending += 1;
                self.scan_and_seed(&root, &root);
                return Ok(());
            }
        }

        let real_root = if self.options.follow_symlinks {
            resolve_symlink_chain(&root, &mut self.symlink_map)
        } else {
            root.clone()
        };

        if let Some(parent) = root.parent().map(Path::to_path_buf) {
            let siblings = self.literal_members.entry(parent.clone()).or_default();
            siblings.insert(root.clone());
            let crossed_threshold = crate::backend::native::should_consolidate(siblings.len());
            let eligible = crossed_threshold
                && !self.options.use_polling
                && !forced_polling_host()
                && !self.roots.contains_key(&parent);
            if eligible {
                self.consolidate_parent(parent)?;
                self.ready_pending += 1;
                self.scan_and_seed(&real_root, &root);
                return Ok(());
            }
        }

        let (_, handle) = self.spawn_backend(&real_root)?;
        self.roots.insert(root.clone(), handle);

        self.ready_pending += 1;
        self.scan_and_seed(&real_root, &root);
        Ok(())
    }

    /// Replaces every individually-spawned backend rooted directly under
    /// `parent` with a single recursive subscription on `parent` itself,
    /// plus an in-process allow-list so siblings never explicitly added
    /// don't start emitting (§4.6 "watch the parent once and filter", §9).
    /// Already-scanned siblings keep their registry state; only the backend
    /// handle changes.
    fn consolidate_parent(&mut self, parent: PathBuf) -> Result<()> {
        let siblings = self.literal_members.remove(&parent).unwrap_or_default();
        for sibling in &siblings {
            self.roots.remove(sibling);
        }
        let (_, handle) = self.spawn_backend(&parent)?;
        self.roots.insert(parent.clone(), handle);
        self.consolidated_parents.insert(parent, siblings);
        Ok(())
    }

    /// `false` only when `path` falls under a consolidated parent (§4.6) and
    /// isn't one of the individually-requested siblings (or their
    /// descendants) that parent's subscription stands in for.
    fn passes_literal_consolidation(&self, path: &Path) -> bool {
        for (parent, allowed) in &self.consolidated_parents {
            if path.starts_with(parent) {
                return allowed.iter().any(|a| path == a || path.starts_with(a));
            }
        }
        true
    }

    async fn add_glob_root(&mut self, parent: PathBuf, matcher: GlobMatcher) -> Result<()> {
        // A glob pattern subscribes at its literal parent (§4.1
        // "glob_parent") and is additionally recorded as an allow-list:
        // a file under `parent` only reaches a consumer if *some* active
        // glob filter matches it, or no glob filters are registered at all.
        self.glob_filters.push((parent.clone(), matcher));
        self.add_literal_root(parent).await
    }

    /// `false` only when at least one glob filter is registered at an
    /// ancestor of `path` and none of them match it.
    fn passes_glob_filters(&self, path: &Path) -> bool {
        let normalized = path.to_string_lossy().replace('\\', "/");
        let mut applicable = self
            .glob_filters
            .iter()
            .filter(|(parent, _)| path.starts_with(parent))
            .peekable();
        if applicable.peek().is_none() {
            return true;
        }
        applicable.any(|(_, matcher)| matcher.matches(&normalized))
    }

    fn spawn_backend(&mut self, root: &Path) -> Result<(BackendKind, RootBackend)> {
        if self.options.use_polling || forced_polling_host() {
            let backend = PollBackend::spawn(
                root.to_path_buf(),
                self.backend_tx.clone(),
                self.options.interval,
                self.options.binary_interval,
                self.options.depth,
                self.options.follow_symlinks,
            );
            return Ok((BackendKind::Poll, RootBackend::Poll(backend)));
        }

        match crate::backend::native::subscribe(root, self.backend_tx.clone()) {
            Ok(handle) => Ok((BackendKind::Native, RootBackend::Native(handle))),
            Err(native_err) => {
                warn!(
                    path = %root.display(),
                    error = %native_err,
                    "native backend unavailable, falling back to per-dir-watch"
                );
                if self.per_dir_backend.is_none() {
                    self.per_dir_backend = Some(PerDirBackend::new(self.backend_tx.clone())?);
                }
                if let Some(backend) = self.per_dir_backend.as_mut() {
                    if backend.watch_dir(root).is_ok() {
                        self.per_dir_known.insert(root.to_path_buf());
                        return Ok((BackendKind::PerDir, RootBackend::PerDir));
                    }
                }
                let poll = PollBackend::spawn(
                    root.to_path_buf(),
                    self.backend_tx.clone(),
                    self.options.interval,
                    self.options.binary_interval,
                    self.options.depth,
                    self.options.follow_symlinks,
                );
                Ok((BackendKind::Poll, RootBackend::Poll(poll)))
            }
        }
    }

    /// Walks `real_root` once, seeding the registry and (unless
    /// `ignore_initial`) emitting `add`/`addDir` for every entry found.
    /// `display_root` is the user-facing root (may differ from `real_root`
    /// when a symlink was followed).
    fn scan_and_seed(&mut self, real_root: &Path, display_root: &Path) {
        let root_stat = stat::lstat(real_root).ok().flatten();
        let root_is_dir = root_stat.as_ref().map(|s| s.is_dir).unwrap_or(true);

        // Only directories get a registry entry of their own — `observe_gone`
        // uses `is_registered` to decide `unlink` vs `unlinkDir`, so a
        // literal root that's a plain file must stay out of it (§3 Invariant
        // A: the registry tracks directories, not every watched path).
        if root_is_dir {
            self.registry.touch(real_root);
        }
        if let Some(parent) = real_root.parent() {
            self.registry.add_child(
                parent,
                real_root.file_name().and_then(|n| n.to_str()).unwrap_or_default(),
            );
        }

        if !self.options.ignore_initial {
            let display_path = self.symlink_map.rewrite_to_symlink_view(display_root);
            match root_stat.as_ref() {
                // A literal root can itself be a single file (not just a
                // directory to recurse into) — §8 invariant 1 requires it
                // gets its own `add`, since `scan::walk` never reports the
                // root path itself.
                Some(s) if !s.is_dir => {
                    self.emit(Event::Add {
                        path: display_path,
                        stat: root_stat.clone(),
                    });
                }
                _ => {
                    self.emit(Event::AddDir {
                        path: display_path,
                        stat: root_stat.clone(),
                    });
                }
            }
        }

        let entries: Vec<ScanEntry> = scan::walk(real_root, self.options.depth, self.options.follow_symlinks);
        for entry in entries {
            let dir = entry.path.parent().unwrap_or(real_root).to_path_buf();
            self.registry.touch(&dir);
            let basename = entry
                .path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default();

            // Baseline for `rescan_directory`'s later mtime/size diffing —
            // established here, during the initial scan, so a subsequent
            // `DirectoryChanged` doesn't mistake an unmodified pre-existing
            // entry for one that just changed.
            if let Some(stat) = entry.stat.clone() {
                self.last_seen_stat.insert(entry.path.clone(), stat);
            }

            if entry.is_dir {
                self.registry.touch(&entry.path);
                self.registry.add_child(&dir, basename);
                if let Some(per_dir) = self.per_dir_backend.as_mut() {
                    if self.per_dir_known.insert(entry.path.clone()) {
                        let _ = per_dir.watch_dir(&entry.path);
                    }
                }
                if !self.options.ignore_initial {
                    let display_path = self.symlink_map.rewrite_to_symlink_view(&entry.path);
                    self.emit(Event::AddDir {
                        path: display_path,
                        stat: entry.stat.clone(),
                    });
                }
            } else {
                self.registry.add_child(&dir, basename);
                if self.is_ignored(&entry.path) || !self.passes_glob_filters(&entry.path) {
                    continue;
                }
                if !self.options.ignore_initial {
                    let display_path = self.symlink_map.rewrite_to_symlink_view(&entry.path);
                    self.emit(Event::Add {
                        path: display_path,
                        stat: entry.stat.clone(),
                    });
                }
            }
        }

        self.ready_pending = self.ready_pending.saturating_sub(1);
    }

    fn maybe_emit_ready(&mut self) {
        if !self.ready_emitted && self.ready_pending == 0 {
            self.ready_emitted = true;
            self.emit(Event::Ready);
        }
    }

    // ---- backend message handling --------------------------------------

    async fn handle_backend_msg(&mut self, msg: BackendMsg) {
        match msg {
            BackendMsg::PathObserved {
                backend,
                path,
                stat,
                raw_description,
            } => {
                // Layered OS events on the same inode (e.g. a metadata-changed
                // and a data-changed notification for one write) land within
                // microseconds of each other; WatchAttach collapses the `raw`
                // noise from that burst down to one entry without touching
                // the classification pipeline below, which stays correct
                // either way via the registry/Change-throttle (§4.4).
                if matches!(
                    self.throttle.try_acquire(ThrottleKind::WatchAttach, &path),
                    Acquire::Fresh
                ) {
                    self.timers.insert(
                        TimerKey::ThrottleRelease(ThrottleKind::WatchAttach, path.clone()),
                        ThrottleKind::WatchAttach.default_window(),
                    );
                    self.emit_raw(backend, &path, raw_description);
                }
                self.observe(path, stat);
            }
            BackendMsg::Renamed {
                backend,
                from,
                to,
                to_stat,
            } => {
                self.emit_raw(backend, &to, format!("rename from {}", from.display()));
                self.observe(from, None);
                self.observe(to, to_stat);
            }
            BackendMsg::DirectoryChanged { dir } => {
                if matches!(
                    self.throttle.try_acquire(ThrottleKind::Readdir, &dir),
                    Acquire::Suppressed { .. }
                ) {
                    return;
                }
                self.timers.insert(
                    TimerKey::ThrottleRelease(ThrottleKind::Readdir, dir.clone()),
                    ThrottleKind::Readdir.default_window(),
                );
                self.rescan_directory(&dir);
            }
            BackendMsg::ForceRescan { root } => {
                self.rescan_directory(&root);
            }
            BackendMsg::Fault { backend, path, error } => {
                debug!(backend = backend.label(), ?path, %error, "backend fault");
                if matches!(error, WatchError::Permission(_)) && self.options.ignore_permission_errors {
                    return;
                }
                self.emit(Event::Error(std::sync::Arc::new(error)));
            }
        }
    }

    /// Re-lists `dir` after a per-dir-watch backend's `DirectoryChanged`
    /// signal, which carries no detail beyond "something in here changed"
    /// (§4.7 step 4). A vanished child is reported outright; a still-present
    /// child only reaches [`Self::observe`] if its `mtime`/`size`/`ino`
    /// actually moved since the last time this directory was scanned —
    /// otherwise it's just the directory's own mtime ticking (or a sibling's
    /// change) and this entry is untouched.
    fn rescan_directory(&mut self, dir: &Path) {
        let fresh = scan::walk(dir, Some(0), self.options.follow_symlinks);
        let known_children = self.registry.children(dir);
        let fresh_names: HashSet<String> = fresh
            .iter()
            .filter_map(|e| e.path.file_name().and_then(|n| n.to_str()).map(String::from))
            .collect();

        for name in known_children {
            if !fresh_names.contains(&name) {
                let path = dir.join(&name);
                self.last_seen_stat.remove(&path);
                self.observe(path, None);
            }
        }

        for entry in fresh {
            let moved = match (self.last_seen_stat.get(&entry.path), entry.stat.as_ref()) {
                (None, _) | (Some(_), None) => true,
                (Some(prev), Some(new)) => {
                    prev.size != new.size || prev.mtime != new.mtime || prev.ino != new.ino
                }
            };
            if !moved {
                continue;
            }
            match entry.stat.clone() {
                Some(stat) => {
                    self.last_seen_stat.insert(entry.path.clone(), stat);
                }
                None => {
                    self.last_seen_stat.remove(&entry.path);
                }
            }
            self.observe(entry.path.clone(), entry.stat.clone());
        }
    }

    /// Core classification (spec §4.9 steps 1-7; step 8 is [`Self::emit`]).
    fn observe(&mut self, path: PathBuf, stat: Option<Stat>) {
        if self.closed {
            return;
        }
        if self.is_ignored(&path) {
            return;
        }
        if !self.passes_literal_consolidation(&path) {
            return;
        }

        match stat {
            None => self.observe_gone(path),
            Some(s) if s.is_dir => self.observe_dir(path, s),
            Some(s) => self.observe_file(path, s),
        }
    }

    fn observe_gone(&mut self, path: PathBuf) {
        if self.registry.is_registered(&path) {
            let children = self.registry.drop_dir(&path);
            for child in children {
                self.write_settle_cancel(&path.join(&child));
            }
            self.defer_or_emit_unlink(path, true);
            return;
        }

        let Some(dir) = path.parent().map(Path::to_path_buf) else {
            return;
        };
        let basename = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if !self.registry.remove_child(&dir, basename) {
            return;
        }
        self.write_settle_cancel(&path);
        self.defer_or_emit_unlink(path, false);
    }

    /// A racing unlink cancels a pending `add` outright (the write never
    /// happened, from the consumer's point of view) but merely lets a
    /// pending `change` evaporate (§4.5).
    fn write_settle_cancel(&mut self, path: &Path) {
        self.write_settle.cancel_wait(path);
    }

    fn defer_or_emit_unlink(&mut self, path: PathBuf, was_dir: bool) {
        if is_editor_swapfile(&path) && self.options.atomic.is_some() {
            // Swap-file artifacts never reach a consumer in atomic mode.
            return;
        }

        if let Some(atomic) = self.options.atomic {
            if self.pending_unlink.defer(&path, was_dir) {
                self.timers
                    .insert(TimerKey::PendingUnlinkDrain(path), atomic.delay);
            }
            return;
        }

        if was_dir {
            self.emit(Event::UnlinkDir { path });
        } else {
            self.emit(Event::Unlink { path });
        }
    }

    fn observe_dir(&mut self, path: PathBuf, stat: Stat) {
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_else(|| path.clone());
        let basename = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();

        let is_new = !self.registry.is_registered(&path);
        self.registry.touch(&path);
        self.registry.add_child(&dir, basename);

        if let Some(per_dir) = self.per_dir_backend.as_mut() {
            if self.per_dir_known.insert(path.clone()) {
                let _ = per_dir.watch_dir(&path);
            }
        }

        if is_new {
            // An atomic collapse of a directory replace degrades gracefully
            // to a plain `addDir` — directories don't have a `change` event.
            self.pending_unlink.collapse_on_add(&path);
            let display = self.symlink_map.rewrite_to_symlink_view(&path);
            self.emit(Event::AddDir {
                path: display,
                stat: Some(stat),
            });
        }
    }

    fn observe_file(&mut self, path: PathBuf, stat: Stat) {
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_else(|| path.clone());
        let basename = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        self.registry.touch(&dir);

        if !self.passes_glob_filters(&path) {
            return;
        }

        let fresh = self.registry.add_child(&dir, basename);
        let collapsed = self.pending_unlink.collapse_on_add(&path).is_some();
        let kind = if fresh && !collapsed {
            PendingKind::Add
        } else {
            PendingKind::Change
        };

        self.route_write(path, stat, kind);
    }

    fn route_write(&mut self, path: PathBuf, stat: Stat, kind: PendingKind) {
        if let Some(awf) = self.options.await_write_finish {
            let is_new = self.write_settle.start_or_refresh(&path, kind, stat.size);
            if is_new {
                self.timers
                    .insert(TimerKey::WriteSettlePoll(path), awf.poll_interval);
            }
            return;
        }

        if kind == PendingKind::Add {
            let display = self.symlink_map.rewrite_to_symlink_view(&path);
            self.emit(Event::Add {
                path: display,
                stat: Some(stat),
            });
            return;
        }

        match self.throttle.try_acquire(ThrottleKind::Change, &path) {
            Acquire::Fresh => {
                self.timers.insert(
                    TimerKey::ThrottleRelease(ThrottleKind::Change, path.clone()),
                    ThrottleKind::Change.default_window(),
                );
                let display = self.symlink_map.rewrite_to_symlink_view(&path);
                self.emit(Event::Change {
                    path: display,
                    stat: Some(stat),
                });
            }
            Acquire::Suppressed { .. } => {}
        }
    }

    // ---- timers ----------------------------------------------------------

    async fn handle_timer(&mut self, key: TimerKey) {
        match key {
            TimerKey::ThrottleRelease(kind, path) => {
                self.throttle.release(kind, &path);
            }
            TimerKey::WriteSettlePoll(path) => {
                let Some(await_write_finish) = self.options.await_write_finish else {
                    return;
                };
                let kind = self.write_settle.kind_of(&path);
                let fresh = stat::stat(&path).ok().flatten();
                match self
                    .write_settle
                    .poll(&path, fresh, await_write_finish.stability_threshold)
                {
                    Some(PollOutcome::StillGrowing) => {
                        self.timers.insert(
                            TimerKey::WriteSettlePoll(path),
                            await_write_finish.poll_interval,
                        );
                    }
                    Some(PollOutcome::Settled { stat }) => {
                        let display = self.symlink_map.rewrite_to_symlink_view(&path);
                        let event = match kind {
                            Some(PendingKind::Add) | None => Event::Add {
                                path: display,
                                stat: Some(stat),
                            },
                            Some(PendingKind::Change) => Event::Change {
                                path: display,
                                stat: Some(stat),
                            },
                        };
                        self.emit(event);
                    }
                    Some(PollOutcome::Gone) | None => {}
                }
            }
            TimerKey::PendingUnlinkDrain(path) => {
                if let Some(entry) = self.pending_unlink.drain(&path) {
                    if entry.was_dir {
                        self.emit(Event::UnlinkDir { path });
                    } else {
                        self.emit(Event::Unlink { path });
                    }
                }
            }
        }
    }

    // ---- helpers -----------------------------------------------------------

    fn is_ignored(&self, path: &Path) -> bool {
        let normalized = path.to_string_lossy().replace('\\', "/");
        self.ignore.is_ignored(path, &normalized)
    }

    /// Final emission step (§4.9 step 2, "rewrite path to user-relative form
    /// if a working directory was configured") followed by step 8 (emit).
    /// Centralized here rather than at each call site so every channel,
    /// including `raw`, sees the same rewrite exactly once.
    fn emit(&self, event: Event) {
        let event = self.rewrite_for_cwd(event);
        let _ = self.event_tx.send(event);
    }

    fn rewrite_for_cwd(&self, event: Event) -> Event {
        let Some(cwd) = self.options.cwd.as_deref() else {
            return event;
        };
        match event {
            Event::Add { path, stat } => Event::Add { path: path_util::relativize(&path, Some(cwd)), stat },
            Event::Change { path, stat } => Event::Change { path: path_util::relativize(&path, Some(cwd)), stat },
            Event::Unlink { path } => Event::Unlink { path: path_util::relativize(&path, Some(cwd)) },
            Event::AddDir { path, stat } => Event::AddDir { path: path_util::relativize(&path, Some(cwd)), stat },
            Event::UnlinkDir { path } => Event::UnlinkDir { path: path_util::relativize(&path, Some(cwd)) },
            Event::Raw { path, raw } => Event::Raw { path: path_util::relativize(&path, Some(cwd)), raw },
            other @ (Event::Ready | Event::Error(_)) => other,
        }
    }

    fn emit_raw(&self, backend: BackendKind, path: &Path, description: String) {
        self.emit(Event::Raw {
            path: path.to_path_buf(),
            raw: RawEvent {
                backend: backend.label(),
                description,
            },
        });
    }
}

/// Detects hosts that should force the polling backend regardless of
/// `use_polling` (§4.8 — environments whose native notification API is
/// unreliable or absent, e.g. network filesystems or IBM i's PASE layer).
/// Exposed as a narrow hook: a hard-coded allowlist isn't maintainable, so
/// this only ever checks an explicit environment escape hatch.
fn forced_polling_host() -> bool {
    std::env::var("WATCHFUL_FORCE_POLLING")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Resolves a symlink chain for `root`, recording every hop in `symlink_map`
/// so later events resolve back to the path the user actually watched
/// (§4.6). Stops early (without recording) if the target is already tracked,
/// avoiding an infinite loop through a symlink cycle.
fn resolve_symlink_chain(root: &Path, symlink_map: &mut SymlinkMap) -> PathBuf {
    let mut current = root.to_path_buf();
    let mut hops = 0;
    loop {
        let Ok(meta) = std::fs::symlink_metadata(&current) else {
            return current;
        };
        if !meta.file_type().is_symlink() {
            return current;
        }
        let Ok(target) = std::fs::read_link(&current) else {
            return current;
        };
        let resolved = if target.is_absolute() {
            target
        } else {
            current.parent().unwrap_or(Path::new("/")).join(target)
        };
        if symlink_map.is_already_tracked_target(&resolved) || hops > 40 {
            return resolved;
        }
        symlink_map.insert(root.to_path_buf(), resolved.clone());
        current = resolved;
        hops += 1;
    }
}

/// Small adapter so `DelayQueue::poll_expired`'s `Future`-less API plugs
/// into `tokio::select!` the same way a channel receiver does.
async fn futures_next(
    queue: &mut DelayQueue<TimerKey>,
) -> Option<tokio_util::time::delay_queue::Expired<TimerKey>> {
    std::future::poll_fn(|cx| queue.poll_expired(cx)).await
}
