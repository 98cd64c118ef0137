//! Backend sum type (spec §9, "Plugin-style backend selection → a small sum
//! type `Backend = {Native, PerDir, Poll}`").
//!
//! Each backend is a thin producer of [`BackendMsg`] onto one channel the
//! dispatcher drains — the dispatcher, not the backend, owns the registry,
//! throttle table, and emission pipeline (§5). This keeps every backend
//! stateless with respect to "is this new" and lets all three share exactly
//! one classification path.

pub mod native;
pub mod per_dir;
pub mod poll;

use std::path::PathBuf;

use crate::error::WatchError;
use crate::stat::Stat;

/// What kind of backend produced a message — carried through so the
/// dispatcher's `raw` events can report which backend is speaking (§6,
/// "`raw` carries the unprocessed backend event for debugging").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Native,
    PerDir,
    Poll,
}

impl BackendKind {
    pub fn label(self) -> &'static str {
        match self {
            BackendKind::Native => "native",
            BackendKind::PerDir => "per-dir",
            BackendKind::Poll => "poll",
        }
    }
}

/// Messages posted from a backend into the dispatcher's inbox. Named after
/// Design Note §9's vocabulary (`Discovered`, `Lost`, `Modified`,
/// `RawOsEvent`) plus the transport-level messages every backend needs
/// (fault reporting, directory-changed signals).
#[derive(Debug)]
pub enum BackendMsg {
    /// A single path was observed to exist with this stat, or confirmed gone
    /// (`stat: None`). The dispatcher diffs this against the registry to
    /// decide `add`/`change`/`unlink` (§4.3, §4.6).
    PathObserved {
        backend: BackendKind,
        path: PathBuf,
        stat: Option<Stat>,
        raw_description: String,
    },
    /// A rename pair observed by the native backend (`RenameMode::Both`):
    /// the dispatcher collapses this into `unlink(from)` + `add(to)` or, in
    /// `atomic` mode, straight into `change(to)`.
    Renamed {
        backend: BackendKind,
        from: PathBuf,
        to: PathBuf,
        to_stat: Option<Stat>,
    },
    /// "A directory changed, go find out what" — the per-dir-watch signal
    /// (§4.7). The dispatcher throttles under `Readdir`, then lists and
    /// diffs.
    DirectoryChanged { dir: PathBuf },
    /// The native backend's force-rescan flag (§4.6): re-walk `root` rather
    /// than trust incremental deltas.
    ForceRescan { root: PathBuf },
    /// A recoverable or fatal backend fault (§4.6 OSWatchFault, §7).
    Fault {
        backend: BackendKind,
        path: Option<PathBuf>,
        error: WatchError,
    },
}
