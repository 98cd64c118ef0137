//! Error taxonomy for the watcher (spec §7).
//!
//! `NotFound`/`NotDirectory` conditions are never constructed as a surfaced
//! [`WatchError`] — callers only ever see them translated into `unlink`/
//! `unlinkDir` events or silently dropped, per the absorption policy in §7.
//! Everything that *is* constructed here can reach a consumer's `error`
//! channel.

use std::io;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, WatchError>;

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// The native-event backend could not be created or subscribed at all.
    #[error("backend initialization failed for {path}: {reason}")]
    BackendInitFailed { path: PathBuf, reason: String },

    /// A brace/range expansion in a glob pattern would unroll past the
    /// configured bound. The offending `add()` path is rejected; others
    /// in the same call continue (§7).
    #[error("glob pattern {pattern:?} expands past the limit of {limit} alternatives")]
    ExpansionLimit { pattern: String, limit: usize },

    /// A non-path argument was passed to `add`/`unwatch`.
    #[error("invalid watch argument: {0}")]
    InvalidArgument(String),

    /// A recoverable backend fault (e.g. a transient permission glitch) that
    /// survived a one-shot open-close recovery attempt. The affected handle
    /// is dropped; the watcher itself remains usable.
    #[error("filesystem watch fault on {path}: {reason}")]
    OsWatchFault { path: PathBuf, reason: String },

    /// A permission error surfaced because `ignore_permission_errors` is
    /// false.
    #[error("permission denied: {0}")]
    Permission(PathBuf),

    /// Any other I/O failure that isn't absorbed by the NotFound/NotDirectory
    /// or permission rules.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("filesystem watch backend error: {0}")]
    Notify(#[from] notify::Error),
}

/// Classification used by the emission pipeline and backends to decide
/// whether an I/O error is absorbed, surfaced, or fatal to the backend
/// instance (§7 propagation policy).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Absorbed unconditionally; the absence is itself the signal.
    NotFound,
    /// Absorbed or surfaced depending on `ignore_permission_errors`.
    Permission,
    /// Always surfaced.
    Other,
}

pub fn classify_io_error(err: &io::Error) -> ErrorClass {
    match err.kind() {
        io::ErrorKind::NotFound => ErrorClass::NotFound,
        io::ErrorKind::PermissionDenied => ErrorClass::Permission,
        _ => {
            // `NotADirectory`/`ENOTDIR` is nightly-only as an `ErrorKind` variant on
            // stable; fall back to the raw OS error code where available.
            if err.raw_os_error() == Some(libc_enotdir()) {
                ErrorClass::NotFound
            } else {
                ErrorClass::Other
            }
        }
    }
}

#[cfg(unix)]
fn libc_enotdir() -> i32 {
    20 // ENOTDIR is stable across Linux/BSD/macOS
}

#[cfg(not(unix))]
fn libc_enotdir() -> i32 {
    -1
}
