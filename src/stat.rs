//! Cross-platform stat snapshot attached to `add`/`change` events (spec §6,
//! "Event payloads").

use std::fs::Metadata;
use std::path::Path;
use std::time::SystemTime;

/// A minimal, platform-normalized view of `fs::Metadata`.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct Stat {
    pub size: u64,
    pub mtime: SystemTime,
    pub ino: u64,
    pub mode: u32,
    pub is_dir: bool,
    pub is_symlink: bool,
}

impl Stat {
    pub fn from_metadata(meta: &Metadata, is_symlink: bool) -> Self {
        Self {
            size: meta.len(),
            mtime: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            ino: inode_of(meta),
            mode: mode_of(meta),
            is_dir: meta.is_dir(),
            is_symlink,
        }
    }

    /// Milliseconds since the epoch, saturating to 0 on clock skew. Mirrors
    /// the "mtime_ms" comparisons the polling backend performs (§4.8).
    pub fn mtime_ms(&self) -> u128 {
        self.mtime
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0)
    }
}

#[cfg(unix)]
fn inode_of(meta: &Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.ino()
}

#[cfg(not(unix))]
fn inode_of(_meta: &Metadata) -> u64 {
    0
}

#[cfg(unix)]
fn mode_of(meta: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode()
}

#[cfg(not(unix))]
fn mode_of(meta: &Metadata) -> u32 {
    if meta.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

/// `lstat`-then-classify: resolves whether `path` is itself a symlink and
/// returns the stat of the link (not its target) when so. Returns `Ok(None)`
/// for a `NotFound`/`NotADirectory` condition, which callers absorb per §7.
pub fn lstat(path: &Path) -> crate::error::Result<Option<Stat>> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) => {
            let is_symlink = meta.file_type().is_symlink();
            Ok(Some(Stat::from_metadata(&meta, is_symlink)))
        }
        Err(err) => match crate::error::classify_io_error(&err) {
            crate::error::ErrorClass::NotFound => Ok(None),
            crate::error::ErrorClass::Permission => Err(crate::error::WatchError::Permission(
                path.to_path_buf(),
            )),
            crate::error::ErrorClass::Other => Err(crate::error::WatchError::Io {
                path: path.to_path_buf(),
                source: err,
            }),
        },
    }
}

/// `stat`: follows a symlink chain to the target's metadata. Used once
/// `follow_symlinks` resolution has already picked the real path.
pub fn stat(path: &Path) -> crate::error::Result<Option<Stat>> {
    match std::fs::metadata(path) {
        Ok(meta) => Ok(Some(Stat::from_metadata(&meta, false))),
        Err(err) => match crate::error::classify_io_error(&err) {
            crate::error::ErrorClass::NotFound => Ok(None),
            crate::error::ErrorClass::Permission => Err(crate::error::WatchError::Permission(
                path.to_path_buf(),
            )),
            crate::error::ErrorClass::Other => Err(crate::error::WatchError::Io {
                path: path.to_path_buf(),
                source: err,
            }),
        },
    }
}
