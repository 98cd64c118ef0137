//! Public event types.

use std::path::PathBuf;
use std::sync::Arc;

use crate::error::WatchError;
use crate::stat::Stat;

/// The channel an [`Event`] belongs to. `All` is not a real variant — every
/// event is always delivered on the single [`crate::Watcher::subscribe`]
/// stream, and `kind()` is how a consumer filters it to the kinds it cares
/// about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    Add,
    Change,
    Unlink,
    AddDir,
    UnlinkDir,
    Ready,
    Raw,
    Error,
}

/// The unprocessed backend signal that produced a `raw` event, kept for
/// debugging (§6).
#[derive(Debug, Clone, serde::Serialize)]
pub struct RawEvent {
    pub backend: &'static str,
    pub description: String,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Event {
    Add { path: PathBuf, stat: Option<Stat> },
    Change { path: PathBuf, stat: Option<Stat> },
    Unlink { path: PathBuf },
    AddDir { path: PathBuf, stat: Option<Stat> },
    UnlinkDir { path: PathBuf },
    Ready,
    Raw { path: PathBuf, raw: RawEvent },
    #[serde(serialize_with = "serialize_error")]
    Error(Arc<WatchError>),
}

fn serialize_error<S>(err: &Arc<WatchError>, s: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    s.serialize_str(&err.to_string())
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Add { .. } => EventKind::Add,
            Event::Change { .. } => EventKind::Change,
            Event::Unlink { .. } => EventKind::Unlink,
            Event::AddDir { .. } => EventKind::AddDir,
            Event::UnlinkDir { .. } => EventKind::UnlinkDir,
            Event::Ready => EventKind::Ready,
            Event::Raw { .. } => EventKind::Raw,
            Event::Error(_) => EventKind::Error,
        }
    }

    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Event::Add { path, .. }
            | Event::Change { path, .. }
            | Event::Unlink { path }
            | Event::AddDir { path, .. }
            | Event::UnlinkDir { path }
            | Event::Raw { path, .. } => Some(path),
            Event::Ready | Event::Error(_) => None,
        }
    }
}
