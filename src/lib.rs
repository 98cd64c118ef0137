//! `watchful` — a cross-platform, recursive filesystem-change watcher.
//!
//! ```no_run
//! # async fn run() -> watchful::Result<()> {
//! let watcher = watchful::watch(["./src"], watchful::WatchOptions::new())?;
//! let mut events = watcher.subscribe();
//! while let Ok(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! # Ok(())
//! # }
//! ```

mod atomic;
mod backend;
mod dispatcher;
mod error;
mod events;
mod glob_matcher;
mod ignore;
mod options;
mod path_util;
mod registry;
mod scan;
mod stat;
mod symlink_map;
mod throttle;
mod write_settle;

pub use error::{Result, WatchError};
pub use events::{Event, EventKind, RawEvent};
pub use options::{Atomic, AwaitWriteFinish, WatchOptions};
pub use stat::Stat;

use std::path::PathBuf;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use dispatcher::{Command, Dispatcher};

/// Default capacity of the broadcast channel every [`Watcher::subscribe`]
/// receiver draws from. A lagging subscriber sees [`broadcast::error::RecvError::Lagged`]
/// rather than blocking the dispatcher — matching the "never let a slow
/// consumer stall event delivery" intent of §5.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Starts watching `paths` under `options`, spawning the dispatcher task on
/// the current Tokio runtime. Must be called from within a runtime context.
pub fn watch<I, S>(paths: I, options: WatchOptions) -> Result<Watcher>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let options = options.apply_env_overrides();
    let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
    let (cmd_tx, cmd_rx) = mpsc::channel(256);

    let dispatcher = Dispatcher::new(options, event_tx.clone(), cmd_rx)?;
    let initial_paths: Vec<String> = paths.into_iter().map(Into::into).collect();
    let handle = tokio::spawn(dispatcher.run(initial_paths));

    Ok(Watcher {
        cmd_tx,
        event_tx,
        handle: Some(handle),
    })
}

/// A handle to a running watch session. Dropping it stops the dispatcher
/// task; call [`Watcher::close`] first if you want to wait for a clean
/// shutdown and flush of in-flight events.
pub struct Watcher {
    cmd_tx: mpsc::Sender<Command>,
    event_tx: broadcast::Sender<Event>,
    handle: Option<JoinHandle<()>>,
}

impl Watcher {
    /// Subscribes to the event stream. Each call returns an independent
    /// receiver; all receivers see every event on one logical stream —
    /// `Event::kind()` is how a consumer filters to the kinds it cares
    /// about, without committing to per-kind callback registration.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Adds more paths (or glob patterns, or `!`-negated ignore entries) to
    /// an already-running watcher (§2).
    pub async fn add<I, S>(&self, paths: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (reply, rx) = oneshot::channel();
        let paths = paths.into_iter().map(Into::into).collect();
        self.send(Command::Add { paths, reply }).await?;
        rx.await.unwrap_or(Ok(()))
    }

    /// Stops watching the given paths/patterns without affecting the rest
    /// of the watch set.
    pub async fn unwatch<I, S>(&self, paths: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (reply, rx) = oneshot::channel();
        let paths = paths.into_iter().map(Into::into).collect();
        self.send(Command::Unwatch { paths, reply }).await?;
        rx.await.unwrap_or(Ok(()))
    }

    /// A sorted snapshot of every watched directory and its tracked
    /// children (§10.5).
    pub async fn get_watched(&self) -> std::collections::BTreeMap<PathBuf, Vec<String>> {
        let (reply, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::GetWatched { reply }).await.is_err() {
            return std::collections::BTreeMap::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Stops the dispatcher and releases every backend handle, waiting for
    /// the task to finish.
    pub async fn close(&mut self) {
        let (reply, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Close { reply }).await.is_ok() {
            let _ = rx.await;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    async fn send(&self, cmd: Command) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| WatchError::InvalidArgument("watcher dispatcher has shut down".into()))
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
