//! Filesystem watcher attached to the plugin root
//!
//! Wraps `notify` so the rest of the monitor only sees [`MonitorSignal`]s.
//! Renames are split into a removal of the old path and a creation of the
//! new one.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{
    Config, Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher,
    event::{ModifyKind, RenameMode},
};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

/// Watch event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Created,
    Modified,
    Removed,
}

/// A change below the plugin root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub path: PathBuf,
}

impl WatchEvent {
    pub fn new(kind: WatchEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }

    pub fn created(path: impl Into<PathBuf>) -> Self {
        Self::new(WatchEventKind::Created, path)
    }

    pub fn modified(path: impl Into<PathBuf>) -> Self {
        Self::new(WatchEventKind::Modified, path)
    }

    pub fn removed(path: impl Into<PathBuf>) -> Self {
        Self::new(WatchEventKind::Removed, path)
    }
}

/// Input to the monitor worker.
#[derive(Debug, Clone)]
pub enum MonitorSignal {
    Change(WatchEvent),
    /// The watcher reported an error
    Fault(String),
}

impl From<WatchEvent> for MonitorSignal {
    fn from(event: WatchEvent) -> Self {
        Self::Change(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchBackend {
    Native,
    Polling,
}

impl fmt::Display for WatchBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native => write!(f, "native"),
            Self::Polling => write!(f, "polling"),
        }
    }
}

/// Live watcher; dropping it stops event delivery.
/// Locked so that `RootWatcher` is `Sync`.
pub(crate) struct RootWatcher {
    _inner: Mutex<Box<dyn Watcher + Send>>,
    backend: WatchBackend,
}

impl RootWatcher {
    pub(crate) fn establish(
        root: &Path,
        backend: WatchBackend,
        poll_interval: Duration,
        tx: mpsc::Sender<MonitorSignal>,
    ) -> Result<Self, notify::Error> {
        let handler = move |result: Result<Event, notify::Error>| match result {
            Ok(event) => {
                for change in convert(event) {
                    if tx.blocking_send(MonitorSignal::Change(change)).is_err() {
                        return;
                    }
                }
            }
            Err(err) => {
                let _ = tx.blocking_send(MonitorSignal::Fault(err.to_string()));
            }
        };
        let config = Config::default().with_poll_interval(poll_interval);

        let mut inner: Box<dyn Watcher + Send> = match backend {
            WatchBackend::Native => Box::new(RecommendedWatcher::new(handler, config)?),
            WatchBackend::Polling => Box::new(PollWatcher::new(handler, config)?),
        };
        inner.watch(root, RecursiveMode::Recursive)?;
        debug!(root = %root.display(), %backend, "Watching plugin root");

        Ok(Self {
            _inner: Mutex::new(inner),
            backend,
        })
    }

    pub(crate) fn backend(&self) -> WatchBackend {
        self.backend
    }
}

fn convert(event: Event) -> Vec<WatchEvent> {
    let Event { kind, paths, .. } = event;
    match kind {
        EventKind::Create(_) => paths.into_iter().map(WatchEvent::created).collect(),
        EventKind::Remove(_) => paths.into_iter().map(WatchEvent::removed).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            paths.into_iter().map(WatchEvent::removed).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            paths.into_iter().map(WatchEvent::created).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut paths = paths.into_iter();
            let mut events = Vec::with_capacity(2);
            if let Some(from) = paths.next() {
                events.push(WatchEvent::removed(from));
            }
            events.extend(paths.map(WatchEvent::created));
            events
        }
        // the backend could not tell which side of the rename this is
        EventKind::Modify(ModifyKind::Name(_)) => paths
            .into_iter()
            .map(|path| {
                if path.exists() {
                    WatchEvent::created(path)
                } else {
                    WatchEvent::removed(path)
                }
            })
            .collect(),
        EventKind::Modify(_) | EventKind::Any => {
            paths.into_iter().map(WatchEvent::modified).collect()
        }
        EventKind::Access(_) | EventKind::Other => Vec::new(),
    }
}
