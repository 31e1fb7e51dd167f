//! Per-directory trailing debounce

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use tokio::time::Instant;

use super::watcher::WatchEventKind;

/// Work to run once a module directory has been quiet for a full window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DueAction {
    /// Re-read the directory and sync the registry with it
    Apply(PathBuf),
    /// The directory is gone
    Remove(PathBuf),
}

#[derive(Debug)]
struct Pending {
    first: WatchEventKind,
    last: WatchEventKind,
    deadline: Instant,
}

impl Pending {
    fn action(self, dir: PathBuf) -> Option<DueAction> {
        match (self.first, self.last) {
            // appeared and vanished inside one window
            (WatchEventKind::Created, WatchEventKind::Removed) => None,
            (_, WatchEventKind::Removed) => Some(DueAction::Remove(dir)),
            _ => Some(DueAction::Apply(dir)),
        }
    }
}

#[derive(Debug)]
pub(crate) struct Debouncer {
    window: Duration,
    pending: HashMap<PathBuf, Pending>,
}

impl Debouncer {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
        }
    }

    /// Note an event for `dir`, pushing its deadline out by a full window.
    pub(crate) fn record(&mut self, dir: PathBuf, kind: WatchEventKind, now: Instant) {
        let deadline = now + self.window;
        self.pending
            .entry(dir)
            .and_modify(|p| {
                p.last = kind;
                p.deadline = deadline;
            })
            .or_insert(Pending {
                first: kind,
                last: kind,
                deadline,
            });
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    /// Remove every entry whose window has elapsed, in path order.
    pub(crate) fn drain_due(&mut self, now: Instant) -> Vec<DueAction> {
        let mut due: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(dir, _)| dir.clone())
            .collect();
        due.sort();

        due.into_iter()
            .filter_map(|dir| {
                let pending = self.pending.remove(&dir)?;
                pending.action(dir)
            })
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    /// Drop everything pending; returns how many entries were abandoned.
    pub(crate) fn clear(&mut self) -> usize {
        let abandoned = self.pending.len();
        self.pending.clear();
        abandoned
    }
}
