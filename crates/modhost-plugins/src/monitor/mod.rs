//! Plugin root monitor
//!
//! Watches the plugin root and keeps the registry in sync with it. Changes
//! are debounced per module directory and applied one at a time by a
//! single worker task, which waits for a module's slot like any other
//! caller.

mod debounce;
mod watcher;

use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use modhost_kernel::{ModuleError, ModuleResult, MonitorSettings};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

pub use debounce::DueAction;
pub use watcher::{MonitorSignal, WatchBackend, WatchEvent, WatchEventKind};

use self::debounce::Debouncer;
use self::watcher::RootWatcher;
use crate::lifecycle::{Lifecycle, SyncOutcome};
use crate::scanner::is_hidden;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Monitor configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    pub debounce: Duration,
    pub poll_interval: Duration,
    /// Attach a filesystem watcher; without one only injected events are seen
    pub watch: bool,
    pub reconcile_on_start: bool,
    pub auto_install: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::from(&MonitorSettings::default())
    }
}

impl From<&MonitorSettings> for MonitorConfig {
    fn from(settings: &MonitorSettings) -> Self {
        Self {
            debounce: settings.debounce(),
            poll_interval: settings.poll_interval(),
            watch: settings.watch,
            reconcile_on_start: settings.reconcile_on_start,
            auto_install: settings.auto_install,
        }
    }
}

pub struct PluginMonitor {
    lifecycle: Arc<Lifecycle>,
    config: MonitorConfig,
    event_tx: mpsc::Sender<MonitorSignal>,
    event_rx: Option<mpsc::Receiver<MonitorSignal>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl PluginMonitor {
    pub fn new(lifecycle: Arc<Lifecycle>, config: MonitorConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            lifecycle,
            config,
            event_tx,
            event_rx: Some(event_rx),
            shutdown_tx: None,
            worker: None,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Sender for feeding changes to the worker without a filesystem watcher.
    pub fn event_sender(&self) -> mpsc::Sender<MonitorSignal> {
        self.event_tx.clone()
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Prepare the root, sync it once, and spawn the worker.
    ///
    /// Returns what the startup reconcile did.
    pub async fn start(&mut self) -> ModuleResult<Vec<SyncOutcome>> {
        let Some(event_rx) = self.event_rx.take() else {
            return Err(ModuleError::MonitorFault("monitor already started".into()));
        };
        let root = self.lifecycle.root().to_path_buf();
        info!(root = %root.display(), "Starting plugin monitor");

        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| ModuleError::scan_io(&root, e))?;

        let recovered = self.lifecycle.registry().recover_interrupted();
        if !recovered.is_empty() {
            warn!(modules = ?recovered, "Recovered modules left mid-operation");
        }

        let outcomes = if self.config.reconcile_on_start {
            self.lifecycle.reconcile(self.config.auto_install).await?
        } else {
            Vec::new()
        };

        let mut worker = MonitorWorker {
            lifecycle: self.lifecycle.clone(),
            config: self.config.clone(),
            root,
            debouncer: Debouncer::new(self.config.debounce),
            watcher: None,
            signal_tx: self.event_tx.clone(),
        };
        if self.config.watch {
            worker.attach_watcher(WatchBackend::Native);
        }

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);
        self.worker = Some(tokio::spawn(worker.run(event_rx, shutdown_rx)));

        Ok(outcomes)
    }

    /// Stop the worker after its current action and wait for it to exit.
    pub async fn stop(&mut self) {
        info!("Stopping plugin monitor");
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(worker) = self.worker.take() {
            if let Err(err) = worker.await {
                error!(error = %err, "Plugin monitor worker panicked");
            }
        }
    }
}

struct MonitorWorker {
    lifecycle: Arc<Lifecycle>,
    config: MonitorConfig,
    root: PathBuf,
    debouncer: Debouncer,
    watcher: Option<RootWatcher>,
    signal_tx: mpsc::Sender<MonitorSignal>,
}

impl MonitorWorker {
    async fn run(
        mut self,
        mut events: mpsc::Receiver<MonitorSignal>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        loop {
            let deadline = self.debouncer.next_deadline();
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                signal = events.recv() => match signal {
                    Some(MonitorSignal::Change(event)) => self.record(event),
                    Some(MonitorSignal::Fault(reason)) => self.recover(&reason).await,
                    None => break,
                },
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    for action in self.debouncer.drain_due(Instant::now()) {
                        self.execute(action).await;
                    }
                }
            }
        }

        let abandoned = self.debouncer.clear();
        if abandoned > 0 {
            debug!(abandoned, "Dropping pending changes on shutdown");
        }
        self.watcher = None;
        info!("Plugin monitor stopped");
    }

    fn record(&mut self, event: WatchEvent) {
        let Some((dir, kind)) = self.classify(&event) else {
            return;
        };
        debug!(dir = %dir.display(), ?kind, "Module directory changed");
        self.debouncer.record(dir, kind, Instant::now());
    }

    /// Map an event to the module directory it concerns.
    ///
    /// Events on the directory itself keep their kind; changes to a
    /// manifest or artifact inside it count as a modification.
    fn classify(&self, event: &WatchEvent) -> Option<(PathBuf, WatchEventKind)> {
        let relative = event.path.strip_prefix(&self.root).ok()?;
        let mut components = relative.components();
        let Some(Component::Normal(name)) = components.next() else {
            return None;
        };
        if is_hidden(name) {
            return None;
        }
        let dir = self.root.join(name);

        let file = components.next();
        let nested = components.next().is_some();
        match (file, nested) {
            (None, _) => match event.kind {
                WatchEventKind::Removed => Some((dir, WatchEventKind::Removed)),
                // loose files in the root are not modules
                _ if dir.is_dir() => Some((dir, event.kind)),
                _ => None,
            },
            (Some(Component::Normal(file)), false) => self
                .is_module_file(file, &event.path)
                .then_some((dir, WatchEventKind::Modified)),
            _ => None,
        }
    }

    fn is_module_file(&self, file: &OsStr, path: &Path) -> bool {
        let scanner = self.lifecycle.scanner();
        !is_hidden(file) && (scanner.is_manifest(path) || scanner.is_artifact(path))
    }

    async fn execute(&self, action: DueAction) {
        let result = match &action {
            DueAction::Apply(dir) => self.lifecycle.apply_dir(dir, self.config.auto_install).await,
            DueAction::Remove(dir) => self.lifecycle.remove_dir(dir).await,
        };
        match result {
            Ok(SyncOutcome::Ignored) => debug!(?action, "Nothing to do"),
            Ok(outcome) => info!(?outcome, "Applied plugin change"),
            Err(err) => warn!(?action, error = %err, "Failed to apply plugin change"),
        }
    }

    async fn recover(&mut self, reason: &str) {
        error!(error = %reason, "Plugin watcher fault");
        if !self.config.watch {
            return;
        }

        let previous = self.watcher.take().map(|w| w.backend());
        let preferred = previous.unwrap_or(WatchBackend::Native);
        self.attach_watcher(preferred);

        // events may have been lost while the watcher was down
        match self.lifecycle.reconcile(self.config.auto_install).await {
            Ok(outcomes) => debug!(changes = outcomes.len(), "Resynced after watcher fault"),
            Err(err) => warn!(error = %err, "Resync after watcher fault failed"),
        }
    }

    fn attach_watcher(&mut self, preferred: WatchBackend) {
        let backends: &[WatchBackend] = match preferred {
            WatchBackend::Native => &[WatchBackend::Native, WatchBackend::Polling],
            WatchBackend::Polling => &[WatchBackend::Polling],
        };

        for &backend in backends {
            match RootWatcher::establish(
                &self.root,
                backend,
                self.config.poll_interval,
                self.signal_tx.clone(),
            ) {
                Ok(watcher) => {
                    if backend == WatchBackend::Polling {
                        warn!(
                            interval_ms = self.config.poll_interval.as_millis() as u64,
                            "Watching plugin root by polling"
                        );
                    }
                    self.watcher = Some(watcher);
                    return;
                }
                Err(err) => warn!(%backend, error = %err, "Could not attach watcher"),
            }
        }
        error!(root = %self.root.display(), "No filesystem watcher available, changes will go unnoticed");
    }
}
