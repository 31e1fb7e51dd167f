//! Install and uninstall sequences shared by the monitor and the manager
//!
//! Every function here expects the caller to hold, or acquires, the mutation
//! slot of the module it touches. Operator calls fail fast on a held slot;
//! the monitor waits for it.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use modhost_kernel::{ModuleDescriptor, ModuleError, ModuleResult, ModuleState};
use tracing::{debug, info, warn};

use crate::loader::ModuleLoader;
use crate::registry::{ModuleRecord, ModuleRegistry, ModuleSlot};
use crate::scanner::{PluginScanner, SkipReason};

/// What a sync pass did to one module directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Newly installed; `state` is `Enabled` or `Failed`
    Installed { id: String, state: ModuleState },
    /// Artifact or manifest changed under a loaded module
    Reloaded { id: String, state: ModuleState },
    /// Registered as `Discovered` without installing
    Registered { id: String },
    Unchanged { id: String },
    Removed { id: String },
    Skipped { dir: PathBuf, reason: SkipReason },
    /// Nothing registered for this directory
    Ignored,
}

impl SyncOutcome {
    pub fn module_id(&self) -> Option<&str> {
        match self {
            Self::Installed { id, .. }
            | Self::Reloaded { id, .. }
            | Self::Registered { id }
            | Self::Unchanged { id }
            | Self::Removed { id } => Some(id),
            Self::Skipped { .. } | Self::Ignored => None,
        }
    }
}

pub struct Lifecycle {
    registry: Arc<ModuleRegistry>,
    scanner: PluginScanner,
    loader: Arc<ModuleLoader>,
    root: PathBuf,
}

impl Lifecycle {
    pub fn new(
        registry: Arc<ModuleRegistry>,
        scanner: PluginScanner,
        loader: Arc<ModuleLoader>,
        root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry,
            scanner,
            loader,
            root: root.into(),
        }
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn scanner(&self) -> &PluginScanner {
        &self.scanner
    }

    pub fn loader(&self) -> &Arc<ModuleLoader> {
        &self.loader
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load a `Discovered` or `Failed` module.
    ///
    /// A load failure leaves the record `Failed` and is returned as
    /// [`ModuleError::Load`].
    pub async fn install(&self, slot: &ModuleSlot) -> ModuleResult<ModuleState> {
        self.install_as(slot, true).await
    }

    async fn install_as(&self, slot: &ModuleSlot, enabled: bool) -> ModuleResult<ModuleState> {
        let id = slot.id();
        let descriptor = self
            .registry
            .get(id)
            .map(|r| r.descriptor)
            .ok_or_else(|| ModuleError::NotFound(id.to_string()))?;

        self.registry.transition_to_installing(slot)?;
        match self.loader.load(&descriptor).await {
            Ok(handle) => {
                self.registry.complete_install(slot, handle, enabled)?;
                Ok(if enabled {
                    ModuleState::Enabled
                } else {
                    ModuleState::Disabled
                })
            }
            Err(source) => {
                warn!(module_id = %id, error = %source, "Module failed to load");
                self.registry.fail_install(slot, source.to_string())?;
                Err(ModuleError::Load {
                    id: id.to_string(),
                    source,
                })
            }
        }
    }

    /// Unload a loaded or failed module and evict its record.
    pub async fn uninstall(&self, slot: &ModuleSlot) -> ModuleResult<ModuleRecord> {
        if let Some(handle) = self.registry.begin_uninstall(slot)? {
            self.loader.unload(handle).await;
        }
        self.registry.complete_uninstall(slot)
    }

    /// Evict `id` however far it got: discard when never loaded, else uninstall.
    pub async fn remove(&self, slot: &ModuleSlot) -> ModuleResult<ModuleRecord> {
        let record = self
            .registry
            .get(slot.id())
            .ok_or_else(|| ModuleError::NotFound(slot.id().to_string()))?;
        if record.state == ModuleState::Discovered {
            self.registry.discard(slot)
        } else {
            self.uninstall(slot).await
        }
    }

    /// Bring the registry in line with one module directory.
    pub async fn apply_dir(&self, dir: &Path, auto_install: bool) -> ModuleResult<SyncOutcome> {
        let descriptor = match self.scanner.scan_dir(dir).await {
            Ok(descriptor) => descriptor,
            Err(SkipReason::MissingManifest | SkipReason::MissingArtifact)
                if self.registry.find_by_dir(dir).is_some() =>
            {
                debug!(dir = %dir.display(), "Module files are gone");
                return self.remove_dir(dir).await;
            }
            Err(reason) => {
                warn!(dir = %dir.display(), %reason, "Ignoring module directory");
                return Ok(SyncOutcome::Skipped {
                    dir: dir.to_path_buf(),
                    reason,
                });
            }
        };

        // The directory now declares a different id than the one registered for it.
        if let Some(previous) = self.registry.find_by_dir(dir) {
            if previous.id() != descriptor.id {
                info!(
                    old_id = %previous.id(),
                    new_id = %descriptor.id,
                    "Module directory was renamed in its manifest"
                );
                let slot = self.registry.acquire(previous.id()).await;
                self.remove(&slot).await?;
            }
        }

        let slot = self.registry.acquire(&descriptor.id).await;
        self.sync_descriptor(&slot, descriptor, auto_install).await
    }

    async fn sync_descriptor(
        &self,
        slot: &ModuleSlot,
        descriptor: ModuleDescriptor,
        auto_install: bool,
    ) -> ModuleResult<SyncOutcome> {
        let id = descriptor.id.clone();
        let existing = self.registry.get(&id);

        match existing {
            Some(record) if record.state.is_loaded() => {
                if record.descriptor.module_dir() != descriptor.module_dir() {
                    return Err(ModuleError::conflict(
                        &id,
                        format!(
                            "id already registered from {}",
                            record.descriptor.module_dir().display()
                        ),
                    ));
                }
                let hash = ModuleLoader::artifact_hash(&descriptor.artifact_path)
                    .await
                    .map_err(|source| ModuleError::Load {
                        id: id.clone(),
                        source,
                    })?;
                if record.artifact_hash() == Some(hash.as_str()) && record.descriptor == descriptor {
                    debug!(module_id = %id, "Module unchanged, skipping reload");
                    return Ok(SyncOutcome::Unchanged { id });
                }
                let state = self.reload(slot, descriptor, record.state).await?;
                Ok(SyncOutcome::Reloaded { id, state })
            }
            _ => {
                self.registry.upsert_discovered(slot, descriptor)?;
                if !auto_install {
                    return Ok(SyncOutcome::Registered { id });
                }
                let state = self.install_contained(slot, true).await?;
                Ok(SyncOutcome::Installed { id, state })
            }
        }
    }

    /// Swap a loaded module for the version now on disk, keeping it disabled
    /// if it was.
    async fn reload(
        &self,
        slot: &ModuleSlot,
        descriptor: ModuleDescriptor,
        previous: ModuleState,
    ) -> ModuleResult<ModuleState> {
        info!(module_id = %slot.id(), version = %descriptor.version, "Reloading module");
        self.uninstall(slot).await?;
        self.registry.upsert_discovered(slot, descriptor)?;
        self.install_contained(slot, previous != ModuleState::Disabled)
            .await
    }

    /// Install, folding a load failure into the resulting `Failed` state.
    async fn install_contained(&self, slot: &ModuleSlot, enabled: bool) -> ModuleResult<ModuleState> {
        match self.install_as(slot, enabled).await {
            Ok(state) => Ok(state),
            Err(ModuleError::Load { .. }) => Ok(ModuleState::Failed),
            Err(other) => Err(other),
        }
    }

    /// Unregister whatever module lives in `dir`.
    pub async fn remove_dir(&self, dir: &Path) -> ModuleResult<SyncOutcome> {
        let Some(record) = self.registry.find_by_dir(dir) else {
            return Ok(SyncOutcome::Ignored);
        };
        let slot = self.registry.acquire(record.id()).await;
        // Re-check under the slot; the directory may have been taken over meanwhile.
        match self.registry.get(slot.id()) {
            Some(current) if current.descriptor.module_dir() == dir => {
                self.remove(&slot).await?;
                Ok(SyncOutcome::Removed {
                    id: slot.id().to_string(),
                })
            }
            _ => Ok(SyncOutcome::Ignored),
        }
    }

    /// Sync every module directory under the root, and drop records whose
    /// directory no longer exists.
    pub async fn reconcile(&self, auto_install: bool) -> ModuleResult<Vec<SyncOutcome>> {
        let report = self.scanner.scan(&self.root).await?;
        let mut outcomes = Vec::new();
        let mut present = HashSet::new();

        for descriptor in &report.descriptors {
            let dir = descriptor.module_dir().to_path_buf();
            present.insert(dir.clone());
            match self.apply_dir(&dir, auto_install).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => warn!(dir = %dir.display(), error = %err, "Reconcile step failed"),
            }
        }
        for skipped in report.skipped {
            present.insert(skipped.path.clone());
            outcomes.push(SyncOutcome::Skipped {
                dir: skipped.path,
                reason: skipped.reason,
            });
        }

        for record in self.registry.list() {
            let dir = record.descriptor.module_dir().to_path_buf();
            if present.contains(&dir) || dir.exists() {
                continue;
            }
            match self.remove_dir(&dir).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => warn!(dir = %dir.display(), error = %err, "Reconcile removal failed"),
            }
        }

        info!(
            root = %self.root.display(),
            modules = report.descriptors.len(),
            "Reconciled plugin root"
        );
        Ok(outcomes)
    }
}
