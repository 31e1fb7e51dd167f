//! Management operations called by the host's HTTP layer
//!
//! Every mutation takes the module's slot with `try_acquire`: an operator
//! request that collides with an in-flight mutation on the same id fails
//! with a conflict instead of queueing behind it.

use std::path::Path;
use std::sync::Arc;

use modhost_kernel::{
    ManagerSettings, ModuleDescriptor, ModuleError, ModuleResult, ModuleState, ValidationError,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::lifecycle::Lifecycle;
use crate::package;
use crate::registry::{ModuleRecord, ModuleRegistry, RegistryStats, UpsertOutcome};
use crate::scanner::SkipReason;

/// Result of an install request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallOutcome {
    pub module_id: String,
    pub state: ModuleState,
}

pub struct ModuleManager {
    lifecycle: Arc<Lifecycle>,
    settings: ManagerSettings,
}

impl ModuleManager {
    pub fn new(lifecycle: Arc<Lifecycle>, settings: ManagerSettings) -> Self {
        Self {
            lifecycle,
            settings,
        }
    }

    fn registry(&self) -> &ModuleRegistry {
        self.lifecycle.registry()
    }

    pub fn list(&self) -> Vec<ModuleRecord> {
        self.registry().list()
    }

    pub fn get(&self, id: &str) -> ModuleResult<ModuleRecord> {
        self.registry()
            .get(id)
            .ok_or_else(|| ModuleError::NotFound(id.to_string()))
    }

    pub fn stats(&self) -> RegistryStats {
        self.registry().stats()
    }

    /// Register modules found on disk that the registry does not know yet.
    ///
    /// Returns only the newly discovered descriptors; nothing is installed.
    pub async fn scan(&self) -> ModuleResult<Vec<ModuleDescriptor>> {
        let report = self
            .lifecycle
            .scanner()
            .scan(self.lifecycle.root())
            .await
            .inspect_err(|err| warn!(error = %err, "Plugin scan failed"))?;

        let mut discovered = Vec::new();
        for descriptor in report.descriptors {
            if self.registry().contains(&descriptor.id) {
                continue;
            }
            let slot = match self.registry().try_acquire(&descriptor.id) {
                Ok(slot) => slot,
                Err(_) => {
                    debug!(module_id = %descriptor.id, "Module busy, leaving it to the current operation");
                    continue;
                }
            };
            match self.registry().upsert_discovered(&slot, descriptor.clone()) {
                Ok(UpsertOutcome::Inserted) => discovered.push(descriptor),
                Ok(_) => {}
                Err(err) => warn!(module_id = %descriptor.id, error = %err, "Could not register module"),
            }
        }

        info!(
            discovered = discovered.len(),
            skipped = report.skipped.len(),
            "Scan completed"
        );
        Ok(discovered)
    }

    /// Load a `Discovered` or `Failed` module.
    pub async fn install(&self, id: &str) -> ModuleResult<InstallOutcome> {
        self.get(id)?;
        let slot = self.registry().try_acquire(id)?;
        let record = self.get(id)?;
        if record.state.is_loaded() {
            return Err(ModuleError::conflict(id, "module is already installed"));
        }

        let state = self.lifecycle.install(&slot).await?;
        Ok(InstallOutcome {
            module_id: id.to_string(),
            state,
        })
    }

    /// Unpack a zip package into the plugin root, register it and load it.
    pub async fn install_package(&self, bytes: Vec<u8>) -> ModuleResult<InstallOutcome> {
        if bytes.is_empty() {
            return Err(ValidationError::EmptyPayload.into());
        }

        let root = self.lifecycle.root().to_path_buf();
        let staged = package::stage(bytes, &root).await?;
        let staged_descriptor = self
            .lifecycle
            .scanner()
            .scan_dir(staged.module_dir())
            .await
            .map_err(|reason| rejected_package(staged.module_dir(), reason))?;

        let id = staged_descriptor.id.clone();
        let slot = self.registry().try_acquire(&id)?;
        let target = root.join(&id);

        // Replacing a never-loaded copy of the same module is fine; anything else is not.
        let replace_existing = match self.registry().get(&id) {
            Some(record) if record.state.is_loaded() || record.state.is_transient() => {
                return Err(ModuleError::conflict(&id, "module is already installed"));
            }
            Some(record) if record.descriptor.module_dir() != target => {
                return Err(ModuleError::conflict(
                    &id,
                    format!(
                        "id already registered from {}",
                        record.descriptor.module_dir().display()
                    ),
                ));
            }
            Some(_) => true,
            None if target.exists() => {
                return Err(ModuleError::conflict(
                    &id,
                    format!("{} already exists", target.display()),
                ));
            }
            None => false,
        };

        let move_target = target.clone();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            if replace_existing && move_target.exists() {
                std::fs::remove_dir_all(&move_target)?;
            }
            staged.commit(&move_target)
        })
        .await
        .map_err(|e| ModuleError::scan_io(&target, std::io::Error::other(e.to_string())))?
        .map_err(|e| ModuleError::scan_io(&target, e))?;

        let descriptor = self
            .lifecycle
            .scanner()
            .scan_dir(&target)
            .await
            .map_err(|reason| rejected_package(&target, reason))?;
        self.registry().upsert_discovered(&slot, descriptor)?;
        info!(module_id = %id, path = %target.display(), "Package installed into plugin root");

        let state = self.lifecycle.install(&slot).await?;
        Ok(InstallOutcome {
            module_id: id,
            state,
        })
    }

    /// Unload a module and forget it.
    pub async fn uninstall(&self, id: &str) -> ModuleResult<()> {
        self.get(id)?;
        let slot = self.registry().try_acquire(id)?;
        let record = self.lifecycle.remove(&slot).await?;

        if self.settings.purge_on_uninstall {
            let dir = record.descriptor.module_dir().to_path_buf();
            let purge_dir = dir.clone();
            match tokio::task::spawn_blocking(move || std::fs::remove_dir_all(&purge_dir)).await {
                Ok(Ok(())) => info!(module_id = %id, path = %dir.display(), "Module directory purged"),
                Ok(Err(err)) => warn!(module_id = %id, error = %err, "Failed to purge module directory"),
                Err(err) => warn!(module_id = %id, error = %err, "Purge task failed"),
            }
        }
        Ok(())
    }

    pub async fn enable(&self, id: &str) -> ModuleResult<()> {
        self.set_enabled(id, true)
    }

    pub async fn disable(&self, id: &str) -> ModuleResult<()> {
        self.set_enabled(id, false)
    }

    fn set_enabled(&self, id: &str, enabled: bool) -> ModuleResult<()> {
        self.get(id)?;
        let slot = self.registry().try_acquire(id)?;
        if !self.registry().set_enabled(&slot, enabled)? {
            debug!(module_id = %id, enabled, "Module already in requested state");
        }
        Ok(())
    }
}

fn rejected_package(dir: &Path, reason: SkipReason) -> ModuleError {
    match reason {
        SkipReason::Invalid(err) => err.into(),
        SkipReason::Io(msg) => ModuleError::scan_io(dir, std::io::Error::other(msg)),
        other => ValidationError::Package(other.to_string()).into(),
    }
}
