//! Host assembly
//!
//! [`ModuleHost`] wires a [`HostConfig`] into the registry, scanner, loader,
//! lifecycle, management facade, access gate and monitor.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use modhost_kernel::{
    AllowAll, Authorizer, ConfigError, HostConfig, ModuleBox, ModuleError, ServiceRegistrar,
    ServiceTable,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::gate::AccessGate;
use crate::lifecycle::{Lifecycle, SyncOutcome};
use crate::loader::{LinkedMaterializer, ModuleLoader, NativeMaterializer};
use crate::manager::ModuleManager;
use crate::monitor::{MonitorConfig, PluginMonitor};
use crate::registry::ModuleRegistry;
use crate::scanner::PluginScanner;

#[derive(Debug, Error)]
pub enum HostError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Module(#[from] ModuleError),
}

pub struct ModuleHostBuilder {
    config: HostConfig,
    linked: LinkedMaterializer,
    authorizer: Arc<dyn Authorizer>,
    services: Option<Arc<dyn ServiceRegistrar>>,
}

impl ModuleHostBuilder {
    pub fn new(config: HostConfig) -> Self {
        Self {
            config,
            linked: LinkedMaterializer::new(),
            authorizer: Arc::new(AllowAll),
            services: None,
        }
    }

    /// Serve `entry_point` from a module compiled into the host binary.
    pub fn with_linked_module<F>(self, entry_point: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> ModuleBox + Send + Sync + 'static,
    {
        self.linked.register(entry_point, factory);
        self
    }

    pub fn with_authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }

    /// Service container handed to configure hooks; a fresh [`ServiceTable`] by default.
    pub fn with_services(mut self, services: Arc<dyn ServiceRegistrar>) -> Self {
        self.services = Some(services);
        self
    }

    /// Create the plugin root if needed and assemble the host.
    ///
    /// Nothing is scanned or loaded until [`ModuleHost::start`].
    pub async fn build(self) -> Result<ModuleHost, HostError> {
        self.config.validate()?;
        let root = prepare_root(&self.config.plugins.path).await?;

        let services = self
            .services
            .unwrap_or_else(|| Arc::new(ServiceTable::new()));
        let loader = ModuleLoader::new(services.clone(), self.config.loader.clone())
            .with_module_config(self.config.modules.clone())
            .with_materializer(Arc::new(self.linked))
            .with_materializer(Arc::new(NativeMaterializer::new(
                &self.config.plugins.artifact_extensions,
            )));

        let registry = Arc::new(ModuleRegistry::new());
        let lifecycle = Arc::new(Lifecycle::new(
            registry.clone(),
            PluginScanner::new(&self.config.plugins),
            Arc::new(loader),
            &root,
        ));
        let manager = Arc::new(ModuleManager::new(
            lifecycle.clone(),
            self.config.manager.clone(),
        ));
        let gate = Arc::new(AccessGate::new(registry.clone(), self.authorizer));
        let monitor = PluginMonitor::new(
            lifecycle.clone(),
            MonitorConfig::from(&self.config.monitor),
        );

        info!(root = %root.display(), "Module host assembled");
        Ok(ModuleHost {
            config: self.config,
            root,
            registry,
            lifecycle,
            manager,
            gate,
            services,
            monitor,
        })
    }
}

pub struct ModuleHost {
    config: HostConfig,
    root: PathBuf,
    registry: Arc<ModuleRegistry>,
    lifecycle: Arc<Lifecycle>,
    manager: Arc<ModuleManager>,
    gate: Arc<AccessGate>,
    services: Arc<dyn ServiceRegistrar>,
    monitor: PluginMonitor,
}

impl ModuleHost {
    pub fn builder(config: HostConfig) -> ModuleHostBuilder {
        ModuleHostBuilder::new(config)
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Canonical plugin root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn manager(&self) -> &Arc<ModuleManager> {
        &self.manager
    }

    pub fn gate(&self) -> &Arc<AccessGate> {
        &self.gate
    }

    pub fn services(&self) -> &Arc<dyn ServiceRegistrar> {
        &self.services
    }

    pub fn monitor(&self) -> &PluginMonitor {
        &self.monitor
    }

    /// Start the monitor: recover, reconcile the root, then watch it.
    pub async fn start(&mut self) -> Result<Vec<SyncOutcome>, HostError> {
        Ok(self.monitor.start().await?)
    }

    /// Stop the monitor and unload every loaded module.
    pub async fn shutdown(&mut self) {
        self.monitor.stop().await;

        for record in self.registry.list() {
            if !record.state.is_loaded() {
                continue;
            }
            let slot = self.registry.acquire(record.id()).await;
            if let Err(err) = self.lifecycle.uninstall(&slot).await {
                warn!(module_id = %record.id(), error = %err, "Failed to unload module on shutdown");
            }
        }
        info!("Module host shut down");
    }
}

async fn prepare_root(path: &Path) -> Result<PathBuf, ModuleError> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| ModuleError::scan_io(path, e))?;
    tokio::fs::canonicalize(path)
        .await
        .map_err(|e| ModuleError::scan_io(path, e))
}
