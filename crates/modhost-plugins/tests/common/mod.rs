//! Shared fixtures for modhost-plugins integration tests

#![allow(dead_code)]

use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use modhost_kernel::{
    ConfigScope, HookError, HostConfig, HostModule, ModuleBox, PluginsConfig, ServiceBinding,
    ServiceRegistrar, ServiceTable,
};
use modhost_plugins::{ModuleHost, ModuleState, RegistryEvent};
use tempfile::TempDir;
use tokio::sync::broadcast;
use zip::write::SimpleFileOptions;

/// Module that registers one service named after itself.
pub struct EchoModule {
    name: String,
}

impl EchoModule {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait::async_trait]
impl HostModule for EchoModule {
    fn name(&self) -> &str {
        &self.name
    }

    async fn configure(
        &self,
        services: Arc<dyn ServiceRegistrar>,
        scope: ConfigScope,
    ) -> Result<(), HookError> {
        let binding = ServiceBinding::new(
            format!("{}.echo", scope.module_id),
            Arc::new(self.name.clone()),
        );
        services.register(&scope.module_id, binding)
    }
}

/// Module whose configure hook always fails.
pub struct FailingModule;

#[async_trait::async_trait]
impl HostModule for FailingModule {
    fn name(&self) -> &str {
        "failing"
    }

    async fn configure(
        &self,
        _services: Arc<dyn ServiceRegistrar>,
        _scope: ConfigScope,
    ) -> Result<(), HookError> {
        Err(HookError::Config("database url is not set".into()))
    }
}

pub const ECHO_ENTRY: &str = "echo_create";
pub const FAILING_ENTRY: &str = "failing_create";

/// A host over a temporary plugin root with the watcher off, so tests
/// drive the monitor through its event sender.
pub struct Fixture {
    pub dir: TempDir,
    pub host: ModuleHost,
    pub services: Arc<ServiceTable>,
    pub loads: Arc<AtomicUsize>,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(adjust: impl FnOnce(&mut HostConfig)) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = HostConfig {
            plugins: PluginsConfig {
                path: dir.path().join("Plugins"),
                ..PluginsConfig::default()
            },
            ..HostConfig::default()
        };
        config.monitor.watch = false;
        config.monitor.reconcile_on_start = false;
        config.monitor.debounce_ms = 50;
        config.loader.configure_timeout_ms = 2_000;
        adjust(&mut config);

        let loads = Arc::new(AtomicUsize::new(0));
        let counter = loads.clone();
        let services = Arc::new(ServiceTable::new());
        let host = ModuleHost::builder(config)
            .with_services(services.clone())
            .with_linked_module(ECHO_ENTRY, move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Box::new(EchoModule::named("echo")) as ModuleBox
            })
            .with_linked_module(FAILING_ENTRY, || Box::new(FailingModule) as ModuleBox)
            .build()
            .await
            .unwrap();

        Self {
            dir,
            host,
            services,
            loads,
        }
    }

    pub fn root(&self) -> PathBuf {
        self.host.root().to_path_buf()
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn write_module(&self, dir_name: &str, name: &str, version: &str, entry: &str) -> PathBuf {
        write_module(&self.root(), dir_name, name, version, entry, b"artifact-v1")
    }
}

pub fn manifest_json(name: &str, version: &str, entry: &str) -> String {
    format!(
        r#"{{ "name": "{name}", "version": "{version}", "entry_point": "{entry}", "capabilities": [] }}"#
    )
}

pub fn write_module(
    root: &Path,
    dir_name: &str,
    name: &str,
    version: &str,
    entry: &str,
    artifact: &[u8],
) -> PathBuf {
    let dir = root.join(dir_name);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("manifest.json"), manifest_json(name, version, entry)).unwrap();
    fs::write(dir.join(format!("lib{}.so", dir_name)), artifact).unwrap();
    dir
}

pub fn package(name: &str, version: &str, entry: &str) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let folder = name.to_lowercase();
    writer
        .start_file(format!("{folder}/manifest.json"), SimpleFileOptions::default())
        .unwrap();
    writer
        .write_all(manifest_json(name, version, entry).as_bytes())
        .unwrap();
    writer
        .start_file(format!("{folder}/lib{folder}.so"), SimpleFileOptions::default())
        .unwrap();
    writer.write_all(b"packaged").unwrap();
    writer.finish().unwrap().into_inner()
}

/// Wait until `id` reaches `state`, or fail after a few seconds.
pub async fn wait_for_state(
    events: &mut broadcast::Receiver<RegistryEvent>,
    id: &str,
    state: ModuleState,
) {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(RegistryEvent::StateChanged { id: changed, to, .. })
                    if changed == id && to == state =>
                {
                    return;
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("registry closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .unwrap_or_else(|_| panic!("{id} never reached {state}"));
}
