//! Module loader
//!
//! Turns a [`ModuleDescriptor`] into a live [`ModuleHandle`]: materializes the
//! artifact, instantiates its entry point and runs the `configure` hook under
//! a bounded wait. The loader never touches the registry.

use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use libloading::{Library, Symbol};
use modhost_kernel::{
    API_VERSION, API_VERSION_SYMBOL, ConfigScope, HostModule, LoadError, LoaderSettings,
    ModuleBox, ModuleDescriptor, ServiceRegistrar,
};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use tokio::task::JoinError;
use tracing::{debug, info, warn};

/// How long an aborted configure task gets to unwind before its library is pinned.
const ABORT_GRACE: Duration = Duration::from_millis(500);

/// A module object together with whatever keeps its code mapped.
pub struct MaterializedModule {
    pub module: Arc<dyn HostModule>,
    /// Dropped after `module`.
    pub library: Option<Arc<Library>>,
}

impl MaterializedModule {
    pub fn linked(module: ModuleBox) -> Self {
        Self {
            module: Arc::from(module),
            library: None,
        }
    }
}

/// Source of module instances for a family of artifacts.
#[async_trait::async_trait]
pub trait Materializer: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this materializer handles `descriptor`'s artifact.
    fn accepts(&self, descriptor: &ModuleDescriptor) -> bool;

    async fn materialize(
        &self,
        descriptor: &ModuleDescriptor,
    ) -> Result<MaterializedModule, LoadError>;
}

/// Loads native shared libraries exporting the module contract.
pub struct NativeMaterializer {
    extensions: Vec<String>,
}

impl NativeMaterializer {
    pub fn new(extensions: &[String]) -> Self {
        Self {
            extensions: extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
        }
    }

    /// Open `path`, check the contract version and run the constructor.
    ///
    /// # Safety
    /// Runs initialization code from an arbitrary shared library.
    unsafe fn open(path: &Path, entry_point: &str) -> Result<MaterializedModule, LoadError> {
        unsafe {
            let library = Library::new(path).map_err(|e| LoadError::LibraryOpen(e.to_string()))?;

            let module = {
                let version_fn: Symbol<unsafe extern "C" fn() -> u32> =
                    library.get(API_VERSION_SYMBOL).map_err(|e| {
                        LoadError::MissingSymbol(format!("_modhost_api_version: {}", e))
                    })?;
                let actual = version_fn();
                if actual != API_VERSION {
                    return Err(LoadError::ApiVersionMismatch {
                        expected: API_VERSION,
                        actual,
                    });
                }

                let create_fn: Symbol<unsafe extern "C" fn() -> *mut ModuleBox> = library
                    .get(entry_point.as_bytes())
                    .map_err(|e| LoadError::MissingSymbol(format!("{}: {}", entry_point, e)))?;
                let raw = create_fn();
                if raw.is_null() {
                    return Err(LoadError::NullEntryPoint(entry_point.to_string()));
                }
                let boxed: Box<ModuleBox> = Box::from_raw(raw);
                Arc::<dyn HostModule>::from(*boxed)
            };

            Ok(MaterializedModule {
                module,
                library: Some(Arc::new(library)),
            })
        }
    }
}

#[async_trait::async_trait]
impl Materializer for NativeMaterializer {
    fn name(&self) -> &str {
        "native"
    }

    fn accepts(&self, descriptor: &ModuleDescriptor) -> bool {
        descriptor
            .artifact_path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| {
                let ext = ext.to_lowercase();
                self.extensions.iter().any(|e| *e == ext)
            })
    }

    async fn materialize(
        &self,
        descriptor: &ModuleDescriptor,
    ) -> Result<MaterializedModule, LoadError> {
        let path = descriptor.artifact_path.clone();
        let entry_point = descriptor.entry_point.clone();
        debug!(path = %path.display(), %entry_point, "Opening native module");
        tokio::task::spawn_blocking(move || unsafe { Self::open(&path, &entry_point) })
            .await
            .map_err(|e| LoadError::Panicked(panic_message(e)))?
    }
}

/// Constructor for a module compiled into the host.
pub type ModuleFactory = Arc<dyn Fn() -> ModuleBox + Send + Sync>;

/// Modules linked into the host, keyed by entry-point name.
#[derive(Default)]
pub struct LinkedMaterializer {
    factories: RwLock<HashMap<String, ModuleFactory>>,
}

impl LinkedMaterializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, entry_point: impl Into<String>, factory: F)
    where
        F: Fn() -> ModuleBox + Send + Sync + 'static,
    {
        self.factories
            .write()
            .insert(entry_point.into(), Arc::new(factory));
    }

    pub fn with<F>(self, entry_point: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> ModuleBox + Send + Sync + 'static,
    {
        self.register(entry_point, factory);
        self
    }

    pub fn contains(&self, entry_point: &str) -> bool {
        self.factories.read().contains_key(entry_point)
    }
}

#[async_trait::async_trait]
impl Materializer for LinkedMaterializer {
    fn name(&self) -> &str {
        "linked"
    }

    fn accepts(&self, descriptor: &ModuleDescriptor) -> bool {
        self.contains(&descriptor.entry_point)
    }

    async fn materialize(
        &self,
        descriptor: &ModuleDescriptor,
    ) -> Result<MaterializedModule, LoadError> {
        let factory = self
            .factories
            .read()
            .get(&descriptor.entry_point)
            .cloned()
            .ok_or_else(|| LoadError::UnknownEntryPoint(descriptor.entry_point.clone()))?;

        std::panic::catch_unwind(AssertUnwindSafe(|| factory()))
            .map(MaterializedModule::linked)
            .map_err(|payload| LoadError::Panicked(payload_message(payload.as_ref())))
    }
}

/// A loaded, configured module instance.
pub struct ModuleHandle {
    module_id: String,
    module: Arc<dyn HostModule>,
    instance_id: String,
    artifact_path: PathBuf,
    artifact_hash: String,
    /// Keeps native code mapped; dropped after `module`.
    library: Option<Arc<Library>>,
}

impl ModuleHandle {
    pub fn new(
        module_id: impl Into<String>,
        materialized: MaterializedModule,
        artifact_path: impl Into<PathBuf>,
        artifact_hash: impl Into<String>,
    ) -> Self {
        Self {
            module_id: module_id.into(),
            module: materialized.module,
            instance_id: uuid::Uuid::now_v7().to_string(),
            artifact_path: artifact_path.into(),
            artifact_hash: artifact_hash.into(),
            library: materialized.library,
        }
    }

    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    pub fn module(&self) -> &dyn HostModule {
        self.module.as_ref()
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn artifact_path(&self) -> &Path {
        &self.artifact_path
    }

    /// SHA-256 of the artifact this instance was loaded from.
    pub fn artifact_hash(&self) -> &str {
        &self.artifact_hash
    }

    pub fn is_native(&self) -> bool {
        self.library.is_some()
    }
}

impl fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleHandle")
            .field("module_id", &self.module_id)
            .field("module", &self.module.name())
            .field("instance_id", &self.instance_id)
            .field("artifact_path", &self.artifact_path)
            .field("artifact_hash", &self.artifact_hash)
            .field("native", &self.is_native())
            .finish()
    }
}

impl Drop for ModuleHandle {
    fn drop(&mut self) {
        debug!(module_id = %self.module_id, instance_id = %self.instance_id, "Releasing module instance");
    }
}

/// Materializes and configures modules.
pub struct ModuleLoader {
    materializers: Vec<Arc<dyn Materializer>>,
    services: Arc<dyn ServiceRegistrar>,
    settings: LoaderSettings,
    module_config: HashMap<String, serde_json::Value>,
}

impl ModuleLoader {
    pub fn new(services: Arc<dyn ServiceRegistrar>, settings: LoaderSettings) -> Self {
        Self {
            materializers: Vec::new(),
            services,
            settings,
            module_config: HashMap::new(),
        }
    }

    /// Append a materializer; earlier ones take precedence.
    pub fn with_materializer(mut self, materializer: Arc<dyn Materializer>) -> Self {
        self.materializers.push(materializer);
        self
    }

    pub fn with_module_config(mut self, config: HashMap<String, serde_json::Value>) -> Self {
        self.module_config = config;
        self
    }

    pub fn settings(&self) -> &LoaderSettings {
        &self.settings
    }

    pub fn services(&self) -> &Arc<dyn ServiceRegistrar> {
        &self.services
    }

    pub fn scope_for(&self, module_id: &str) -> ConfigScope {
        match self.module_config.get(module_id) {
            Some(values) => ConfigScope::new(module_id, values.clone()),
            None => ConfigScope::empty(module_id),
        }
    }

    /// SHA-256 of an artifact, hex encoded.
    pub async fn artifact_hash(path: &Path) -> Result<String, LoadError> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || -> Result<String, LoadError> {
            let contents = std::fs::read(&path)?;
            let mut hasher = Sha256::new();
            hasher.update(&contents);
            Ok(format!("{:x}", hasher.finalize()))
        })
        .await
        .map_err(|e| LoadError::Panicked(panic_message(e)))?
    }

    pub async fn load(&self, descriptor: &ModuleDescriptor) -> Result<ModuleHandle, LoadError> {
        let id = descriptor.id.as_str();
        let hash = Self::artifact_hash(&descriptor.artifact_path).await?;

        let materializer = self
            .materializers
            .iter()
            .find(|m| m.accepts(descriptor))
            .ok_or_else(|| LoadError::NoMaterializer(descriptor.artifact_path.clone()))?;
        debug!(module_id = %id, materializer = materializer.name(), "Materializing module");

        let materialized = materializer.materialize(descriptor).await?;

        if let Err(err) = self.configure(id, &materialized).await {
            let removed = self.services.unregister_module(id);
            if removed > 0 {
                debug!(module_id = %id, removed, "Rolled back services of failed module");
            }
            return Err(err);
        }

        let handle = ModuleHandle::new(id, materialized, &descriptor.artifact_path, hash);
        info!(
            module_id = %id,
            version = %descriptor.version,
            instance_id = %handle.instance_id(),
            "Module loaded"
        );
        Ok(handle)
    }

    async fn configure(&self, id: &str, materialized: &MaterializedModule) -> Result<(), LoadError> {
        let module = materialized.module.clone();
        let services = self.services.clone();
        let scope = self.scope_for(id);
        let limit = self.settings.configure_timeout();

        let mut task = tokio::spawn(async move { module.configure(services, scope).await });

        match tokio::time::timeout(limit, &mut task).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(hook))) => Err(LoadError::Configure(hook)),
            Ok(Err(join)) => Err(LoadError::Panicked(panic_message(join))),
            Err(_) => {
                task.abort();
                if tokio::time::timeout(ABORT_GRACE, task).await.is_err() {
                    // The hook is still running code from this library.
                    if let Some(library) = &materialized.library {
                        std::mem::forget(library.clone());
                    }
                    warn!(module_id = %id, "Configure hook ignored cancellation, pinning its library");
                }
                Err(LoadError::ConfigureTimeout(limit))
            }
        }
    }

    /// Run the shutdown hook and drop the module's services.
    ///
    /// Hook failures are logged, never returned.
    pub async fn unload(&self, handle: Arc<ModuleHandle>) {
        let id = handle.module_id().to_string();
        let shutdown = AssertUnwindSafe(handle.module().shutdown()).catch_unwind();

        match tokio::time::timeout(self.settings.shutdown_timeout(), shutdown).await {
            Ok(Ok(Ok(()))) => debug!(module_id = %id, "Shutdown hook completed"),
            Ok(Ok(Err(err))) => warn!(module_id = %id, error = %err, "Shutdown hook failed"),
            Ok(Err(payload)) => warn!(
                module_id = %id,
                panic = %payload_message(payload.as_ref()),
                "Shutdown hook panicked"
            ),
            Err(_) => warn!(
                module_id = %id,
                timeout = ?self.settings.shutdown_timeout(),
                "Shutdown hook timed out"
            ),
        }

        let removed = self.services.unregister_module(&id);
        info!(
            module_id = %id,
            artifact = %handle.artifact_path().display(),
            services_removed = removed,
            "Module unloaded"
        );
    }
}

fn panic_message(err: JoinError) -> String {
    if err.is_cancelled() {
        return "task was cancelled".to_string();
    }
    payload_message(err.into_panic().as_ref())
}

fn payload_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modhost_kernel::{HookError, ServiceBinding, ServiceTable};
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    enum Behavior {
        Ok,
        Fail,
        Panic,
        Hang,
    }

    struct Meter {
        behavior: Behavior,
        shutdowns: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl HostModule for Meter {
        fn name(&self) -> &str {
            "meter"
        }

        async fn configure(
            &self,
            services: Arc<dyn ServiceRegistrar>,
            scope: ConfigScope,
        ) -> Result<(), HookError> {
            services.register(&scope.module_id, ServiceBinding::new("meter.svc", Arc::new(())))?;
            match self.behavior {
                Behavior::Ok => Ok(()),
                Behavior::Fail => Err(HookError::Config("rejected".into())),
                Behavior::Panic => panic!("configure exploded"),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(())
                }
            }
        }

        async fn shutdown(&self) -> Result<(), HookError> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Fixture {
        _dir: TempDir,
        descriptor: ModuleDescriptor,
        services: Arc<ServiceTable>,
        loader: ModuleLoader,
        shutdowns: Arc<AtomicUsize>,
    }

    fn fixture(behavior: fn() -> Behavior, timeout_ms: u64) -> Fixture {
        let dir = TempDir::new().unwrap();
        let artifact = dir.path().join("libmeter.so");
        std::fs::write(&artifact, b"meter v1").unwrap();

        let shutdowns = Arc::new(AtomicUsize::new(0));
        let counter = shutdowns.clone();
        let linked = LinkedMaterializer::new().with("meter_create", move || {
            Box::new(Meter {
                behavior: behavior(),
                shutdowns: counter.clone(),
            }) as ModuleBox
        });

        let services = Arc::new(ServiceTable::new());
        let settings = LoaderSettings {
            configure_timeout_ms: timeout_ms,
            shutdown_timeout_ms: 1_000,
        };
        let loader = ModuleLoader::new(services.clone(), settings)
            .with_materializer(Arc::new(linked))
            .with_materializer(Arc::new(NativeMaterializer::new(&["so".to_string()])));

        let descriptor = ModuleDescriptor {
            id: "meter".into(),
            name: "Meter".into(),
            version: "1.0.0".into(),
            manifest_path: dir.path().join("manifest.json"),
            artifact_path: artifact,
            entry_point: "meter_create".into(),
            capabilities: BTreeSet::new(),
            route_prefix: "/api/meter".into(),
            description: None,
        };

        Fixture {
            _dir: dir,
            descriptor,
            services,
            loader,
            shutdowns,
        }
    }

    #[tokio::test]
    async fn test_load_and_unload_linked_module() {
        let fx = fixture(|| Behavior::Ok, 1_000);
        let handle = fx.loader.load(&fx.descriptor).await.unwrap();

        assert_eq!(handle.module_id(), "meter");
        assert_eq!(handle.module().name(), "meter");
        assert_eq!(handle.artifact_hash().len(), 64);
        assert_eq!(handle.artifact_path(), fx.descriptor.artifact_path.as_path());
        assert!(!handle.is_native());
        assert_eq!(fx.services.owner_of("meter.svc").as_deref(), Some("meter"));

        fx.loader.unload(Arc::new(handle)).await;
        assert_eq!(fx.shutdowns.load(Ordering::SeqCst), 1);
        assert!(fx.services.is_empty());
    }

    #[tokio::test]
    async fn test_hook_error_rolls_back_services() {
        let fx = fixture(|| Behavior::Fail, 1_000);
        let err = fx.loader.load(&fx.descriptor).await.unwrap_err();
        assert!(matches!(err, LoadError::Configure(HookError::Config(_))));
        assert!(fx.services.is_empty());
    }

    #[tokio::test]
    async fn test_hook_panic_is_contained() {
        let fx = fixture(|| Behavior::Panic, 1_000);
        let err = fx.loader.load(&fx.descriptor).await.unwrap_err();
        match err {
            LoadError::Panicked(msg) => assert!(msg.contains("configure exploded")),
            other => panic!("unexpected error: {other}"),
        }
        assert!(fx.services.is_empty());
    }

    #[tokio::test]
    async fn test_hook_timeout_fails_load() {
        let fx = fixture(|| Behavior::Hang, 50);
        let err = fx.loader.load(&fx.descriptor).await.unwrap_err();
        assert!(matches!(err, LoadError::ConfigureTimeout(d) if d == Duration::from_millis(50)));
        assert!(fx.services.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_artifact_kind_has_no_materializer() {
        let mut fx = fixture(|| Behavior::Ok, 1_000);
        let other = fx.descriptor.artifact_path.with_extension("wasm");
        std::fs::write(&other, b"\0asm").unwrap();
        fx.descriptor.artifact_path = other;
        fx.descriptor.entry_point = "not_linked".into();

        let err = fx.loader.load(&fx.descriptor).await.unwrap_err();
        assert!(matches!(err, LoadError::NoMaterializer(_)));
    }

    #[tokio::test]
    async fn test_garbage_native_library_fails_to_open() {
        let mut fx = fixture(|| Behavior::Ok, 1_000);
        fx.descriptor.entry_point = "not_linked".into();

        let err = fx.loader.load(&fx.descriptor).await.unwrap_err();
        assert!(matches!(err, LoadError::LibraryOpen(_)));
    }

    #[tokio::test]
    async fn test_missing_artifact_is_io_error() {
        let mut fx = fixture(|| Behavior::Ok, 1_000);
        fx.descriptor.artifact_path = fx.descriptor.artifact_path.with_file_name("absent.so");
        let err = fx.loader.load(&fx.descriptor).await.unwrap_err();
        assert!(matches!(err, LoadError::Io(_)));
    }

    #[tokio::test]
    async fn test_artifact_hash_tracks_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lib.so");
        std::fs::write(&path, b"one").unwrap();
        let first = ModuleLoader::artifact_hash(&path).await.unwrap();
        assert_eq!(first, ModuleLoader::artifact_hash(&path).await.unwrap());
        std::fs::write(&path, b"two").unwrap();
        assert_ne!(first, ModuleLoader::artifact_hash(&path).await.unwrap());
    }

    #[test]
    fn test_scope_for_uses_module_config() {
        let loader = ModuleLoader::new(Arc::new(ServiceTable::new()), LoaderSettings::default())
            .with_module_config(HashMap::from([(
                "pricing".to_string(),
                serde_json::json!({ "currency": "EUR" }),
            )]));
        assert_eq!(
            loader.scope_for("pricing").get::<String>("currency").as_deref(),
            Some("EUR")
        );
        assert_eq!(loader.scope_for("other").values, serde_json::json!({}));
    }
}
