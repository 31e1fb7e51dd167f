//! modhost plugins
//!
//! Runtime side of the module host:
//! - discovery of module directories under the plugin root
//! - loading native or linked modules and running their hooks
//! - the module registry and its per-id mutation slots
//! - the filesystem monitor that keeps the registry in sync with disk
//! - the request-time access gate and the management facade

pub mod gate;
pub mod host;
pub mod lifecycle;
pub mod loader;
pub mod manager;
pub mod manifest;
pub mod monitor;
pub mod package;
pub mod registry;
pub mod scanner;

pub use gate::{AccessGate, GateDecision};
pub use host::{HostError, ModuleHost, ModuleHostBuilder};
pub use lifecycle::{Lifecycle, SyncOutcome};
pub use loader::{
    LinkedMaterializer, MaterializedModule, Materializer, ModuleHandle, ModuleLoader,
    NativeMaterializer,
};
pub use manager::{InstallOutcome, ModuleManager};
pub use manifest::ModuleManifest;
pub use monitor::{MonitorConfig, MonitorSignal, PluginMonitor, WatchEvent, WatchEventKind};
pub use registry::{
    ModuleRecord, ModuleRegistry, ModuleSlot, RegistryEvent, RegistryStats, UpsertOutcome,
};
pub use scanner::{PluginScanner, ScanReport, SkipReason, SkippedEntry};

pub use modhost_kernel::{
    CallerIdentity, HostConfig, HostModule, ModuleDescriptor, ModuleError, ModuleResult,
    ModuleState,
};
