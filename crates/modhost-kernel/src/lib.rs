//! modhost kernel
//!
//! The contract shared by the module host and the modules it loads:
//! - the [`HostModule`] entry-point trait and the [`declare_module!`] export macro
//! - descriptor, lifecycle state and version types
//! - the error taxonomy used across the host
//! - external collaborator seams (service registration, authorization)
//! - host configuration loading
//!
//! Module artifacts depend on this crate only.

pub mod config;
pub mod error;
pub mod module;
pub mod security;

pub use self::config::{
    ConfigError, ConfigResult, HostConfig, LoaderSettings, ManagerSettings, MonitorSettings,
    PluginsConfig,
};
pub use error::{HookError, LoadError, ModuleError, ModuleResult, ValidationError};
pub use module::{
    API_VERSION, API_VERSION_SYMBOL, ConfigScope, HostModule, ModuleBox, ModuleDescriptor,
    ModuleState, ModuleVersion, ServiceBinding, ServiceRegistrar, ServiceTable,
};
pub use security::{AllowAll, Authorizer, CallerIdentity, CapabilityAuthorizer};
