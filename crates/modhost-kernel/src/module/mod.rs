//! Module contract
//!
//! A module artifact exposes two symbols to the host:
//! - [`API_VERSION_SYMBOL`], returning the [`API_VERSION`] it was built against
//! - a constructor named by the manifest's `entry_point`, returning a boxed
//!   [`HostModule`]
//!
//! [`declare_module!`](crate::declare_module) generates both.

mod descriptor;
mod services;
mod version;

use std::sync::Arc;

pub use descriptor::{ModuleDescriptor, ModuleState};
pub use services::{ConfigScope, ServiceBinding, ServiceRegistrar, ServiceTable};
pub use version::ModuleVersion;

use crate::error::HookError;

/// Contract version the host expects from native artifacts.
pub const API_VERSION: u32 = 1;

/// Symbol every native artifact must export.
pub const API_VERSION_SYMBOL: &[u8] = b"_modhost_api_version";

/// Thin-pointer payload returned by native constructors.
pub type ModuleBox = Box<dyn HostModule>;

/// Runtime entry point of a loaded module.
#[async_trait::async_trait]
pub trait HostModule: Send + Sync {
    /// Display name of the module instance.
    fn name(&self) -> &str;

    /// Register the module's services with the host.
    ///
    /// Called once per install with the registration surface and the
    /// module's own configuration scope. The host bounds how long this may
    /// take; a module that does not return in time is marked failed.
    async fn configure(
        &self,
        services: Arc<dyn ServiceRegistrar>,
        scope: ConfigScope,
    ) -> Result<(), HookError>;

    /// Release resources before the module is unloaded.
    async fn shutdown(&self) -> Result<(), HookError> {
        Ok(())
    }
}

/// Export a module type from a `cdylib` artifact.
///
/// ```rust,ignore
/// struct Pricing;
///
/// #[async_trait::async_trait]
/// impl modhost_kernel::HostModule for Pricing { /* ... */ }
///
/// modhost_kernel::declare_module!(pricing_module_create, Pricing);
/// ```
#[macro_export]
macro_rules! declare_module {
    ($entry:ident, $ctor:expr) => {
        #[unsafe(no_mangle)]
        pub extern "C" fn _modhost_api_version() -> u32 {
            $crate::module::API_VERSION
        }

        #[unsafe(no_mangle)]
        pub extern "C" fn $entry() -> *mut $crate::module::ModuleBox {
            let module: $crate::module::ModuleBox = Box::new($ctor);
            Box::into_raw(Box::new(module))
        }
    };
}
