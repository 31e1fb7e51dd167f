use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;

use crate::error::HookError;

/// A service a module offers to the rest of the host.
#[derive(Clone)]
pub struct ServiceBinding {
    pub name: String,
    pub description: Option<String>,
    pub instance: Arc<dyn Any + Send + Sync>,
}

impl ServiceBinding {
    pub fn new(name: impl Into<String>, instance: Arc<dyn Any + Send + Sync>) -> Self {
        Self {
            name: name.into(),
            description: None,
            instance,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Downcast the bound instance.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.instance.clone().downcast::<T>().ok()
    }
}

impl fmt::Debug for ServiceBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceBinding")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Service registration surface handed to modules during `configure`.
pub trait ServiceRegistrar: Send + Sync {
    fn register(&self, module_id: &str, binding: ServiceBinding) -> Result<(), HookError>;

    /// Drop every service owned by `module_id`, returning how many were removed.
    fn unregister_module(&self, module_id: &str) -> usize;
}

/// In-memory [`ServiceRegistrar`] keyed by service name.
#[derive(Default)]
pub struct ServiceTable {
    services: RwLock<HashMap<String, (String, ServiceBinding)>>,
}

impl ServiceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<ServiceBinding> {
        self.services.read().get(name).map(|(_, b)| b.clone())
    }

    /// Module that owns the named service.
    pub fn owner_of(&self, name: &str) -> Option<String> {
        self.services.read().get(name).map(|(owner, _)| owner.clone())
    }

    pub fn services_of(&self, module_id: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .services
            .read()
            .iter()
            .filter(|(_, (owner, _))| owner == module_id)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }
}

impl ServiceRegistrar for ServiceTable {
    fn register(&self, module_id: &str, binding: ServiceBinding) -> Result<(), HookError> {
        let mut services = self.services.write();
        if let Some((owner, _)) = services.get(&binding.name) {
            return Err(HookError::Registration(format!(
                "service '{}' is already provided by module '{}'",
                binding.name, owner
            )));
        }
        tracing::debug!(module_id, service = %binding.name, "service registered");
        services.insert(binding.name.clone(), (module_id.to_string(), binding));
        Ok(())
    }

    fn unregister_module(&self, module_id: &str) -> usize {
        let mut services = self.services.write();
        let before = services.len();
        services.retain(|_, (owner, _)| owner != module_id);
        before - services.len()
    }
}

/// Configuration handed to a module's `configure` hook.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigScope {
    pub module_id: String,
    pub values: serde_json::Value,
}

impl ConfigScope {
    pub fn new(module_id: impl Into<String>, values: serde_json::Value) -> Self {
        Self {
            module_id: module_id.into(),
            values,
        }
    }

    pub fn empty(module_id: impl Into<String>) -> Self {
        Self::new(module_id, serde_json::Value::Object(Default::default()))
    }

    /// Typed lookup of a top-level key; `None` if absent or of the wrong shape.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.values
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Like [`get`](Self::get) but reports the missing key as a hook error.
    pub fn require<T: DeserializeOwned>(&self, key: &str) -> Result<T, HookError> {
        self.get(key).ok_or_else(|| {
            HookError::Config(format!(
                "module '{}' requires config key '{}'",
                self.module_id, key
            ))
        })
    }
}
