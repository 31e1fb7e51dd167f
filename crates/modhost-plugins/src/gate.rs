//! Request-time access gate
//!
//! Runs before routing on every inbound request. Reads only the registry
//! snapshot, so it never waits on an in-flight install or uninstall.

use std::sync::Arc;

use modhost_kernel::{Authorizer, CallerIdentity, ModuleState};
use tracing::debug;

use crate::registry::{ModuleRecord, ModuleRegistry};

/// Outcome of gating one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Not addressed to a module, or addressed to an enabled one the caller may use
    Pass,
    /// Module exists but is not serving
    Unavailable {
        module_id: String,
        module_name: String,
        message: String,
    },
    /// Caller lacks the module's capabilities
    Forbidden { module_id: String },
}

impl GateDecision {
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::Pass => 200,
            Self::Unavailable { .. } => 503,
            Self::Forbidden { .. } => 403,
        }
    }

    /// Response body for a rejection.
    pub fn body(&self) -> Option<&str> {
        match self {
            Self::Unavailable { message, .. } => Some(message),
            Self::Pass | Self::Forbidden { .. } => None,
        }
    }
}

pub struct AccessGate {
    registry: Arc<ModuleRegistry>,
    authorizer: Arc<dyn Authorizer>,
}

impl AccessGate {
    pub fn new(registry: Arc<ModuleRegistry>, authorizer: Arc<dyn Authorizer>) -> Self {
        Self {
            registry,
            authorizer,
        }
    }

    /// Module whose route prefix owns `path`; the longest prefix wins.
    pub fn resolve(&self, path: &str) -> Option<ModuleRecord> {
        let path = normalize(path);
        let snapshot = self.registry.snapshot();
        snapshot
            .values()
            .filter(|r| owns(&r.descriptor.route_prefix, &path))
            .max_by_key(|r| r.descriptor.route_prefix.len())
            .cloned()
    }

    pub fn check(&self, path: &str, caller: &CallerIdentity) -> GateDecision {
        let Some(record) = self.resolve(path) else {
            return GateDecision::Pass;
        };
        let module_id = record.descriptor.id.clone();

        if record.state != ModuleState::Enabled {
            let name = &record.descriptor.name;
            let message = if record.state == ModuleState::Disabled {
                format!("Module '{}' is currently disabled", name)
            } else {
                format!("Module '{}' is currently unavailable", name)
            };
            debug!(module_id = %module_id, state = %record.state, path, "Rejecting request to inactive module");
            return GateDecision::Unavailable {
                module_id,
                module_name: name.clone(),
                message,
            };
        }

        if !self.authorizer.authorize(caller, &record.descriptor) {
            debug!(module_id = %module_id, path, "Rejecting unauthorized request");
            return GateDecision::Forbidden { module_id };
        }

        GateDecision::Pass
    }
}

fn normalize(path: &str) -> String {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    path.to_lowercase()
}

/// Segment-aware prefix match: `/api/a` owns `/api/a` and `/api/a/x`, not `/api/ab`.
fn owns(prefix: &str, path: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}
