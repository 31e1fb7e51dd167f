//! Caller identity and authorization seam used by the access gate.

use std::collections::BTreeSet;

use crate::module::ModuleDescriptor;

/// Identity of the caller behind an inbound request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallerIdentity {
    pub subject: Option<String>,
    pub capabilities: BTreeSet<String>,
}

impl CallerIdentity {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: Some(subject.into()),
            capabilities: BTreeSet::new(),
        }
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    pub fn has(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }
}

/// Decides whether a caller may reach a module.
///
/// Runs on the request path; implementations must not block.
pub trait Authorizer: Send + Sync {
    fn authorize(&self, caller: &CallerIdentity, module: &ModuleDescriptor) -> bool;
}

/// Lets every caller through.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn authorize(&self, _caller: &CallerIdentity, _module: &ModuleDescriptor) -> bool {
        true
    }
}

/// Requires the caller to hold every capability the module declares.
#[derive(Debug, Clone, Copy, Default)]
pub struct CapabilityAuthorizer;

impl Authorizer for CapabilityAuthorizer {
    fn authorize(&self, caller: &CallerIdentity, module: &ModuleDescriptor) -> bool {
        module.capabilities.iter().all(|c| caller.has(c))
    }
}
