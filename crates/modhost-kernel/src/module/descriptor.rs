use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Lifecycle state of a module record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModuleState {
    /// Found on disk, not loaded
    Discovered,
    /// Load in progress
    Installing,
    /// Loaded and serving
    Enabled,
    /// Loaded, traffic rejected
    Disabled,
    /// Last load attempt failed
    Failed,
    /// Unload in progress
    Uninstalling,
    /// Evicted from the registry
    Removed,
}

impl ModuleState {
    /// Whether the module holds a live runtime handle in this state.
    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Enabled | Self::Disabled)
    }

    /// Whether a mutation is mid-flight in this state.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Installing | Self::Uninstalling)
    }
}

impl std::fmt::Display for ModuleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Discovered => "Discovered",
            Self::Installing => "Installing",
            Self::Enabled => "Enabled",
            Self::Disabled => "Disabled",
            Self::Failed => "Failed",
            Self::Uninstalling => "Uninstalling",
            Self::Removed => "Removed",
        };
        f.write_str(name)
    }
}

/// Immutable description of a module found on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    /// Unique id derived from the manifest name
    pub id: String,
    /// Name as declared in the manifest
    pub name: String,
    /// Version string as declared in the manifest
    pub version: String,
    pub manifest_path: PathBuf,
    pub artifact_path: PathBuf,
    /// Constructor symbol (native) or factory key (linked)
    pub entry_point: String,
    /// Capabilities a caller must hold to reach the module's routes
    pub capabilities: BTreeSet<String>,
    /// Lower-cased request path prefix owned by the module
    pub route_prefix: String,
    pub description: Option<String>,
}

impl ModuleDescriptor {
    /// Directory holding the manifest and artifact.
    pub fn module_dir(&self) -> &Path {
        self.manifest_path.parent().unwrap_or(&self.manifest_path)
    }

    pub fn requires(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }
}
