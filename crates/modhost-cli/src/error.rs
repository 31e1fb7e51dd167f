use std::path::PathBuf;

use modhost_kernel::{ConfigError, ModuleError};
use modhost_plugins::{HostError, SkipReason};

#[derive(thiserror::Error, Debug)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Module(#[from] ModuleError),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error("Invalid module at {}: {reason}", dir.display())]
    InvalidModule { dir: PathBuf, reason: SkipReason },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
