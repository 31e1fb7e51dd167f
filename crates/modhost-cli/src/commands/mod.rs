//! Command implementations

pub mod config_cmd;
pub mod install;
pub mod run;
pub mod scan;
pub mod validate;

use std::path::Path;

use modhost_kernel::HostConfig;

use crate::error::CliError;

/// Effective configuration: file and environment, then the `--root` override.
pub fn load_config(path: Option<&Path>, root: Option<&Path>) -> Result<HostConfig, CliError> {
    let mut config = HostConfig::load(path)?;
    if let Some(root) = root {
        config.plugins.path = root.to_path_buf();
    }
    Ok(config)
}
