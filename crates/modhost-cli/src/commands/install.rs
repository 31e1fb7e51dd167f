//! `modhost install` command implementation

use std::path::Path;

use colored::Colorize;
use modhost_kernel::HostConfig;
use modhost_plugins::ModuleHost;

use crate::error::CliError;
use crate::output::{OutputFormat, print_json};

/// Execute the `modhost install` command
///
/// Unpacks the package into the plugin root and loads it once to prove it
/// works; the module is unloaded again when the command exits.
pub async fn run(config: HostConfig, package: &Path, format: OutputFormat) -> Result<(), CliError> {
    let bytes = tokio::fs::read(package).await?;
    let mut host = ModuleHost::builder(config).build().await?;

    let result = host.manager().install_package(bytes).await;
    host.shutdown().await;
    let outcome = result?;

    if format == OutputFormat::Json {
        return print_json(&outcome);
    }
    println!(
        "{} Installed {} into {} ({})",
        "✓".green(),
        outcome.module_id.cyan(),
        host.root().display(),
        outcome.state
    );
    Ok(())
}
