//! `modhost validate` command implementation

use std::path::Path;

use colored::Colorize;
use modhost_kernel::HostConfig;
use modhost_plugins::PluginScanner;

use crate::error::CliError;
use crate::output::{OutputFormat, print_json};

/// Execute the `modhost validate` command
pub async fn run(config: &HostConfig, dir: &Path, format: OutputFormat) -> Result<(), CliError> {
    let scanner = PluginScanner::new(&config.plugins);
    let descriptor = scanner
        .scan_dir(dir)
        .await
        .map_err(|reason| CliError::InvalidModule {
            dir: dir.to_path_buf(),
            reason,
        })?;

    if format == OutputFormat::Json {
        return print_json(&descriptor);
    }

    println!("{} {} is a valid module", "✓".green(), dir.display());
    println!("  id:           {}", descriptor.id.cyan());
    println!("  name:         {}", descriptor.name);
    println!("  version:      {}", descriptor.version);
    println!("  entry point:  {}", descriptor.entry_point);
    println!("  route prefix: {}", descriptor.route_prefix);
    println!("  artifact:     {}", descriptor.artifact_path.display());
    if !descriptor.capabilities.is_empty() {
        let capabilities: Vec<&str> = descriptor.capabilities.iter().map(String::as_str).collect();
        println!("  capabilities: {}", capabilities.join(", "));
    }
    Ok(())
}
