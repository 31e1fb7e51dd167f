//! `modhost config` command implementation

use std::path::Path;

use colored::Colorize;
use modhost_kernel::HostConfig;

use crate::error::CliError;
use crate::output::print_json;

/// Execute the `modhost config show` command
pub fn run_show(config: &HostConfig) -> Result<(), CliError> {
    print_json(config)
}

/// Execute the `modhost config validate` command
///
/// Loading already validated the configuration; this only reports on it.
pub fn run_validate(path: Option<&Path>, config: &HostConfig) -> Result<(), CliError> {
    match path {
        Some(path) => println!("{} {} is valid", "✓".green(), path.display()),
        None => println!(
            "{} No config file given, defaults and environment are valid",
            "✓".green()
        ),
    }
    println!("  plugin root: {}", config.plugins.path.display());
    println!("  watch:       {}", config.monitor.watch);
    println!("  modules:     {} configured", config.modules.len());
    Ok(())
}
