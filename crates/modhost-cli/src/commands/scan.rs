//! `modhost scan` command implementation

use colored::Colorize;
use modhost_kernel::{HostConfig, ModuleDescriptor};
use modhost_plugins::PluginScanner;
use serde::Serialize;

use crate::error::CliError;
use crate::output::{OutputFormat, Table, print_json};

#[derive(Debug, Serialize)]
struct ScanSummary<'a> {
    root: String,
    modules: &'a [ModuleDescriptor],
    skipped: Vec<SkippedInfo>,
}

#[derive(Debug, Serialize)]
struct SkippedInfo {
    path: String,
    reason: String,
}

/// Execute the `modhost scan` command
pub async fn run(config: &HostConfig, format: OutputFormat) -> Result<(), CliError> {
    let root = &config.plugins.path;
    let scanner = PluginScanner::new(&config.plugins);
    let report = scanner.scan(root).await?;

    let skipped: Vec<SkippedInfo> = report
        .skipped
        .iter()
        .map(|s| SkippedInfo {
            path: s.path.display().to_string(),
            reason: s.reason.to_string(),
        })
        .collect();

    if format == OutputFormat::Json {
        return print_json(&ScanSummary {
            root: root.display().to_string(),
            modules: &report.descriptors,
            skipped,
        });
    }

    println!("{} Scanning {}", "→".green(), root.display());
    println!();

    if report.descriptors.is_empty() {
        println!("  No modules found.");
    } else {
        let mut table = Table::builder().headers(&[
            "Id",
            "Name",
            "Version",
            "Entry point",
            "Route",
            "Artifact",
        ]);
        for d in &report.descriptors {
            let artifact = d
                .artifact_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            table = table.add_row(vec![
                d.id.clone(),
                d.name.clone(),
                d.version.clone(),
                d.entry_point.clone(),
                d.route_prefix.clone(),
                artifact,
            ]);
        }
        println!("{}", table.build());
    }

    if !skipped.is_empty() {
        println!();
        println!("{} {} entries skipped", "!".yellow(), skipped.len());
        for s in &skipped {
            println!("  {} {}", s.path.yellow(), s.reason);
        }
    }

    Ok(())
}
