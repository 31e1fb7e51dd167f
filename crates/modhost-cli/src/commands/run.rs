//! `modhost run` command implementation

use colored::Colorize;
use modhost_kernel::HostConfig;
use modhost_plugins::{ModuleHost, RegistryEvent, SyncOutcome};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::error::CliError;

/// Execute the `modhost run` command
///
/// Reconciles the plugin root, keeps watching it, and unloads every module
/// on Ctrl-C.
pub async fn run(config: HostConfig) -> Result<(), CliError> {
    let mut host = ModuleHost::builder(config).build().await?;
    let mut events = host.registry().subscribe();

    let event_log = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(RegistryEvent::StateChanged { id, from, to }) => {
                    info!(module_id = %id, from = ?from, to = %to, "Module state changed");
                }
                Err(RecvError::Lagged(missed)) => warn!(missed, "Registry event log lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let outcomes = host.start().await?;
    print_startup(&host, &outcomes);

    println!("{} Watching for changes, press Ctrl-C to stop", "→".green());
    tokio::signal::ctrl_c().await?;

    println!();
    println!("{} Shutting down", "→".green());
    host.shutdown().await;
    event_log.abort();
    Ok(())
}

fn print_startup(host: &ModuleHost, outcomes: &[SyncOutcome]) {
    println!("{} Plugin root {}", "→".green(), host.root().display());
    for outcome in outcomes {
        match outcome {
            SyncOutcome::Installed { id, state } | SyncOutcome::Reloaded { id, state } => {
                println!("  {} {} ({})", "✓".green(), id.cyan(), state);
            }
            SyncOutcome::Registered { id } => println!("  {} {} (discovered)", "•".blue(), id.cyan()),
            SyncOutcome::Skipped { dir, reason } => {
                println!("  {} {} {}", "!".yellow(), dir.display(), reason);
            }
            SyncOutcome::Unchanged { .. } | SyncOutcome::Removed { .. } | SyncOutcome::Ignored => {}
        }
    }
    let stats = host.registry().stats();
    println!(
        "  {} enabled, {} failed, {} discovered",
        stats.enabled, stats.failed, stats.discovered
    );
}
