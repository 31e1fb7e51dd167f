//! modhost CLI - discover, validate and host plugin modules

mod cli;
mod commands;
mod error;
mod output;

use clap::Parser;
use cli::{Cli, Commands, ConfigCommands};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_command(cli))
}

async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = commands::load_config(cli.config.as_deref(), cli.root.as_deref())?;

    match cli.command {
        Commands::Scan => commands::scan::run(&config, cli.output).await?,
        Commands::Validate { dir } => commands::validate::run(&config, &dir, cli.output).await?,
        Commands::Install { package } => {
            commands::install::run(config, &package, cli.output).await?;
        }
        Commands::Run => commands::run::run(config).await?,
        Commands::Config { action } => match action {
            ConfigCommands::Show => commands::config_cmd::run_show(&config)?,
            ConfigCommands::Validate => {
                commands::config_cmd::run_validate(cli.config.as_deref(), &config)?;
            }
        },
    }

    Ok(())
}
