//! CLI command definitions using clap

use crate::output::OutputFormat;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// modhost - discover, validate and host plugin modules
#[derive(Parser)]
#[command(name = "modhost")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json)
    #[arg(short = 'o', long, global = true, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,

    /// Configuration file path (YAML, TOML or JSON)
    #[arg(short = 'c', long, global = true, env = "MODHOST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Plugin root, overriding the configured one
    #[arg(short = 'r', long, global = true)]
    pub root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// List the modules found under the plugin root
    Scan,

    /// Check a single module directory
    Validate {
        /// Module directory holding the manifest and artifact
        dir: PathBuf,
    },

    /// Unpack a module package into the plugin root and load it once
    Install {
        /// Zip package
        package: PathBuf,
    },

    /// Host the plugin root until interrupted
    Run,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Validate the configuration file
    Validate,
}
