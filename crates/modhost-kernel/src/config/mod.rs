//! Host configuration
//!
//! [`HostConfig`] is layered from, in order of precedence:
//!
//! 1. `MODHOST_`-prefixed environment variables, `__` separating nested keys
//!    (`MODHOST_MONITOR__DEBOUNCE_MS=250`)
//! 2. an optional config file (YAML, TOML or JSON, chosen by extension)
//! 3. built-in defaults
//!
//! File contents go through `${VAR}` / `$VAR` substitution before parsing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use config::{Config as Cfg, Environment, File, FileFormat, Map};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "MODHOST";

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parsing error: {0}")]
    Parse(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Plugin root layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    /// Directory holding one subdirectory per module
    pub path: PathBuf,
    /// Extensions recognized as native code artifacts
    pub artifact_extensions: Vec<String>,
    pub manifest_file: String,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./Plugins"),
            artifact_extensions: vec!["so".into(), "dylib".into(), "dll".into()],
            manifest_file: "manifest.json".into(),
        }
    }
}

/// Filesystem monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    /// Attach a filesystem watcher to the plugin root
    pub watch: bool,
    /// Trailing debounce window per module directory
    pub debounce_ms: u64,
    /// Interval used when falling back to the polling watcher
    pub poll_interval_ms: u64,
    /// Reconcile the whole root once at startup
    pub reconcile_on_start: bool,
    /// Install modules found by the monitor, instead of only registering them
    pub auto_install: bool,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            watch: true,
            debounce_ms: 500,
            poll_interval_ms: 2_000,
            reconcile_on_start: true,
            auto_install: true,
        }
    }
}

impl MonitorSettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Module loader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderSettings {
    pub configure_timeout_ms: u64,
    pub shutdown_timeout_ms: u64,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            configure_timeout_ms: 30_000,
            shutdown_timeout_ms: 10_000,
        }
    }
}

impl LoaderSettings {
    pub fn configure_timeout(&self) -> Duration {
        Duration::from_millis(self.configure_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Management operations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerSettings {
    /// Delete the module directory once uninstall completes
    pub purge_on_uninstall: bool,
}

/// Complete host configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub plugins: PluginsConfig,
    pub monitor: MonitorSettings,
    pub loader: LoaderSettings,
    pub manager: ManagerSettings,
    /// Per-module configuration scopes, keyed by module id
    pub modules: HashMap<String, serde_json::Value>,
}

impl HostConfig {
    /// Load from an optional file plus the process environment.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let file = match path {
            Some(path) => {
                let format = detect_format(path)?;
                let content = std::fs::read_to_string(path)?;
                Some((content, format))
            }
            None => None,
        };
        Self::build(file.as_ref().map(|(c, f)| (c.as_str(), *f)), None)
    }

    /// Parse from a string in the given format, without environment overrides.
    pub fn from_str(content: &str, format: FileFormat) -> ConfigResult<Self> {
        Self::build(
            Some((content, format)),
            Some(Map::<String, String>::new()),
        )
    }

    /// Layer `content` under the environment. `env` replaces the process
    /// environment when given.
    pub fn build(
        content: Option<(&str, FileFormat)>,
        env: Option<Map<String, String>>,
    ) -> ConfigResult<Self> {
        let mut builder = Cfg::builder();
        if let Some((content, format)) = content {
            let substituted = substitute_env_vars(content);
            builder = builder.add_source(File::from_str(&substituted, format));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let config: Self = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.plugins.manifest_file.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "plugins.manifest_file must not be empty".into(),
            ));
        }
        if self.plugins.artifact_extensions.is_empty() {
            return Err(ConfigError::Invalid(
                "plugins.artifact_extensions must list at least one extension".into(),
            ));
        }
        if self.loader.configure_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "loader.configure_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.monitor.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "monitor.poll_interval_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Detect configuration format from file extension
///
/// - YAML: `.yaml`, `.yml`
/// - TOML: `.toml`
/// - JSON: `.json`
pub fn detect_format(path: &Path) -> ConfigResult<FileFormat> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| ConfigError::UnsupportedFormat("No file extension found".to_string()))?;

    match ext.to_lowercase().as_str() {
        "yaml" | "yml" => Ok(FileFormat::Yaml),
        "toml" => Ok(FileFormat::Toml),
        "json" => Ok(FileFormat::Json),
        _ => Err(ConfigError::UnsupportedFormat(ext.to_string())),
    }
}

static BRACED_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex"));
static BARE_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)\b").expect("valid regex"));

/// Substitute environment variables in a string
///
/// Supports both `${VAR_NAME}` and `$VAR_NAME`. Unset variables are left as
/// written.
pub fn substitute_env_vars(content: &str) -> String {
    substitute_with(content, |name| std::env::var(name).ok())
}

fn substitute_with(content: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let braced = BRACED_VAR.replace_all(content, |caps: &regex::Captures| {
        lookup(&caps[1]).unwrap_or_else(|| caps[0].to_string())
    });
    BARE_VAR
        .replace_all(&braced, |caps: &regex::Captures| {
            lookup(&caps[1]).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}
