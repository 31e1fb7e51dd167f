//! Plugin root scanner
//!
//! Pairs each module directory's manifest with its code artifact and turns
//! the pair into a [`ModuleDescriptor`].

use std::collections::HashSet;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use modhost_kernel::{ModuleDescriptor, ModuleError, ModuleResult, PluginsConfig, ValidationError};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::manifest::ModuleManifest;

/// Why a directory was left out of a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Invalid(ValidationError),
    MissingManifest,
    MissingArtifact,
    AmbiguousArtifact(Vec<String>),
    Duplicate { id: String },
    Io(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid(e) => write!(f, "{}", e),
            Self::MissingManifest => f.write_str("no manifest"),
            Self::MissingArtifact => f.write_str("no code artifact"),
            Self::AmbiguousArtifact(names) => {
                write!(f, "several code artifacts: {}", names.join(", "))
            }
            Self::Duplicate { id } => write!(f, "duplicate module id '{}'", id),
            Self::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SkippedEntry {
    pub path: PathBuf,
    pub reason: SkipReason,
}

/// Outcome of scanning a plugin root.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// Valid modules, in directory order
    pub descriptors: Vec<ModuleDescriptor>,
    pub skipped: Vec<SkippedEntry>,
}

impl ScanReport {
    pub fn find(&self, id: &str) -> Option<&ModuleDescriptor> {
        self.descriptors.iter().find(|d| d.id == id)
    }
}

/// Discovers modules under a plugin root.
#[derive(Debug, Clone)]
pub struct PluginScanner {
    manifest_file: String,
    artifact_extensions: Vec<String>,
}

impl PluginScanner {
    pub fn new(config: &PluginsConfig) -> Self {
        Self {
            manifest_file: config.manifest_file.clone(),
            artifact_extensions: config
                .artifact_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
        }
    }

    pub fn manifest_file(&self) -> &str {
        &self.manifest_file
    }

    pub fn is_manifest(&self, path: &Path) -> bool {
        path.file_name()
            .is_some_and(|name| name == self.manifest_file.as_str())
    }

    pub fn is_artifact(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| {
                let ext = ext.to_lowercase();
                self.artifact_extensions.iter().any(|e| *e == ext)
            })
    }

    /// Scan every module directory under `root` on the blocking pool.
    pub async fn scan(&self, root: &Path) -> ModuleResult<ScanReport> {
        let scanner = self.clone();
        let root_path = root.to_path_buf();
        tokio::task::spawn_blocking(move || scanner.scan_blocking(&root_path))
            .await
            .map_err(|e| ModuleError::scan_io(root, io::Error::other(e.to_string())))?
    }

    /// Validate a single module directory on the blocking pool.
    pub async fn scan_dir(&self, dir: &Path) -> Result<ModuleDescriptor, SkipReason> {
        let scanner = self.clone();
        let dir = dir.to_path_buf();
        tokio::task::spawn_blocking(move || scanner.scan_dir_blocking(&dir))
            .await
            .map_err(|e| SkipReason::Io(e.to_string()))?
    }

    pub fn scan_blocking(&self, root: &Path) -> ModuleResult<ScanReport> {
        let metadata = std::fs::metadata(root).map_err(|e| ModuleError::scan_io(root, e))?;
        if !metadata.is_dir() {
            return Err(ModuleError::scan_io(
                root,
                io::Error::other("plugin root is not a directory"),
            ));
        }

        let mut report = ScanReport::default();
        let mut seen = HashSet::new();

        let walker = WalkDir::new(root)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) if err.depth() == 0 => {
                    let source = err
                        .into_io_error()
                        .unwrap_or_else(|| io::Error::other("unreadable plugin root"));
                    return Err(ModuleError::scan_io(root, source));
                }
                Err(err) => {
                    let path = err.path().map(Path::to_path_buf).unwrap_or_default();
                    warn!(path = %path.display(), error = %err, "Skipping unreadable entry");
                    report.skipped.push(SkippedEntry {
                        path,
                        reason: SkipReason::Io(err.to_string()),
                    });
                    continue;
                }
            };

            if is_hidden(entry.file_name()) || !entry.path().is_dir() {
                continue;
            }

            let dir = entry.path();
            match self.scan_dir_blocking(dir) {
                Ok(descriptor) if !seen.insert(descriptor.id.clone()) => {
                    warn!(
                        module_id = %descriptor.id,
                        path = %dir.display(),
                        "Skipping duplicate module id"
                    );
                    report.skipped.push(SkippedEntry {
                        path: dir.to_path_buf(),
                        reason: SkipReason::Duplicate { id: descriptor.id },
                    });
                }
                Ok(descriptor) => {
                    debug!(module_id = %descriptor.id, "Discovered module");
                    report.descriptors.push(descriptor);
                }
                Err(reason) => {
                    warn!(path = %dir.display(), %reason, "Skipping module directory");
                    report.skipped.push(SkippedEntry {
                        path: dir.to_path_buf(),
                        reason,
                    });
                }
            }
        }

        Ok(report)
    }

    pub fn scan_dir_blocking(&self, dir: &Path) -> Result<ModuleDescriptor, SkipReason> {
        let manifest_path = dir.join(&self.manifest_file);
        let bytes = match std::fs::read(&manifest_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(SkipReason::MissingManifest),
            Err(e) => return Err(SkipReason::Io(e.to_string())),
        };
        let manifest = ModuleManifest::parse(&bytes).map_err(SkipReason::Invalid)?;
        let artifact_path = self.locate_artifact(dir, manifest.artifact.as_deref())?;

        Ok(ModuleDescriptor {
            id: manifest.id,
            name: manifest.name,
            version: manifest.version,
            manifest_path,
            artifact_path,
            entry_point: manifest.entry_point,
            capabilities: manifest.capabilities,
            route_prefix: manifest.route_prefix,
            description: manifest.description,
        })
    }

    fn locate_artifact(&self, dir: &Path, declared: Option<&str>) -> Result<PathBuf, SkipReason> {
        if let Some(name) = declared {
            let path = dir.join(name);
            return if path.is_file() {
                Ok(path)
            } else {
                Err(SkipReason::MissingArtifact)
            };
        }

        let mut candidates = Vec::new();
        let entries = std::fs::read_dir(dir).map_err(|e| SkipReason::Io(e.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|e| SkipReason::Io(e.to_string()))?;
            let path = entry.path();
            if path.is_file() && !is_hidden(entry.file_name().as_os_str()) && self.is_artifact(&path) {
                candidates.push(path);
            }
        }
        candidates.sort();

        match candidates.len() {
            0 => Err(SkipReason::MissingArtifact),
            1 => Ok(candidates.remove(0)),
            _ => Err(SkipReason::AmbiguousArtifact(
                candidates
                    .iter()
                    .filter_map(|p| p.file_name())
                    .map(|n| n.to_string_lossy().into_owned())
                    .collect(),
            )),
        }
    }
}

pub(crate) fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}
