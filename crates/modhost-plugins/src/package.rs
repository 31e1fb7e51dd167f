//! Module package unpacking
//!
//! A package is a zip archive holding `manifest.json` and the code artifact,
//! either at the top level or under a single directory. Packages are unpacked
//! into a hidden staging directory inside the plugin root so that the final
//! move into place is a same-filesystem rename, and so that the scanner and
//! monitor never see a half-written module.

use std::io::{self, Cursor};
use std::path::{Path, PathBuf};

use modhost_kernel::{ModuleError, ModuleResult, ValidationError};
use tempfile::TempDir;
use tracing::debug;
use zip::ZipArchive;

use crate::scanner::is_hidden;

const STAGING_PREFIX: &str = ".staging-";

/// An unpacked package waiting to be moved into the plugin root.
///
/// Dropping it removes everything that was staged.
#[derive(Debug)]
pub struct StagedPackage {
    staging: TempDir,
    module_dir: PathBuf,
}

impl StagedPackage {
    /// Directory holding the staged manifest and artifact.
    pub fn module_dir(&self) -> &Path {
        &self.module_dir
    }

    pub fn staging_dir(&self) -> &Path {
        self.staging.path()
    }

    /// Move the module directory to `target`.
    pub fn commit(self, target: &Path) -> io::Result<()> {
        std::fs::rename(&self.module_dir, target)?;
        debug!(target = %target.display(), "Package moved into place");
        Ok(())
    }
}

/// Unpack `bytes` into a fresh staging directory under `root`.
pub async fn stage(bytes: Vec<u8>, root: &Path) -> ModuleResult<StagedPackage> {
    let root = root.to_path_buf();
    let root_for_err = root.clone();
    tokio::task::spawn_blocking(move || stage_blocking(&bytes, &root))
        .await
        .map_err(|e| ModuleError::scan_io(root_for_err, io::Error::other(e.to_string())))?
}

pub fn stage_blocking(bytes: &[u8], root: &Path) -> ModuleResult<StagedPackage> {
    if bytes.is_empty() {
        return Err(ValidationError::EmptyPayload.into());
    }
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| package_error(format!("not a zip archive: {}", e)))?;
    if archive.is_empty() {
        return Err(package_error("archive is empty"));
    }

    let staging = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempdir_in(root)
        .map_err(|e| ModuleError::scan_io(root, e))?;
    let unpacked = staging.path().join("unpacked");
    std::fs::create_dir(&unpacked).map_err(|e| ModuleError::scan_io(&unpacked, e))?;

    extract(&mut archive, &unpacked)?;
    let module_dir = locate_module_dir(&unpacked)?;

    Ok(StagedPackage {
        staging,
        module_dir,
    })
}

fn extract(archive: &mut ZipArchive<Cursor<&[u8]>>, dest_dir: &Path) -> ModuleResult<()> {
    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| package_error(format!("unreadable entry {}: {}", i, e)))?;

        let outpath = match file.enclosed_name() {
            Some(path) => dest_dir.join(path),
            None => {
                return Err(package_error(format!(
                    "entry '{}' escapes the package",
                    file.name()
                )));
            }
        };

        if file.is_dir() {
            std::fs::create_dir_all(&outpath).map_err(|e| ModuleError::scan_io(&outpath, e))?;
        } else {
            if let Some(parent) = outpath.parent() {
                std::fs::create_dir_all(parent).map_err(|e| ModuleError::scan_io(parent, e))?;
            }
            let mut outfile =
                std::fs::File::create(&outpath).map_err(|e| ModuleError::scan_io(&outpath, e))?;
            io::copy(&mut file, &mut outfile)
                .map_err(|e| package_error(format!("corrupt entry '{}': {}", file.name(), e)))?;
        }
    }
    Ok(())
}

/// `dir` itself when it holds the manifest, else its single subdirectory.
fn locate_module_dir(dir: &Path) -> ModuleResult<PathBuf> {
    let mut has_manifest = false;
    let mut subdirs = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| ModuleError::scan_io(dir, e))? {
        let entry = entry.map_err(|e| ModuleError::scan_io(dir, e))?;
        let name = entry.file_name();
        if name == "manifest.json" {
            has_manifest = true;
        } else if entry.path().is_dir() && !is_hidden(&name) && name != "__MACOSX" {
            subdirs.push(entry.path());
        }
    }

    if has_manifest {
        return Ok(dir.to_path_buf());
    }
    match subdirs.as_slice() {
        [single] if single.join("manifest.json").is_file() => Ok(single.clone()),
        _ => Err(package_error(
            "manifest.json must be at the top level or under a single directory",
        )),
    }
}

fn package_error(reason: impl Into<String>) -> ModuleError {
    ValidationError::Package(reason.into()).into()
}
