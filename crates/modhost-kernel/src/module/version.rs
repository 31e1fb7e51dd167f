use serde::{Deserialize, Serialize};

/// Semantic version declared by a module manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    /// Pre-release tag (e.g., "alpha", "beta")
    pub prerelease: Option<String>,
    pub build: Option<String>,
}

impl ModuleVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            prerelease: None,
            build: None,
        }
    }

    /// Parse from string (e.g., "1.0", "1.2.3-alpha+build123")
    pub fn parse(version: &str) -> Result<Self, String> {
        let version = version.trim();
        if version.is_empty() {
            return Err("version is empty".to_string());
        }

        let (version_pre, build) = match version.split_once('+') {
            Some((core, build)) => (core, Some(build.to_string())),
            None => (version, None),
        };

        let (version_core, prerelease) = match version_pre.split_once('-') {
            Some((core, pre)) => (core, Some(pre.to_string())),
            None => (version_pre, None),
        };

        if prerelease.as_deref() == Some("") || build.as_deref() == Some("") {
            return Err(format!("Invalid version format: {}", version));
        }

        let parts: Vec<&str> = version_core.split('.').collect();
        if parts.len() < 2 || parts.len() > 3 {
            return Err(format!("Invalid version format: {}", version));
        }

        let major = parts[0]
            .parse::<u32>()
            .map_err(|_| format!("Invalid major version: {}", parts[0]))?;
        let minor = parts[1]
            .parse::<u32>()
            .map_err(|_| format!("Invalid minor version: {}", parts[1]))?;
        let patch = match parts.get(2) {
            Some(p) => p
                .parse::<u32>()
                .map_err(|_| format!("Invalid patch version: {}", p))?,
            None => 0,
        };

        Ok(Self {
            major,
            minor,
            patch,
            prerelease,
            build,
        })
    }
}

impl std::fmt::Display for ModuleVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(ref pre) = self.prerelease {
            write!(f, "-{}", pre)?;
        }
        if let Some(ref build) = self.build {
            write!(f, "+{}", build)?;
        }
        Ok(())
    }
}
