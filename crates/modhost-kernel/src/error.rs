//! Typed errors for the module host.
//!
//! [`ModuleError`] is the taxonomy surfaced by management operations. Each
//! variant carries enough context for the HTTP layer to pick a status code
//! through [`ModuleError::status_code`].

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::module::ModuleState;

/// Result type for host operations.
pub type ModuleResult<T> = Result<T, ModuleError>;

/// A manifest or install payload was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ValidationError {
    #[error("manifest field `{field}` is missing")]
    MissingField { field: &'static str },

    #[error("manifest field `{field}` is malformed: {reason}")]
    MalformedField { field: &'static str, reason: String },

    #[error("manifest is not valid JSON: {0}")]
    Syntax(String),

    #[error("install payload is empty")]
    EmptyPayload,

    #[error("invalid module package: {0}")]
    Package(String),
}

impl ValidationError {
    pub fn malformed(field: &'static str, reason: impl Into<String>) -> Self {
        Self::MalformedField {
            field,
            reason: reason.into(),
        }
    }

    /// Manifest field this error refers to, if any.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::MissingField { field } | Self::MalformedField { field, .. } => Some(field),
            _ => None,
        }
    }
}

/// Error returned by a module's own hooks.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum HookError {
    /// The module rejected its configuration scope.
    #[error("configuration rejected: {0}")]
    Config(String),

    /// A service could not be registered with the host.
    #[error("service registration failed: {0}")]
    Registration(String),

    #[error("{0}")]
    Other(String),
}

/// Failure while materializing, instantiating or configuring a module.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LoadError {
    #[error("failed to open library: {0}")]
    LibraryOpen(String),

    #[error("symbol not found: {0}")]
    MissingSymbol(String),

    #[error("API version mismatch: expected {expected}, got {actual}")]
    ApiVersionMismatch { expected: u32, actual: u32 },

    #[error("entry point `{0}` returned null")]
    NullEntryPoint(String),

    #[error("no loader accepts artifact {0}")]
    NoMaterializer(PathBuf),

    #[error("unknown entry point `{0}`")]
    UnknownEntryPoint(String),

    #[error("configure hook failed: {0}")]
    Configure(#[from] HookError),

    #[error("configure hook did not finish within {0:?}")]
    ConfigureTimeout(Duration),

    #[error("module panicked: {0}")]
    Panicked(String),

    #[error("artifact I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by registry and management operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ModuleError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("module not found: {0}")]
    NotFound(String),

    #[error("module '{id}' is busy: {reason}")]
    Conflict { id: String, reason: String },

    #[error("module '{id}' cannot {action} while {from}")]
    InvalidTransition {
        id: String,
        from: ModuleState,
        action: &'static str,
    },

    #[error("module '{id}' failed to load: {source}")]
    Load {
        id: String,
        #[source]
        source: LoadError,
    },

    #[error("scan I/O error at {}: {source}", path.display())]
    ScanIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("monitor fault: {0}")]
    MonitorFault(String),
}

impl ModuleError {
    pub fn conflict(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Conflict {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn scan_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ScanIo {
            path: path.into(),
            source,
        }
    }

    /// HTTP status the management layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::NotFound(_) => 404,
            Self::Conflict { .. } | Self::InvalidTransition { .. } => 409,
            Self::Load { .. } | Self::ScanIo { .. } => 500,
            Self::MonitorFault(_) => 503,
        }
    }

    /// Whether retrying the same call later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. } | Self::ScanIo { .. } | Self::MonitorFault(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(ModuleError::from(ValidationError::EmptyPayload).status_code(), 400);
        assert_eq!(ModuleError::NotFound("x".into()).status_code(), 404);
        assert_eq!(ModuleError::conflict("x", "busy").status_code(), 409);
        assert_eq!(
            ModuleError::Load {
                id: "x".into(),
                source: LoadError::UnknownEntryPoint("create".into()),
            }
            .status_code(),
            500
        );
    }

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(ModuleError::conflict("x", "busy").is_retryable());
        assert!(!ModuleError::NotFound("x".into()).is_retryable());
        assert!(!ModuleError::from(ValidationError::EmptyPayload).is_retryable());
    }

    #[test]
    fn validation_error_names_field() {
        let err = ValidationError::MissingField { field: "version" };
        assert_eq!(err.field(), Some("version"));
        assert!(err.to_string().contains("version"));
        assert_eq!(ValidationError::EmptyPayload.field(), None);
    }

    #[test]
    fn load_error_message_keeps_cause() {
        let err = ModuleError::Load {
            id: "pricing".into(),
            source: LoadError::Configure(HookError::Config("missing key".into())),
        };
        let msg = err.to_string();
        assert!(msg.contains("pricing"));
        assert!(msg.contains("missing key"));
    }
}
