//! Module manifest parsing
//!
//! A manifest is a JSON object:
//!
//! ```json
//! {
//!   "name": "Pricing Engine",
//!   "version": "1.2.0",
//!   "entry_point": "pricing_module_create",
//!   "capabilities": ["pricing.read"],
//!   "artifact": "libpricing.so",
//!   "route_prefix": "/api/pricing",
//!   "description": "Quote calculation"
//! }
//! ```
//!
//! Parsing is pure: no file access, and the first invalid field fails the
//! whole manifest.

use std::collections::BTreeSet;

use modhost_kernel::{ModuleVersion, ValidationError};
use serde_json::{Map, Value};

/// Validated manifest contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleManifest {
    pub id: String,
    pub name: String,
    pub version: String,
    pub entry_point: String,
    pub capabilities: BTreeSet<String>,
    /// Artifact file name relative to the module directory
    pub artifact: Option<String>,
    pub route_prefix: String,
    pub description: Option<String>,
}

impl ModuleManifest {
    /// Parse and validate raw manifest bytes.
    pub fn parse(bytes: &[u8]) -> Result<Self, ValidationError> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| ValidationError::Syntax(e.to_string()))?;
        let object = value
            .as_object()
            .ok_or_else(|| ValidationError::Syntax("manifest must be a JSON object".into()))?;

        let name = required_str(object, "name")?;
        let id = derive_id(&name)?;

        let version = required_str(object, "version")?;
        ModuleVersion::parse(&version).map_err(|e| ValidationError::malformed("version", e))?;

        let entry_point = required_str(object, "entry_point")?;
        if !is_c_identifier(&entry_point) {
            return Err(ValidationError::malformed(
                "entry_point",
                format!("'{}' is not a valid symbol name", entry_point),
            ));
        }

        let capabilities = parse_capabilities(object)?;

        let artifact = optional_str(object, "artifact")?;
        if let Some(ref artifact) = artifact {
            if artifact.is_empty() || artifact.contains(['/', '\\']) || artifact == ".." {
                return Err(ValidationError::malformed(
                    "artifact",
                    "must be a file name inside the module directory",
                ));
            }
        }

        let route_prefix = match optional_str(object, "route_prefix")? {
            Some(prefix) => normalize_route_prefix(&prefix)?,
            None => format!("/api/{}", id),
        };

        let description = optional_str(object, "description")?;

        Ok(Self {
            id,
            name,
            version,
            entry_point,
            capabilities,
            artifact,
            route_prefix,
            description,
        })
    }
}

/// Derive a module id from its declared name.
///
/// Trims, lower-cases and joins whitespace runs with `-`; the result must
/// match `[a-z0-9][a-z0-9._-]*`.
pub fn derive_id(name: &str) -> Result<String, ValidationError> {
    let id = name
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-");

    let mut chars = id.chars();
    let valid_head = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
    let valid_tail =
        chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'));

    if valid_head && valid_tail {
        Ok(id)
    } else {
        Err(ValidationError::malformed(
            "name",
            format!("'{}' does not produce a valid module id", name),
        ))
    }
}

fn required_str(object: &Map<String, Value>, field: &'static str) -> Result<String, ValidationError> {
    match object.get(field) {
        None | Some(Value::Null) => Err(ValidationError::MissingField { field }),
        Some(Value::String(s)) if s.trim().is_empty() => Err(ValidationError::MissingField { field }),
        Some(Value::String(s)) => Ok(s.trim().to_string()),
        Some(_) => Err(ValidationError::malformed(field, "expected a string")),
    }
}

fn optional_str(
    object: &Map<String, Value>,
    field: &'static str,
) -> Result<Option<String>, ValidationError> {
    match object.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(_) => Err(ValidationError::malformed(field, "expected a string")),
    }
}

fn parse_capabilities(object: &Map<String, Value>) -> Result<BTreeSet<String>, ValidationError> {
    let items = match object.get("capabilities") {
        None | Some(Value::Null) => return Ok(BTreeSet::new()),
        Some(Value::Array(items)) => items,
        Some(_) => {
            return Err(ValidationError::malformed(
                "capabilities",
                "expected a list of strings",
            ));
        }
    };

    items
        .iter()
        .map(|item| match item.as_str().map(str::trim) {
            Some(s) if !s.is_empty() => Ok(s.to_string()),
            _ => Err(ValidationError::malformed(
                "capabilities",
                "entries must be non-empty strings",
            )),
        })
        .collect()
}

fn normalize_route_prefix(prefix: &str) -> Result<String, ValidationError> {
    if !prefix.starts_with('/') {
        return Err(ValidationError::malformed("route_prefix", "must start with '/'"));
    }
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(ValidationError::malformed(
            "route_prefix",
            "must name at least one path segment",
        ));
    }
    Ok(trimmed.to_lowercase())
}

fn is_c_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> Result<ModuleManifest, ValidationError> {
        ModuleManifest::parse(value.to_string().as_bytes())
    }

    #[test]
    fn test_parse_full_manifest() {
        let manifest = parse(json!({
            "name": "Pricing  Engine",
            "version": "1.0",
            "entry_point": "pricing_create",
            "capabilities": ["pricing.read", "pricing.read", "pricing.write"],
            "artifact": "libpricing.so",
            "route_prefix": "/API/Pricing/",
            "description": "Quote calculation"
        }))
        .unwrap();

        assert_eq!(manifest.id, "pricing-engine");
        assert_eq!(manifest.name, "Pricing  Engine");
        assert_eq!(manifest.version, "1.0");
        assert_eq!(manifest.capabilities.len(), 2);
        assert_eq!(manifest.artifact.as_deref(), Some("libpricing.so"));
        assert_eq!(manifest.route_prefix, "/api/pricing");
        assert_eq!(manifest.description.as_deref(), Some("Quote calculation"));
    }

    #[test]
    fn test_defaults() {
        let manifest = parse(json!({
            "name": "audit",
            "version": "0.3.1",
            "entry_point": "audit_create"
        }))
        .unwrap();
        assert!(manifest.capabilities.is_empty());
        assert_eq!(manifest.artifact, None);
        assert_eq!(manifest.route_prefix, "/api/audit");
    }

    #[test]
    fn test_missing_fields_are_named() {
        let err = parse(json!({ "version": "1.0", "entry_point": "x" })).unwrap_err();
        assert_eq!(err.field(), Some("name"));

        let err = parse(json!({ "name": "a", "entry_point": "x" })).unwrap_err();
        assert_eq!(err.field(), Some("version"));

        let err = parse(json!({ "name": "a", "version": "1.0", "entry_point": "  " })).unwrap_err();
        assert_eq!(err, ValidationError::MissingField { field: "entry_point" });
    }

    #[test]
    fn test_malformed_fields_are_named() {
        let base = || json!({ "name": "a", "version": "1.0", "entry_point": "a_create" });

        let mut v = base();
        v["version"] = json!("one");
        assert_eq!(parse(v).unwrap_err().field(), Some("version"));

        let mut v = base();
        v["entry_point"] = json!("9lives");
        assert_eq!(parse(v).unwrap_err().field(), Some("entry_point"));

        let mut v = base();
        v["capabilities"] = json!(["ok", ""]);
        assert_eq!(parse(v).unwrap_err().field(), Some("capabilities"));

        let mut v = base();
        v["artifact"] = json!("../escape.so");
        assert_eq!(parse(v).unwrap_err().field(), Some("artifact"));

        let mut v = base();
        v["route_prefix"] = json!("api/a");
        assert_eq!(parse(v).unwrap_err().field(), Some("route_prefix"));

        let mut v = base();
        v["name"] = json!(42);
        assert_eq!(parse(v).unwrap_err().field(), Some("name"));
    }

    #[test]
    fn test_syntax_errors() {
        assert!(matches!(
            ModuleManifest::parse(b"{ not json"),
            Err(ValidationError::Syntax(_))
        ));
        assert!(matches!(
            ModuleManifest::parse(b"[1, 2]"),
            Err(ValidationError::Syntax(_))
        ));
    }

    #[test]
    fn test_derive_id() {
        assert_eq!(derive_id("  Hello World ").unwrap(), "hello-world");
        assert_eq!(derive_id("reports.v2").unwrap(), "reports.v2");
        assert_eq!(derive_id("9_lives").unwrap(), "9_lives");
        assert!(derive_id("-leading").is_err());
        assert!(derive_id("bad/id").is_err());
        assert!(derive_id("émoji").is_err());
    }
}
