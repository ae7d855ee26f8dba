//! DAG schema - declarative scan definitions
//!
//! Contains the serde representation of scan DAG files plus load/save:
//! - `validate`: structural, dependency and data-flow checks
//! - `layers`: topological layering (execution order)
//!
//! Both YAML and JSON are accepted; the format is detected by file
//! extension (`.yaml`/`.yml` -> YAML, `.json` -> JSON, anything else is
//! `DAG_UNSUPPORTED_FORMAT`). Unknown fields are ignored for forward
//! compatibility, and load/save round-trips preserve all semantically
//! significant fields.

pub mod layers;
pub mod validate;

pub use layers::execution_order;
pub use validate::{validate, IssueCode, Severity, ValidationIssue, ValidationResult};

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::contract::ConfigMap;
use crate::error::{Result, SentraError};

/// One node of a declarative scan DAG
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DagNode {
    pub id: String,
    /// Registered module name this node instantiates
    pub module: String,
    #[serde(default, skip_serializing_if = "ConfigMap::is_empty")]
    pub config: ConfigMap,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub consumes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub produces: Vec<String>,
}

/// A declarative scan DAG
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DagSchema {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub nodes: Vec<DagNode>,
}

impl DagSchema {
    /// Look up a node by id
    pub fn node(&self, id: &str) -> Option<&DagNode> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// Serialization format of a DAG file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DagFormat {
    Yaml,
    Json,
}

/// Detect the format from a file extension
pub fn detect_format(path: &Path) -> Result<DagFormat> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => Ok(DagFormat::Yaml),
        Some("json") => Ok(DagFormat::Json),
        other => Err(SentraError::DagUnsupportedFormat {
            path: path.display().to_string(),
            extension: other.unwrap_or("").to_string(),
        }),
    }
}

/// Load a DAG schema from disk
pub fn load_schema(path: impl AsRef<Path>) -> Result<DagSchema> {
    let path = path.as_ref();
    let format = detect_format(path)?;
    let raw = fs::read_to_string(path).map_err(|e| SentraError::DagLoadFailed {
        path: path.display().to_string(),
        details: e.to_string(),
    })?;
    match format {
        DagFormat::Yaml => serde_yaml::from_str(&raw).map_err(|e| SentraError::DagLoadFailed {
            path: path.display().to_string(),
            details: e.to_string(),
        }),
        DagFormat::Json => serde_json::from_str(&raw).map_err(|e| SentraError::DagLoadFailed {
            path: path.display().to_string(),
            details: e.to_string(),
        }),
    }
}

/// Save a DAG schema to disk, format picked by extension
pub fn save_schema(schema: &DagSchema, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let format = detect_format(path)?;
    let encoded = match format {
        DagFormat::Yaml => {
            serde_yaml::to_string(schema).map_err(|e| SentraError::DagMarshalFailed {
                details: e.to_string(),
            })?
        }
        DagFormat::Json => {
            serde_json::to_string_pretty(schema).map_err(|e| SentraError::DagMarshalFailed {
                details: e.to_string(),
            })?
        }
    };
    fs::write(path, encoded).map_err(|e| SentraError::DagWriteFailed {
        path: path.display().to_string(),
        details: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_schema() -> DagSchema {
        let mut config = ConfigMap::default();
        config.insert("ports".into(), json!("22,80,443"));
        DagSchema {
            name: "sample".into(),
            version: "1".into(),
            description: "linear pipeline".into(),
            nodes: vec![
                DagNode {
                    id: "disco".into(),
                    module: "target_discovery".into(),
                    consumes: vec!["config.targets".into()],
                    produces: vec!["discovery.live_hosts".into()],
                    ..Default::default()
                },
                DagNode {
                    id: "ports".into(),
                    module: "tcp_port_scan".into(),
                    config,
                    depends_on: vec!["disco".into()],
                    consumes: vec!["discovery.live_hosts".into()],
                    produces: vec!["scan.open_ports".into()],
                },
            ],
        }
    }

    #[test]
    fn yaml_round_trip_preserves_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.yaml");

        let schema = sample_schema();
        save_schema(&schema, &path).unwrap();
        let loaded = load_schema(&path).unwrap();

        assert_eq!(loaded, schema);
    }

    #[test]
    fn json_round_trip_preserves_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.json");

        let schema = sample_schema();
        save_schema(&schema, &path).unwrap();
        let loaded = load_schema(&path).unwrap();

        assert_eq!(loaded, schema);
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let err = load_schema("scan.toml").unwrap_err();
        assert_eq!(err.code(), "DAG_UNSUPPORTED_FORMAT");
        assert_eq!(err.exit_code(), 2);

        let err = save_schema(&sample_schema(), "out.txt").unwrap_err();
        assert_eq!(err.code(), "DAG_UNSUPPORTED_FORMAT");
    }

    #[test]
    fn missing_file_is_load_failed() {
        let err = load_schema("/nonexistent/scan.yaml").unwrap_err();
        assert_eq!(err.code(), "DAG_LOAD_FAILED");
        assert_eq!(err.exit_code(), 4);
        assert_eq!(err.http_status(), 404);
    }

    #[test]
    fn unparseable_file_is_load_failed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        std::fs::write(&path, "nodes: [ {").unwrap();

        let err = load_schema(&path).unwrap_err();
        assert_eq!(err.code(), "DAG_LOAD_FAILED");
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let yaml = r#"
name: forward-compat
future_field: whatever
nodes:
  - id: a
    module: target_discovery
    annotations:
      color: blue
"#;
        let schema: DagSchema = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(schema.name, "forward-compat");
        assert_eq!(schema.nodes.len(), 1);
        assert_eq!(schema.nodes[0].id, "a");
    }

    #[test]
    fn node_lookup() {
        let schema = sample_schema();
        assert!(schema.node("disco").is_some());
        assert!(schema.node("ghost").is_none());
    }
}
