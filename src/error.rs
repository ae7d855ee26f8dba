//! Sentra error taxonomy
//!
//! One enum is the single source of truth for failures across the engine.
//! Every kind carries a stable code string and maps onto a process exit code
//! and an HTTP status, so the CLI and the API surface stay consistent:
//!
//! | Kind | Exit | HTTP |
//! |------|------|------|
//! | `DAG_LOAD_FAILED` | 4 | 404 |
//! | `DAG_UNSUPPORTED_FORMAT` | 2 | 400 |
//! | `DAG_MARSHAL_FAILED` | 1 | 500 |
//! | `DAG_WRITE_FAILED` | 1 | 500 |
//! | `DAG_INVALID` | 2 | 400 |
//! | `MODULE_NOT_FOUND` | 1 | 500 |
//! | `NODE_DEPENDENCY_FAILED` | 1 | 500 |
//! | `NODE_PANIC` | 1 | 500 |
//! | `CANCELED` | 130 | 499 |
//!
//! Supporting kinds (module init/execution, planning, context schema) use
//! exit 1 / HTTP 500 unless noted.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SentraError>;

/// Trait for errors that provide fix suggestions
///
/// The CLI prints the suggestion under the error message so users can
/// resolve problems without digging through docs.
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

/// All error variants are part of the public API.
#[derive(Error, Debug)]
pub enum SentraError {
    // ═══════════════════════════════════════════
    // DAG FILE ERRORS
    // ═══════════════════════════════════════════
    #[error("[DAG_LOAD_FAILED] failed to load DAG '{path}': {details}")]
    DagLoadFailed { path: String, details: String },

    #[error("[DAG_UNSUPPORTED_FORMAT] unsupported DAG format '{extension}' for '{path}' (use .yaml, .yml or .json)")]
    DagUnsupportedFormat { path: String, extension: String },

    #[error("[DAG_MARSHAL_FAILED] failed to encode DAG: {details}")]
    DagMarshalFailed { details: String },

    #[error("[DAG_WRITE_FAILED] failed to write DAG to '{path}': {details}")]
    DagWriteFailed { path: String, details: String },

    #[error("[DAG_INVALID] DAG validation failed: {details}")]
    DagInvalid { details: String },

    // ═══════════════════════════════════════════
    // MODULE / REGISTRY ERRORS
    // ═══════════════════════════════════════════
    #[error("[MODULE_NOT_FOUND] module '{name}' is not registered")]
    ModuleNotFound { name: String },

    #[error("[MODULE_INIT_FAILED] module '{module}' failed to initialize: {details}")]
    ModuleInitFailed { module: String, details: String },

    #[error("[MODULE_CONFIG_INVALID] invalid config parameter '{param}': {details}")]
    InvalidConfig { param: String, details: String },

    // ═══════════════════════════════════════════
    // RUN ERRORS
    // ═══════════════════════════════════════════
    #[error("[NODE_DEPENDENCY_FAILED] node '{node}': dependency '{dependency}' failed")]
    NodeDependencyFailed { node: String, dependency: String },

    #[error("[NODE_EXECUTION_FAILED] node '{node}' failed: {details}")]
    NodeFailed { node: String, details: String },

    #[error("[NODE_PANIC] module '{node}' panicked: {message}")]
    NodePanic { node: String, message: String },

    #[error("[CANCELED] scan run canceled")]
    Canceled,

    // ═══════════════════════════════════════════
    // PLANNER ERRORS
    // ═══════════════════════════════════════════
    #[error("[PLAN_EMPTY] no modules could be planned: {reason}")]
    PlanEmpty { reason: String },

    // ═══════════════════════════════════════════
    // DATA CONTEXT ERRORS
    // ═══════════════════════════════════════════
    #[error("[CONTEXT_SCHEMA_VIOLATION] key '{key}': {details}")]
    ContextSchemaViolation { key: String, details: String },
}

impl SentraError {
    /// Get the stable code string (e.g. "DAG_INVALID")
    pub fn code(&self) -> &'static str {
        match self {
            Self::DagLoadFailed { .. } => "DAG_LOAD_FAILED",
            Self::DagUnsupportedFormat { .. } => "DAG_UNSUPPORTED_FORMAT",
            Self::DagMarshalFailed { .. } => "DAG_MARSHAL_FAILED",
            Self::DagWriteFailed { .. } => "DAG_WRITE_FAILED",
            Self::DagInvalid { .. } => "DAG_INVALID",
            Self::ModuleNotFound { .. } => "MODULE_NOT_FOUND",
            Self::ModuleInitFailed { .. } => "MODULE_INIT_FAILED",
            Self::InvalidConfig { .. } => "MODULE_CONFIG_INVALID",
            Self::NodeDependencyFailed { .. } => "NODE_DEPENDENCY_FAILED",
            Self::NodeFailed { .. } => "NODE_EXECUTION_FAILED",
            Self::NodePanic { .. } => "NODE_PANIC",
            Self::Canceled => "CANCELED",
            Self::PlanEmpty { .. } => "PLAN_EMPTY",
            Self::ContextSchemaViolation { .. } => "CONTEXT_SCHEMA_VIOLATION",
        }
    }

    /// Process exit code for the CLI
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::DagLoadFailed { .. } => 4,
            Self::DagUnsupportedFormat { .. } => 2,
            Self::DagInvalid { .. } => 2,
            Self::PlanEmpty { .. } => 2,
            Self::Canceled => 130,
            _ => 1,
        }
    }

    /// HTTP status for API surfaces
    pub fn http_status(&self) -> u16 {
        match self {
            Self::DagLoadFailed { .. } => 404,
            Self::DagUnsupportedFormat { .. } => 400,
            Self::DagInvalid { .. } => 400,
            Self::PlanEmpty { .. } => 400,
            Self::Canceled => 499,
            _ => 500,
        }
    }
}

impl FixSuggestion for SentraError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            SentraError::DagLoadFailed { .. } => {
                Some("Check the file path exists and contains valid YAML/JSON")
            }
            SentraError::DagUnsupportedFormat { .. } => {
                Some("Rename the file to end in .yaml, .yml or .json")
            }
            SentraError::DagMarshalFailed { .. } => None,
            SentraError::DagWriteFailed { .. } => {
                Some("Check the output directory exists and is writable")
            }
            SentraError::DagInvalid { .. } => {
                Some("Run 'sentra dag validate <file>' for the full issue list")
            }
            SentraError::ModuleNotFound { .. } => {
                Some("Run 'sentra modules list' to see registered modules")
            }
            SentraError::ModuleInitFailed { .. } => {
                Some("Check the node's config block against the module's config schema")
            }
            SentraError::InvalidConfig { .. } => {
                Some("Check the parameter type and allowed values")
            }
            SentraError::NodeDependencyFailed { .. } => {
                Some("Fix the upstream node failure; downstream nodes are skipped automatically")
            }
            SentraError::NodeFailed { .. } => None,
            SentraError::NodePanic { .. } => {
                Some("This is a bug in the module implementation; report it to the module author")
            }
            SentraError::Canceled => None,
            SentraError::PlanEmpty { .. } => {
                Some("Relax tag filters or register modules that consume config.targets")
            }
            SentraError::ContextSchemaViolation { .. } => {
                Some("Check the value type against the key's registered schema")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_includes_code() {
        let err = SentraError::ModuleNotFound {
            name: "tcp_port_scan".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("[MODULE_NOT_FOUND]"));
        assert!(msg.contains("tcp_port_scan"));
    }

    #[test]
    fn taxonomy_exit_codes() {
        assert_eq!(
            SentraError::DagLoadFailed {
                path: "x".into(),
                details: "y".into()
            }
            .exit_code(),
            4
        );
        assert_eq!(
            SentraError::DagUnsupportedFormat {
                path: "x.toml".into(),
                extension: "toml".into()
            }
            .exit_code(),
            2
        );
        assert_eq!(
            SentraError::DagInvalid { details: "x".into() }.exit_code(),
            2
        );
        assert_eq!(SentraError::Canceled.exit_code(), 130);
        assert_eq!(
            SentraError::NodePanic {
                node: "n".into(),
                message: "m".into()
            }
            .exit_code(),
            1
        );
    }

    #[test]
    fn taxonomy_http_statuses() {
        assert_eq!(
            SentraError::DagLoadFailed {
                path: "x".into(),
                details: "y".into()
            }
            .http_status(),
            404
        );
        assert_eq!(
            SentraError::DagInvalid { details: "x".into() }.http_status(),
            400
        );
        assert_eq!(SentraError::Canceled.http_status(), 499);
        assert_eq!(
            SentraError::ModuleNotFound { name: "x".into() }.http_status(),
            500
        );
    }

    #[test]
    fn panic_message_format() {
        let err = SentraError::NodePanic {
            node: "scan-1".into(),
            message: "index out of bounds".into(),
        };
        assert!(err
            .to_string()
            .contains("module 'scan-1' panicked: index out of bounds"));
    }

    #[test]
    fn suggestions_cover_user_facing_kinds() {
        let errors = vec![
            SentraError::DagLoadFailed {
                path: "a".into(),
                details: "b".into(),
            },
            SentraError::DagUnsupportedFormat {
                path: "a.txt".into(),
                extension: "txt".into(),
            },
            SentraError::DagInvalid { details: "x".into() },
            SentraError::ModuleNotFound { name: "m".into() },
            SentraError::PlanEmpty { reason: "r".into() },
        ];
        for err in errors {
            assert!(
                err.fix_suggestion().is_some(),
                "missing fix suggestion for {}",
                err.code()
            );
        }
    }
}
