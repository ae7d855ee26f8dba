//! Built-in scan modules
//!
//! The engine itself never scans anything; these modules are the default
//! pipeline installed into a registry via [`register_builtins`]:
//!
//! | Module | Type | Consumes | Produces |
//! |--------|------|----------|----------|
//! | `target_discovery` | discovery | `config.targets` | `discovery.live_hosts` |
//! | `tcp_port_scan` | scan | `discovery.live_hosts` | `scan.open_ports` |
//! | `service_parse` | parse | `scan.open_ports` | `parse.services` |
//! | `vuln_evaluate` | evaluation | `parse.services` | `eval.findings` |
//! | `report_summary` | reporting | upstream keys (all optional) | `report.summary` |

pub mod discovery;
pub mod port_scan;
pub mod report;
pub mod service_parse;
pub mod vuln_eval;

pub use discovery::TargetDiscovery;
pub use port_scan::TcpPortScan;
pub use report::ReportSummary;
pub use service_parse::ServiceParse;
pub use vuln_eval::VulnEvaluate;

use serde_json::Value;

use crate::contract::ConfigMap;
use crate::error::{Result, SentraError};
use crate::registry::ModuleRegistry;

/// Install the default module set into a registry
pub fn register_builtins(registry: &ModuleRegistry) {
    registry.register("target_discovery", || Box::new(TargetDiscovery::default()));
    registry.register("tcp_port_scan", || Box::new(TcpPortScan::default()));
    registry.register("service_parse", || Box::new(ServiceParse::default()));
    registry.register("vuln_evaluate", || Box::new(VulnEvaluate::default()));
    registry.register("report_summary", || Box::new(ReportSummary::default()));
}

// ============================================================================
// CONFIG ACCESSORS (shared by module init implementations)
// ============================================================================

pub(crate) fn config_str(config: &ConfigMap, param: &str) -> Result<Option<String>> {
    match config.get(param) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(SentraError::InvalidConfig {
            param: param.to_string(),
            details: format!("expected string, got {}", other),
        }),
    }
}

pub(crate) fn config_u64(config: &ConfigMap, param: &str) -> Result<Option<u64>> {
    match config.get(param) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .map(Some)
            .ok_or_else(|| SentraError::InvalidConfig {
                param: param.to_string(),
                details: format!("expected non-negative integer, got {}", value),
            }),
    }
}

pub(crate) fn config_bool(config: &ConfigMap, param: &str) -> Result<Option<bool>> {
    match config.get(param) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(other) => Err(SentraError::InvalidConfig {
            param: param.to_string(),
            details: format!("expected bool, got {}", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builtins_register_all_five() {
        let registry = ModuleRegistry::new();
        register_builtins(&registry);
        assert_eq!(
            registry.module_names(),
            vec![
                "report_summary",
                "service_parse",
                "target_discovery",
                "tcp_port_scan",
                "vuln_evaluate",
            ]
        );
    }

    #[test]
    fn config_accessors_check_types() {
        let mut config = ConfigMap::default();
        config.insert("ports".into(), json!("80,443"));
        config.insert("concurrency".into(), json!(16));
        config.insert("allow_loopback".into(), json!(true));

        assert_eq!(config_str(&config, "ports").unwrap(), Some("80,443".into()));
        assert_eq!(config_u64(&config, "concurrency").unwrap(), Some(16));
        assert_eq!(config_bool(&config, "allow_loopback").unwrap(), Some(true));
        assert_eq!(config_str(&config, "missing").unwrap(), None);

        assert!(config_str(&config, "concurrency").is_err());
        assert!(config_u64(&config, "ports").is_err());
        assert!(config_bool(&config, "ports").is_err());
    }
}
