//! # Sentra Engine Library
//!
//! Module-graph execution engine for vulnerability scans.
//!
//! ## Overview
//!
//! Sentra drives every scan through a DAG of pluggable modules:
//!
//! - **Schema**: load and validate declarative scan DAGs (`.yaml`/`.json`)
//! - **Planning**: turn a high-level scan intent into a concrete DAG
//! - **Execution**: run a DAG with dependency-aware parallelism, a shared
//!   typed data context and strict failure propagation
//!
//! ## Architecture
//!
//! | Component | Module | Responsibility |
//! |-----------|--------|---------------|
//! | Registry | [`registry`] | name -> factory mapping, instantiation |
//! | Contracts | [`contract`] | module trait, metadata, data contracts |
//! | Context | [`context`] | run-scoped typed key/value store |
//! | Schema | [`dag`] | declarative DAG, validation, layering |
//! | Planner | [`planner`] | intent -> module selection -> DAG |
//! | Orchestrator | [`orchestrator`] | dynamic parallel scheduler |
//! | Errors | [`error`] | taxonomy with exit/HTTP mappings |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sentra::{ModuleRegistry, Orchestrator, Planner, ScanIntent};
//! use tokio_util::sync::CancellationToken;
//!
//! let registry = ModuleRegistry::new();
//! sentra::modules::register_builtins(&registry);
//!
//! let intent = ScanIntent {
//!     targets: vec!["10.0.0.0/30".into()],
//!     enable_vuln_checks: true,
//!     ..Default::default()
//! };
//! let plan = Planner::new(registry.clone()).plan(&intent)?;
//! sentra::dag::validate(&plan.schema).ensure_valid()?;
//!
//! let mut orchestrator = Orchestrator::new(&plan.schema, &registry)?;
//! let snapshot = orchestrator
//!     .run(CancellationToken::new(), intent.initial_inputs())
//!     .await?;
//! println!("{} keys in snapshot", snapshot.len());
//! # Ok::<(), sentra::SentraError>(())
//! ```

pub mod context;
pub mod contract;
pub mod dag;
pub mod error;
pub mod event_log;
pub mod modules;
pub mod orchestrator;
pub mod planner;
pub mod registry;

// Re-export the main types
pub use context::DataContext;
pub use contract::{
    Cardinality, ConfigMap, ConfigParamSpec, DataContractEntry, ModuleInputs, ModuleMetadata,
    ModuleOutput, ModuleType, OutputSink, ScanModule,
};
pub use dag::{execution_order, load_schema, save_schema, validate, DagNode, DagSchema};
pub use error::{FixSuggestion, Result, SentraError};
pub use event_log::{EventLog, RunEvent, RunEventKind};
pub use orchestrator::{NodeStatus, Orchestrator, RunSnapshot, RuntimeNode};
pub use planner::{PlanDiagnostic, Planner, ScanIntent, ScanLevel, ScanPlan, ScanProfile};
pub use registry::{ModuleFactory, ModuleRegistry};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_pipeline_validates() {
        let registry = ModuleRegistry::new();
        modules::register_builtins(&registry);

        let intent = ScanIntent {
            targets: vec!["10.0.0.1".into()],
            profile: Some(ScanProfile::FullScan),
            enable_vuln_checks: true,
            ..Default::default()
        };
        let plan = Planner::new(registry).plan(&intent).unwrap();
        let result = validate(&plan.schema);
        assert!(result.is_valid(), "unexpected: {}", result.error_summary());
    }

    #[test]
    fn schema_parses_from_yaml() {
        let yaml = r#"
name: smoke
nodes:
  - id: disco
    module: target_discovery
    consumes: [config.targets]
    produces: [discovery.live_hosts]
  - id: report
    module: report_summary
    depends_on: [disco]
    consumes: [discovery.live_hosts]
    produces: [report.summary]
"#;
        let schema: DagSchema = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(schema.nodes.len(), 2);
        assert!(validate(&schema).is_valid());
        let layers = execution_order(&schema).unwrap();
        assert_eq!(layers, vec![vec!["disco"], vec!["report"]]);
    }
}
