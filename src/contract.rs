//! Module contracts - the common vocabulary of the engine
//!
//! Every module declares what it consumes and produces as sets of
//! [`DataContractEntry`] values. The planner wires DAGs by matching these
//! contracts, the orchestrator derives dependency edges from them, and the
//! data context type-checks writes against them.
//!
//! Keys are hierarchical dotted identifiers (`discovery.live_hosts`). Keys
//! whose first segment is `config` denote externally supplied inputs and
//! never require an in-DAG producer.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SentraError};

/// Namespace for externally seeded keys
pub const CONFIG_NAMESPACE: &str = "config";

/// Capacity of the per-execution output channel
pub const OUTPUT_CHANNEL_CAPACITY: usize = 64;

/// Check whether a key lives under the `config.` namespace
#[inline]
pub fn is_config_key(key: &str) -> bool {
    key.split('.').next() == Some(CONFIG_NAMESPACE)
}

/// Module configuration map (param name -> JSON value)
pub type ConfigMap = FxHashMap<String, Value>;

/// Assembled inputs handed to `execute` (data key -> JSON value)
pub type ModuleInputs = FxHashMap<String, Value>;

// ============================================================================
// DATA CONTRACTS
// ============================================================================

/// Cardinality of a data key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    /// One value; `publish` overwrites
    Single,
    /// Ordered list of values; `append` extends
    List,
}

/// A single produced or consumed data declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataContractEntry {
    pub key: String,
    pub cardinality: Cardinality,
    #[serde(default)]
    pub optional: bool,
    pub type_tag: String,
}

impl DataContractEntry {
    pub fn single(key: impl Into<String>, type_tag: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            cardinality: Cardinality::Single,
            optional: false,
            type_tag: type_tag.into(),
        }
    }

    pub fn list(key: impl Into<String>, type_tag: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            cardinality: Cardinality::List,
            optional: false,
            type_tag: type_tag.into(),
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Externally seeded keys never need an in-DAG producer
    pub fn is_external(&self) -> bool {
        is_config_key(&self.key)
    }
}

// ============================================================================
// MODULE METADATA
// ============================================================================

/// Functional category of a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleType {
    Discovery,
    Scan,
    Parse,
    Evaluation,
    Reporting,
    Output,
    Orchestration,
}

impl fmt::Display for ModuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModuleType::Discovery => "discovery",
            ModuleType::Scan => "scan",
            ModuleType::Parse => "parse",
            ModuleType::Evaluation => "evaluation",
            ModuleType::Reporting => "reporting",
            ModuleType::Output => "output",
            ModuleType::Orchestration => "orchestration",
        };
        write!(f, "{}", name)
    }
}

/// Declared shape of one config parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigParamSpec {
    /// Expected JSON type ("string", "int", "bool", ...)
    pub param_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
}

impl ConfigParamSpec {
    pub fn new(param_type: impl Into<String>) -> Self {
        Self {
            param_type: param_type.into(),
            required: false,
            default: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Immutable description of a module factory
///
/// Metadata is stable for the lifetime of the factory: the registry, the
/// planner and the orchestrator all read it, none of them mutate it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleMetadata {
    pub name: String,
    pub version: String,
    pub module_type: ModuleType,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub config_schema: FxHashMap<String, ConfigParamSpec>,
    #[serde(default)]
    pub consumes: Vec<DataContractEntry>,
    #[serde(default)]
    pub produces: Vec<DataContractEntry>,
}

impl ModuleMetadata {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Keys this module requires to be available before it can run
    pub fn required_consumes(&self) -> impl Iterator<Item = &DataContractEntry> {
        self.consumes.iter().filter(|c| !c.optional)
    }
}

// ============================================================================
// MODULE OUTPUT
// ============================================================================

/// One streamed output value
///
/// `error` is a per-output advisory condition; a fatal failure is signalled
/// by the `Err` return of `execute`, never through an output.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleOutput {
    pub from_module: String,
    pub data_key: String,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ModuleOutput {
    pub fn new(from_module: impl Into<String>, data_key: impl Into<String>, data: Value) -> Self {
        Self {
            from_module: from_module.into(),
            data_key: data_key.into(),
            data,
            target: None,
            timestamp: Utc::now(),
            error: None,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

// ============================================================================
// OUTPUT SINK
// ============================================================================

/// Bounded sink a module streams outputs through
///
/// The sink is consumed by `execute`; dropping it (which happens implicitly
/// when `execute` returns) closes the channel, so outputs cannot arrive
/// after the module has finished.
pub struct OutputSink {
    tx: mpsc::Sender<ModuleOutput>,
}

impl OutputSink {
    pub(crate) fn new(tx: mpsc::Sender<ModuleOutput>) -> Self {
        Self { tx }
    }

    /// Create a sink plus the receiving half (for tests and the orchestrator)
    pub fn channel() -> (Self, mpsc::Receiver<ModuleOutput>) {
        let (tx, rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        (Self::new(tx), rx)
    }

    /// Emit one output; backpressure applies when the channel is full
    ///
    /// Fails with `Canceled` when the run is tearing down and nobody is
    /// draining the channel anymore.
    pub async fn emit(&self, output: ModuleOutput) -> Result<()> {
        self.tx.send(output).await.map_err(|_| SentraError::Canceled)
    }
}

// ============================================================================
// MODULE TRAIT
// ============================================================================

/// A unit of scan work
///
/// Lifecycle: the registry calls the factory, then `init` exactly once with
/// the node's config; the orchestrator calls `execute` at most once per run.
#[async_trait]
pub trait ScanModule: Send + Sync {
    /// Pure, stable metadata
    fn metadata(&self) -> &ModuleMetadata;

    /// One-time initialization; fails if required config is missing or
    /// ill-typed
    fn init(&mut self, instance_id: &str, config: &ConfigMap) -> Result<()>;

    /// Run the module: read `inputs`, stream zero or more outputs through
    /// `sink`, then return. A returned error fails the whole node.
    async fn execute(
        &self,
        cancel: CancellationToken,
        inputs: &ModuleInputs,
        sink: OutputSink,
    ) -> Result<()>;
}

/// Shared module handle used by the runtime graph
pub type SharedModule = Arc<dyn ScanModule>;

impl fmt::Debug for dyn ScanModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanModule")
            .field("metadata", self.metadata())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn config_keys_are_external() {
        assert!(is_config_key("config.targets"));
        assert!(is_config_key("config.ports"));
        assert!(!is_config_key("discovery.live_hosts"));
        assert!(!is_config_key("configured.thing"));
    }

    #[test]
    fn contract_builders() {
        let entry = DataContractEntry::list("scan.open_ports", "object").optional();
        assert_eq!(entry.cardinality, Cardinality::List);
        assert!(entry.optional);
        assert!(!entry.is_external());

        let seed = DataContractEntry::list("config.targets", "string");
        assert!(seed.is_external());
    }

    #[test]
    fn required_consumes_skips_optional() {
        let meta = ModuleMetadata {
            name: "report".into(),
            version: "1.0".into(),
            module_type: ModuleType::Reporting,
            tags: vec!["report".into()],
            config_schema: FxHashMap::default(),
            consumes: vec![
                DataContractEntry::list("scan.open_ports", "object").optional(),
                DataContractEntry::list("config.targets", "string"),
            ],
            produces: vec![DataContractEntry::single("report.summary", "object")],
        };
        let required: Vec<_> = meta.required_consumes().map(|c| c.key.as_str()).collect();
        assert_eq!(required, vec!["config.targets"]);
    }

    #[tokio::test]
    async fn sink_closes_when_dropped() {
        let (sink, mut rx) = OutputSink::channel();
        sink.emit(ModuleOutput::new("m", "k", json!(1))).await.unwrap();
        drop(sink);

        let first = rx.recv().await;
        assert!(first.is_some());
        assert!(rx.recv().await.is_none(), "channel must close on drop");
    }

    #[tokio::test]
    async fn emit_after_receiver_gone_fails() {
        let (sink, rx) = OutputSink::channel();
        drop(rx);
        let err = sink
            .emit(ModuleOutput::new("m", "k", json!(1)))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CANCELED");
    }
}
