//! Run summary report module
//!
//! Aggregates whatever upstream stages ran into one `report.summary`
//! object. Every consumed key is optional, so the module works for quick
//! discovery runs and full scans alike.

use async_trait::async_trait;
use chrono::Utc;
use rustc_hash::FxHashMap;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use crate::contract::{
    ConfigMap, DataContractEntry, ModuleInputs, ModuleMetadata, ModuleOutput, ModuleType,
    OutputSink, ScanModule,
};
use crate::error::Result;

pub struct ReportSummary {
    metadata: ModuleMetadata,
    instance_id: String,
}

impl Default for ReportSummary {
    fn default() -> Self {
        Self {
            metadata: ModuleMetadata {
                name: "report_summary".to_string(),
                version: "1.3.0".to_string(),
                module_type: ModuleType::Reporting,
                tags: vec!["report".to_string()],
                config_schema: FxHashMap::default(),
                consumes: vec![
                    DataContractEntry::list("discovery.live_hosts", "string").optional(),
                    DataContractEntry::list("scan.open_ports", "object").optional(),
                    DataContractEntry::list("parse.services", "object").optional(),
                    DataContractEntry::list("eval.findings", "object").optional(),
                ],
                produces: vec![DataContractEntry::single("report.summary", "object")],
            },
            instance_id: String::new(),
        }
    }
}

#[async_trait]
impl ScanModule for ReportSummary {
    fn metadata(&self) -> &ModuleMetadata {
        &self.metadata
    }

    fn init(&mut self, instance_id: &str, _config: &ConfigMap) -> Result<()> {
        self.instance_id = instance_id.to_string();
        Ok(())
    }

    async fn execute(
        &self,
        _cancel: CancellationToken,
        inputs: &ModuleInputs,
        sink: OutputSink,
    ) -> Result<()> {
        let count = |key: &str| {
            inputs
                .get(key)
                .and_then(Value::as_array)
                .map(|list| list.len())
                .unwrap_or(0)
        };

        let mut by_severity: Map<String, Value> = Map::new();
        if let Some(findings) = inputs.get("eval.findings").and_then(Value::as_array) {
            for finding in findings {
                if let Some(severity) = finding.get("severity").and_then(Value::as_str) {
                    let slot = by_severity.entry(severity.to_string()).or_insert(json!(0));
                    *slot = json!(slot.as_u64().unwrap_or(0) + 1);
                }
            }
        }

        let summary = json!({
            "hosts_discovered": count("discovery.live_hosts"),
            "open_ports": count("scan.open_ports"),
            "services_identified": count("parse.services"),
            "findings_total": count("eval.findings"),
            "findings_by_severity": Value::Object(by_severity),
            "generated_at": Utc::now().to_rfc3339(),
        });

        sink.emit(ModuleOutput::new(
            &self.metadata.name,
            "report.summary",
            summary,
        ))
        .await
    }
}
