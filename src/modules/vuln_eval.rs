//! Vulnerability evaluation module
//!
//! Matches identified services against a static exposure rule table and
//! emits findings. Planned only when the intent enables vuln checks.

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::contract::{
    ConfigMap, DataContractEntry, ModuleInputs, ModuleMetadata, ModuleOutput, ModuleType,
    OutputSink, ScanModule,
};
use crate::error::Result;

struct Rule {
    service: &'static str,
    severity: &'static str,
    title: &'static str,
}

/// Exposure rules for services that should not face a scan perimeter
const RULES: &[Rule] = &[
    Rule {
        service: "telnet",
        severity: "high",
        title: "cleartext remote shell exposed",
    },
    Rule {
        service: "ftp",
        severity: "medium",
        title: "legacy file transfer service exposed",
    },
    Rule {
        service: "smb",
        severity: "high",
        title: "SMB file sharing reachable from scan perimeter",
    },
    Rule {
        service: "rdp",
        severity: "high",
        title: "remote desktop reachable from scan perimeter",
    },
    Rule {
        service: "vnc",
        severity: "high",
        title: "VNC remote access exposed",
    },
    Rule {
        service: "redis",
        severity: "high",
        title: "redis typically unauthenticated by default",
    },
    Rule {
        service: "mongodb",
        severity: "high",
        title: "mongodb typically unauthenticated by default",
    },
    Rule {
        service: "mysql",
        severity: "medium",
        title: "database port exposed",
    },
    Rule {
        service: "postgres",
        severity: "medium",
        title: "database port exposed",
    },
    Rule {
        service: "mssql",
        severity: "medium",
        title: "database port exposed",
    },
    Rule {
        service: "pop3",
        severity: "low",
        title: "legacy mail retrieval service exposed",
    },
];

pub struct VulnEvaluate {
    metadata: ModuleMetadata,
    instance_id: String,
}

impl Default for VulnEvaluate {
    fn default() -> Self {
        Self {
            metadata: ModuleMetadata {
                name: "vuln_evaluate".to_string(),
                version: "1.0.0".to_string(),
                module_type: ModuleType::Evaluation,
                tags: vec!["vuln".to_string(), "evaluation".to_string()],
                config_schema: FxHashMap::default(),
                consumes: vec![DataContractEntry::list("parse.services", "object")],
                produces: vec![DataContractEntry::list("eval.findings", "object")],
            },
            instance_id: String::new(),
        }
    }
}

#[async_trait]
impl ScanModule for VulnEvaluate {
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
        let findings: Vec<Value> = inputs
            .get("parse.services")
            .and_then(Value::as_array)
            .map(|services| {
                services
                    .iter()
                    .filter_map(|entry| {
                        let service = entry.get("service")?.as_str()?;
                        let rule = RULES.iter().find(|r| r.service == service)?;
                        Some(json!({
                            "host": entry.get("host")?.as_str()?,
                            "port": entry.get("port")?.as_u64()?,
                            "service": service,
                            "severity": rule.severity,
                            "title": rule.title,
                        }))
                    })
                    .collect()
            })
            .unwrap_or_default();

        sink.emit(ModuleOutput::new(
            &self.metadata.name,
            "eval.findings",
            Value::Array(findings),
        ))
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn risky_services_produce_findings() {
        let mut module = VulnEvaluate::default();
        module.init("eval-1", &ConfigMap::default()).unwrap();

        let mut inputs = ModuleInputs::default();
        inputs.insert(
            "parse.services".into(),
            json!([
                {"host": "10.0.0.1", "port": 23, "service": "telnet"},
                {"host": "10.0.0.1", "port": 443, "service": "https"},
                {"host": "10.0.0.2", "port": 6379, "service": "redis"},
            ]),
        );

        let (sink, mut rx) = OutputSink::channel();
        module
            .execute(CancellationToken::new(), &inputs, sink)
            .await
            .unwrap();

        let findings = rx.recv().await.unwrap().data;
        let findings = findings.as_array().unwrap();
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0]["service"], "telnet");
        assert_eq!(findings[0]["severity"], "high");
        assert_eq!(findings[1]["service"], "redis");
    }

    #[tokio::test]
    async fn clean_services_produce_nothing() {
        let mut module = VulnEvaluate::default();
        module.init("eval-1", &ConfigMap::default()).unwrap();

        let mut inputs = ModuleInputs::default();
        inputs.insert(
            "parse.services".into(),
            json!([{"host": "10.0.0.1", "port": 443, "service": "https"}]),
        );

        let (sink, mut rx) = OutputSink::channel();
        module
            .execute(CancellationToken::new(), &inputs, sink)
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap().data, json!([]));
    }
}
