//! Service identification module
//!
//! Maps open ports to well-known service labels from a static table. Ports
//! without a table entry are labeled `unknown`.

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::contract::{
    ConfigMap, DataContractEntry, ModuleInputs, ModuleMetadata, ModuleOutput, ModuleType,
    OutputSink, ScanModule,
};
use crate::error::Result;

pub struct ServiceParse {
    metadata: ModuleMetadata,
    instance_id: String,
}

impl Default for ServiceParse {
    fn default() -> Self {
        Self {
            metadata: ModuleMetadata {
                name: "service_parse".to_string(),
                version: "1.1.0".to_string(),
                module_type: ModuleType::Parse,
                tags: vec!["parse".to_string()],
                config_schema: FxHashMap::default(),
                consumes: vec![DataContractEntry::list("scan.open_ports", "object")],
                produces: vec![DataContractEntry::list("parse.services", "object")],
            },
            instance_id: String::new(),
        }
    }
}

#[async_trait]
impl ScanModule for ServiceParse {
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
        let services: Vec<Value> = inputs
            .get("scan.open_ports")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| {
                        let host = entry.get("host")?.as_str()?;
                        let port = entry.get("port")?.as_u64()? as u16;
                        Some(json!({
                            "host": host,
                            "port": port,
                            "service": service_for_port(port).unwrap_or("unknown"),
                        }))
                    })
                    .collect()
            })
            .unwrap_or_default();

        sink.emit(ModuleOutput::new(
            &self.metadata.name,
            "parse.services",
            Value::Array(services),
        ))
        .await
    }
}

/// Well-known port to service label
pub fn service_for_port(port: u16) -> Option<&'static str> {
    match port {
        21 => Some("ftp"),
        22 => Some("ssh"),
        23 => Some("telnet"),
        25 => Some("smtp"),
        53 => Some("dns"),
        80 => Some("http"),
        110 => Some("pop3"),
        143 => Some("imap"),
        443 => Some("https"),
        445 => Some("smb"),
        1433 => Some("mssql"),
        3306 => Some("mysql"),
        3389 => Some("rdp"),
        5432 => Some("postgres"),
        5900 => Some("vnc"),
        6379 => Some("redis"),
        8080 => Some("http-alt"),
        8443 => Some("https-alt"),
        27017 => Some("mongodb"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_covers_common_ports() {
        assert_eq!(service_for_port(22), Some("ssh"));
        assert_eq!(service_for_port(443), Some("https"));
        assert_eq!(service_for_port(6379), Some("redis"));
        assert_eq!(service_for_port(60000), None);
    }

    #[tokio::test]
    async fn labels_open_ports() {
        let mut module = ServiceParse::default();
        module.init("parse-1", &ConfigMap::default()).unwrap();

        let mut inputs = ModuleInputs::default();
        inputs.insert(
            "scan.open_ports".into(),
            json!([
                {"host": "10.0.0.1", "port": 22},
                {"host": "10.0.0.1", "port": 60000},
            ]),
        );

        let (sink, mut rx) = OutputSink::channel();
        module
            .execute(CancellationToken::new(), &inputs, sink)
            .await
            .unwrap();

        let output = rx.recv().await.expect("one output");
        assert_eq!(
            output.data,
            json!([
                {"host": "10.0.0.1", "port": 22, "service": "ssh"},
                {"host": "10.0.0.1", "port": 60000, "service": "unknown"},
            ])
        );
    }

    #[tokio::test]
    async fn missing_input_yields_empty_list() {
        let mut module = ServiceParse::default();
        module.init("parse-1", &ConfigMap::default()).unwrap();

        let (sink, mut rx) = OutputSink::channel();
        module
            .execute(CancellationToken::new(), &ModuleInputs::default(), sink)
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap().data, json!([]));
    }
}
