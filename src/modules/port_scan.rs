//! TCP connect port scan module
//!
//! Probes each discovered host on the configured port list with bounded
//! concurrency and a per-connection timeout. A port counts as open when the
//! TCP handshake completes within the timeout.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use rustc_hash::FxHashMap;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::contract::{
    ConfigMap, ConfigParamSpec, DataContractEntry, ModuleInputs, ModuleMetadata, ModuleOutput,
    ModuleType, OutputSink, ScanModule,
};
use crate::error::{Result, SentraError};
use crate::modules::{config_str, config_u64};

/// Well-known ports probed when no config overrides them
const DEFAULT_PORTS: &str = "21,22,23,25,80,110,143,443,445,3306,3389,5432,6379,8080,8443";
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 2;
const DEFAULT_CONCURRENCY: u64 = 64;

pub struct TcpPortScan {
    metadata: ModuleMetadata,
    instance_id: String,
    ports: Vec<u16>,
    connect_timeout: Duration,
    concurrency: usize,
}

impl Default for TcpPortScan {
    fn default() -> Self {
        let mut config_schema = FxHashMap::default();
        config_schema.insert(
            "ports".to_string(),
            ConfigParamSpec::new("string").with_default(json!(DEFAULT_PORTS)),
        );
        config_schema.insert(
            "connect_timeout".to_string(),
            ConfigParamSpec::new("int").with_default(json!(DEFAULT_CONNECT_TIMEOUT_SECS)),
        );
        config_schema.insert(
            "concurrency".to_string(),
            ConfigParamSpec::new("int").with_default(json!(DEFAULT_CONCURRENCY)),
        );

        Self {
            metadata: ModuleMetadata {
                name: "tcp_port_scan".to_string(),
                version: "1.4.0".to_string(),
                module_type: ModuleType::Scan,
                tags: vec![
                    "scan".to_string(),
                    "network".to_string(),
                    "ports".to_string(),
                ],
                config_schema,
                consumes: vec![DataContractEntry::list("discovery.live_hosts", "string")],
                produces: vec![DataContractEntry::list("scan.open_ports", "object")],
            },
            instance_id: String::new(),
            ports: Vec::new(),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            concurrency: DEFAULT_CONCURRENCY as usize,
        }
    }
}

#[async_trait]
impl ScanModule for TcpPortScan {
    fn metadata(&self) -> &ModuleMetadata {
        &self.metadata
    }

    fn init(&mut self, instance_id: &str, config: &ConfigMap) -> Result<()> {
        self.instance_id = instance_id.to_string();
        let spec = config_str(config, "ports")?.unwrap_or_else(|| DEFAULT_PORTS.to_string());
        self.ports = parse_port_spec(&spec)?;
        self.connect_timeout = Duration::from_secs(
            config_u64(config, "connect_timeout")?.unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
        );
        self.concurrency = config_u64(config, "concurrency")?
            .unwrap_or(DEFAULT_CONCURRENCY)
            .max(1) as usize;
        Ok(())
    }

    async fn execute(
        &self,
        cancel: CancellationToken,
        inputs: &ModuleInputs,
        sink: OutputSink,
    ) -> Result<()> {
        let hosts: Vec<String> = inputs
            .get("discovery.live_hosts")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let probes: Vec<(String, u16)> = hosts
            .iter()
            .flat_map(|host| self.ports.iter().map(move |&port| (host.clone(), port)))
            .collect();
        debug!(
            component = "port_scan",
            node = %self.instance_id,
            hosts = hosts.len(),
            probes = probes.len(),
            "starting connect scan"
        );

        let timeout = self.connect_timeout;
        let scan = stream::iter(probes)
            .map(|(host, port)| async move {
                let connect = TcpStream::connect((host.as_str(), port));
                match tokio::time::timeout(timeout, connect).await {
                    Ok(Ok(_stream)) => Some((host, port)),
                    _ => None,
                }
            })
            .buffer_unordered(self.concurrency)
            .collect::<Vec<_>>();

        let mut open: Vec<(String, u16)> = tokio::select! {
            _ = cancel.cancelled() => return Err(SentraError::Canceled),
            results = scan => results.into_iter().flatten().collect(),
        };
        open.sort();

        sink.emit(ModuleOutput::new(
            &self.metadata.name,
            "scan.open_ports",
            Value::Array(
                open.into_iter()
                    .map(|(host, port)| json!({"host": host, "port": port}))
                    .collect(),
            ),
        ))
        .await
    }
}

/// Parse a port spec like `80,443,8000-8100` into a sorted unique list
fn parse_port_spec(spec: &str) -> Result<Vec<u16>> {
    let invalid = |details: String| SentraError::InvalidConfig {
        param: "ports".to_string(),
        details,
    };

    let mut ports: Vec<u16> = Vec::new();
    for token in spec.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        match token.split_once('-') {
            Some((start, end)) => {
                let start: u16 = start
                    .trim()
                    .parse()
                    .map_err(|_| invalid(format!("bad range start in '{}'", token)))?;
                let end: u16 = end
                    .trim()
                    .parse()
                    .map_err(|_| invalid(format!("bad range end in '{}'", token)))?;
                if start == 0 || start > end {
                    return Err(invalid(format!("bad range '{}'", token)));
                }
                ports.extend(start..=end);
            }
            None => {
                let port: u16 = token
                    .parse()
                    .map_err(|_| invalid(format!("bad port '{}'", token)))?;
                if port == 0 {
                    return Err(invalid("port 0 is not probeable".to_string()));
                }
                ports.push(port);
            }
        }
    }
    if ports.is_empty() {
        return Err(invalid("port spec resolves to nothing".to_string()));
    }
    ports.sort_unstable();
    ports.dedup();
    Ok(ports)
}
