//! Target discovery module
//!
//! Expands the raw `config.targets` list (hosts, CIDR blocks, dash ranges)
//! into a normalized, deduplicated host list. Loopback targets are dropped
//! unless `allow_loopback` is set.

use std::net::Ipv4Addr;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::contract::{
    ConfigMap, ConfigParamSpec, DataContractEntry, ModuleInputs, ModuleMetadata, ModuleOutput,
    ModuleType, OutputSink, ScanModule,
};
use crate::error::Result;
use crate::modules::{config_bool, config_u64};

/// Largest CIDR expansion accepted (a /24)
const MAX_CIDR_HOSTS: u32 = 256;

static CIDR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,3}(?:\.\d{1,3}){3})/(\d{1,2})$").expect("valid regex"));
static RANGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,3}(?:\.\d{1,3}){3})-(\d{1,3})$").expect("valid regex"));
static HOST_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9.\-]{0,252}$").expect("valid regex"));

pub struct TargetDiscovery {
    metadata: ModuleMetadata,
    instance_id: String,
    allow_loopback: bool,
    /// Probe repetition budget; kept for config compatibility
    count: u64,
}

impl Default for TargetDiscovery {
    fn default() -> Self {
        let mut config_schema = FxHashMap::default();
        config_schema.insert(
            "allow_loopback".to_string(),
            ConfigParamSpec::new("bool").with_default(json!(false)),
        );
        config_schema.insert(
            "count".to_string(),
            ConfigParamSpec::new("int").with_default(json!(1)),
        );

        Self {
            metadata: ModuleMetadata {
                name: "target_discovery".to_string(),
                version: "1.2.0".to_string(),
                module_type: ModuleType::Discovery,
                tags: vec!["discovery".to_string(), "network".to_string()],
                config_schema,
                consumes: vec![DataContractEntry::list("config.targets", "string")],
                produces: vec![DataContractEntry::list("discovery.live_hosts", "string")],
            },
            instance_id: String::new(),
            allow_loopback: false,
            count: 1,
        }
    }
}

#[async_trait]
impl ScanModule for TargetDiscovery {
    fn metadata(&self) -> &ModuleMetadata {
        &self.metadata
    }

    fn init(&mut self, instance_id: &str, config: &ConfigMap) -> Result<()> {
        self.instance_id = instance_id.to_string();
        self.allow_loopback = config_bool(config, "allow_loopback")?.unwrap_or(false);
        self.count = config_u64(config, "count")?.unwrap_or(1).max(1);
        Ok(())
    }

    async fn execute(
        &self,
        cancel: CancellationToken,
        inputs: &ModuleInputs,
        sink: OutputSink,
    ) -> Result<()> {
        let targets: Vec<String> = inputs
            .get("config.targets")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let mut hosts: Vec<String> = Vec::new();
        let mut seen: FxHashSet<String> = FxHashSet::default();
        for target in &targets {
            if cancel.is_cancelled() {
                return Err(crate::error::SentraError::Canceled);
            }
            for host in expand_target(target) {
                if !self.allow_loopback && is_loopback(&host) {
                    debug!(
                        component = "discovery",
                        node = %self.instance_id,
                        host = %host,
                        "loopback target skipped"
                    );
                    continue;
                }
                if seen.insert(host.clone()) {
                    hosts.push(host);
                }
            }
        }

        sink.emit(ModuleOutput::new(
            &self.metadata.name,
            "discovery.live_hosts",
            Value::Array(hosts.into_iter().map(Value::String).collect()),
        ))
        .await
    }
}

/// Expand one target string into concrete hosts
///
/// Accepted syntaxes: hostname/IP, `a.b.c.d/nn` CIDR (nn >= 24), and the
/// last-octet dash range `a.b.c.d-e`. Anything else is skipped with a
/// warning.
fn expand_target(target: &str) -> Vec<String> {
    let target = target.trim();
    if target.is_empty() {
        return Vec::new();
    }

    if let Some(caps) = CIDR_RE.captures(target) {
        let base: Option<Ipv4Addr> = caps[1].parse().ok();
        let prefix: Option<u8> = caps[2].parse().ok();
        match (base, prefix) {
            (Some(base), Some(prefix)) if prefix <= 32 => {
                let host_bits = 32 - u32::from(prefix);
                let host_count = 1u64 << host_bits;
                if host_count > u64::from(MAX_CIDR_HOSTS) {
                    warn!(component = "discovery", target = %target, "CIDR wider than /24 skipped");
                    return Vec::new();
                }
                let start = u32::from(base) & !((host_count as u32).wrapping_sub(1));
                return (0..host_count as u32)
                    .map(|offset| Ipv4Addr::from(start + offset).to_string())
                    .collect();
            }
            _ => {
                warn!(component = "discovery", target = %target, "invalid CIDR skipped");
                return Vec::new();
            }
        }
    }

    if let Some(caps) = RANGE_RE.captures(target) {
        let base: Option<Ipv4Addr> = caps[1].parse().ok();
        let end: Option<u8> = caps[2].parse().ok();
        if let (Some(base), Some(end)) = (base, end) {
            let octets = base.octets();
            if octets[3] <= end {
                return (octets[3]..=end)
                    .map(|last| Ipv4Addr::new(octets[0], octets[1], octets[2], last).to_string())
                    .collect();
            }
        }
        warn!(component = "discovery", target = %target, "invalid range skipped");
        return Vec::new();
    }

    if HOST_RE.is_match(target) {
        return vec![target.to_string()];
    }

    warn!(component = "discovery", target = %target, "unrecognized target syntax skipped");
    Vec::new()
}

fn is_loopback(host: &str) -> bool {
    host == "localhost" || host == "::1" || host.starts_with("127.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn run_discovery(targets: Value, allow_loopback: bool) -> Vec<String> {
        let mut module = TargetDiscovery::default();
        let mut config = ConfigMap::default();
        config.insert("allow_loopback".into(), json!(allow_loopback));
        module.init("disco-1", &config).unwrap();

        let mut inputs = ModuleInputs::default();
        inputs.insert("config.targets".into(), targets);

        let (sink, mut rx) = OutputSink::channel();
        module
            .execute(CancellationToken::new(), &inputs, sink)
            .await
            .unwrap();

        let output = rx.recv().await.expect("one output");
        assert_eq!(output.data_key, "discovery.live_hosts");
        output
            .data
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn plain_hosts_pass_through() {
        assert_eq!(expand_target("scanme.example.org"), vec!["scanme.example.org"]);
        assert_eq!(expand_target("10.1.2.3"), vec!["10.1.2.3"]);
    }

    #[test]
    fn cidr_expands_to_all_addresses() {
        let hosts = expand_target("192.168.1.0/30");
        assert_eq!(
            hosts,
            vec!["192.168.1.0", "192.168.1.1", "192.168.1.2", "192.168.1.3"]
        );
    }

    #[test]
    fn cidr_base_is_masked() {
        let hosts = expand_target("192.168.1.9/30");
        assert_eq!(
            hosts,
            vec!["192.168.1.8", "192.168.1.9", "192.168.1.10", "192.168.1.11"]
        );
    }

    #[test]
    fn wide_cidr_is_skipped() {
        assert!(expand_target("10.0.0.0/8").is_empty());
    }

    #[test]
    fn dash_range_expands_last_octet() {
        let hosts = expand_target("10.0.0.250-252");
        assert_eq!(hosts, vec!["10.0.0.250", "10.0.0.251", "10.0.0.252"]);
    }

    #[test]
    fn garbage_is_skipped() {
        assert!(expand_target("not a host!").is_empty());
        assert!(expand_target("10.0.0.0/99").is_empty());
        assert!(expand_target("").is_empty());
    }

    #[tokio::test]
    async fn loopback_is_filtered_by_default() {
        let hosts = run_discovery(json!(["127.0.0.1", "10.0.0.1", "localhost"]), false).await;
        assert_eq!(hosts, vec!["10.0.0.1"]);
    }

    #[tokio::test]
    async fn loopback_allowed_when_configured() {
        let hosts = run_discovery(json!(["127.0.0.1"]), true).await;
        assert_eq!(hosts, vec!["127.0.0.1"]);
    }

    #[tokio::test]
    async fn duplicates_are_removed_in_order() {
        let hosts = run_discovery(json!(["10.0.0.1", "10.0.0.0/30", "10.0.0.1"]), false).await;
        assert_eq!(hosts, vec!["10.0.0.1", "10.0.0.0", "10.0.0.2", "10.0.0.3"]);
    }
}
