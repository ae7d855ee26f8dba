//! DAG planner
//!
//! Turns a high-level [`ScanIntent`] into a concrete, dependency-satisfied
//! [`DagSchema`] by selecting modules from a registry and admitting them in
//! layers until a fixed point.
//!
//! The planner is deterministic: registry iteration uses stable sorted name
//! order and ties within one admission pass resolve in that order. Generated
//! DAGs are reproducible, which the test suite relies on.

use std::fmt;
use std::str::FromStr;

use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::contract::{ConfigMap, ModuleInputs, ModuleMetadata, ModuleType};
use crate::dag::{DagNode, DagSchema};
use crate::error::{Result, SentraError};
use crate::registry::ModuleRegistry;

/// Selection preset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanProfile {
    /// Discovery and reporting only
    QuickDiscovery,
    /// Every registered module type
    FullScan,
}

impl FromStr for ScanProfile {
    type Err = SentraError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "quick_discovery" => Ok(ScanProfile::QuickDiscovery),
            "full_scan" => Ok(ScanProfile::FullScan),
            other => Err(SentraError::InvalidConfig {
                param: "profile".into(),
                details: format!("unknown profile '{}' (use quick_discovery or full_scan)", other),
            }),
        }
    }
}

impl fmt::Display for ScanProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanProfile::QuickDiscovery => write!(f, "quick_discovery"),
            ScanProfile::FullScan => write!(f, "full_scan"),
        }
    }
}

/// Intensity refinement applied on top of the profile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanLevel {
    Light,
    Comprehensive,
    Intrusive,
}

impl FromStr for ScanLevel {
    type Err = SentraError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "light" => Ok(ScanLevel::Light),
            "comprehensive" => Ok(ScanLevel::Comprehensive),
            "intrusive" => Ok(ScanLevel::Intrusive),
            other => Err(SentraError::InvalidConfig {
                param: "level".into(),
                details: format!(
                    "unknown level '{}' (use light, comprehensive or intrusive)",
                    other
                ),
            }),
        }
    }
}

/// High-level description of a desired scan, pre-expansion into a DAG
#[derive(Debug, Clone, Default)]
pub struct ScanIntent {
    /// Host / CIDR / range strings, seeded as `config.targets`
    pub targets: Vec<String>,
    pub profile: Option<ScanProfile>,
    pub level: Option<ScanLevel>,
    /// Candidate must carry at least one of these tags
    pub include_tags: Vec<String>,
    /// Candidate must carry none of these tags
    pub exclude_tags: Vec<String>,
    /// Include Evaluation-type modules
    pub enable_vuln_checks: bool,
    pub custom_port_config: Option<String>,
    /// Seconds, applied to every timeout-shaped config parameter
    pub custom_timeout: Option<u64>,
    pub ping_count: Option<u32>,
    pub allow_loopback: bool,
    pub concurrency: Option<usize>,
}

impl ScanIntent {
    /// Initial inputs for a run planned from this intent
    ///
    /// `config.targets` is always a list of strings.
    pub fn initial_inputs(&self) -> ModuleInputs {
        let mut inputs = ModuleInputs::default();
        inputs.insert(
            "config.targets".to_string(),
            Value::Array(self.targets.iter().map(|t| json!(t)).collect()),
        );
        inputs
    }
}

/// A candidate the planner could not wire into the DAG
#[derive(Debug, Clone, PartialEq)]
pub struct PlanDiagnostic {
    pub module: String,
    /// Required keys nothing in the plan produces; empty when the module was
    /// held back because its type was already planned
    pub unmet_keys: Vec<String>,
}

/// Planner output: a validated-by-construction schema plus diagnostics
#[derive(Debug)]
pub struct ScanPlan {
    pub schema: DagSchema,
    pub diagnostics: Vec<PlanDiagnostic>,
}

/// Intent-to-DAG planner over one registry
pub struct Planner {
    registry: ModuleRegistry,
}

impl Planner {
    pub fn new(registry: ModuleRegistry) -> Self {
        Self { registry }
    }

    /// Planner over the process-wide registry
    pub fn from_global() -> Self {
        Self::new(ModuleRegistry::global().clone())
    }

    /// Synthesize a DAG for the intent
    ///
    /// Fails only when no module at all could be planned; candidates left
    /// unadmitted surface as diagnostics.
    pub fn plan(&self, intent: &ScanIntent) -> Result<ScanPlan> {
        let candidates = self.select_candidates(intent);
        if candidates.is_empty() {
            return Err(SentraError::PlanEmpty {
                reason: "no registered module matches the intent filters".to_string(),
            });
        }

        let mut state = Admission::new();
        let mut remaining = candidates;

        // layered admission until a full pass admits nothing; the predicate
        // covers optional keys too, so consumers land after their producers
        loop {
            let mut progressed = false;
            remaining.retain(|meta| {
                if state.admitted_types.contains(&meta.module_type) {
                    return true;
                }
                let runnable = meta
                    .consumes
                    .iter()
                    .all(|c| c.is_external() || state.available.contains(&c.key));
                if !runnable {
                    return true;
                }
                state.admit(intent, meta);
                progressed = true;
                false
            });
            if !progressed {
                break;
            }
        }

        // a reporting module whose optional inputs never all materialize is
        // still planned, wired to whatever producers exist
        if !state.admitted_types.contains(&ModuleType::Reporting) {
            if let Some(pos) = remaining.iter().position(|meta| {
                meta.module_type == ModuleType::Reporting
                    && meta
                        .required_consumes()
                        .all(|c| c.is_external() || state.available.contains(&c.key))
            }) {
                let meta = remaining.remove(pos);
                state.admit(intent, &meta);
            }
        }

        let Admission {
            available, nodes, ..
        } = state;

        if nodes.is_empty() {
            return Err(SentraError::PlanEmpty {
                reason: "no candidate's consumed keys can be satisfied from config.targets"
                    .to_string(),
            });
        }

        let diagnostics: Vec<PlanDiagnostic> = remaining
            .iter()
            .map(|meta| PlanDiagnostic {
                module: meta.name.clone(),
                unmet_keys: meta
                    .required_consumes()
                    .filter(|c| !c.is_external() && !available.contains(&c.key))
                    .map(|c| c.key.clone())
                    .collect(),
            })
            .collect();
        for diag in &diagnostics {
            warn!(
                component = "planner",
                module = %diag.module,
                unmet = ?diag.unmet_keys,
                "candidate left out of plan"
            );
        }

        let name = match intent.profile {
            Some(ScanProfile::QuickDiscovery) => "quick-discovery",
            Some(ScanProfile::FullScan) => "full-scan",
            None => "custom-scan",
        };
        Ok(ScanPlan {
            schema: DagSchema {
                name: name.to_string(),
                version: "1".to_string(),
                description: format!("planned scan over {} target(s)", intent.targets.len()),
                nodes,
            },
            diagnostics,
        })
    }

    /// Pick modules whose type and tags match the intent
    fn select_candidates(&self, intent: &ScanIntent) -> Vec<ModuleMetadata> {
        let excluded = |meta: &ModuleMetadata| {
            intent.exclude_tags.iter().any(|t| meta.has_tag(t))
        };
        let type_allowed = |meta: &ModuleMetadata| {
            if meta.module_type == ModuleType::Evaluation && !intent.enable_vuln_checks {
                return false;
            }
            match intent.profile {
                Some(ScanProfile::QuickDiscovery) => matches!(
                    meta.module_type,
                    ModuleType::Discovery | ModuleType::Reporting
                ),
                Some(ScanProfile::FullScan) | None => true,
            }
        };

        let mut candidates: Vec<ModuleMetadata> = Vec::new();
        let mut all_reporting: Vec<ModuleMetadata> = Vec::new();
        for name in self.registry.module_names() {
            let Some(meta) = self.registry.metadata(&name) else { continue };
            if excluded(&meta) {
                continue;
            }
            if meta.module_type == ModuleType::Reporting {
                all_reporting.push(meta.clone());
            }
            if !type_allowed(&meta) {
                continue;
            }
            if !intent.include_tags.is_empty()
                && !intent.include_tags.iter().any(|t| meta.has_tag(t))
            {
                continue;
            }
            candidates.push(meta);
        }

        // a report always ships when any reporting module is registered and
        // not excluded, even if the tag filter would drop it
        let has_reporting = candidates
            .iter()
            .any(|m| m.module_type == ModuleType::Reporting);
        if !has_reporting {
            if let Some(report) = all_reporting.into_iter().next() {
                candidates.push(report);
                candidates.sort_by(|a, b| a.name.cmp(&b.name));
            }
        }

        candidates
    }
}

/// Mutable state of one planning run
struct Admission {
    available: FxHashSet<String>,
    nodes: Vec<DagNode>,
    used_ids: FxHashSet<String>,
    producer_of: FxHashMap<String, String>,
    admitted_types: FxHashSet<ModuleType>,
}

impl Admission {
    fn new() -> Self {
        let mut available = FxHashSet::default();
        available.insert("config.targets".to_string());
        Self {
            available,
            nodes: Vec::new(),
            used_ids: FxHashSet::default(),
            producer_of: FxHashMap::default(),
            admitted_types: FxHashSet::default(),
        }
    }

    fn admit(&mut self, intent: &ScanIntent, meta: &ModuleMetadata) {
        let instance_id = unique_instance_id(&meta.name, &mut self.used_ids);
        debug!(
            component = "planner",
            node = %instance_id,
            module = %meta.name,
            "admitted module"
        );

        let mut depends_on: Vec<String> = meta
            .consumes
            .iter()
            .filter(|c| !c.is_external())
            .filter_map(|c| self.producer_of.get(&c.key).cloned())
            .collect();
        depends_on.sort();
        depends_on.dedup();

        // optional keys nothing in the plan produces are pruned, so the
        // generated node only declares consumes the validator can satisfy
        let consumes: Vec<String> = meta
            .consumes
            .iter()
            .filter(|c| c.is_external() || self.producer_of.contains_key(&c.key))
            .map(|c| c.key.clone())
            .collect();

        for entry in &meta.produces {
            self.available.insert(entry.key.clone());
            self.producer_of.insert(entry.key.clone(), instance_id.clone());
        }
        self.admitted_types.insert(meta.module_type);

        self.nodes.push(DagNode {
            id: instance_id,
            module: meta.name.clone(),
            config: build_config(intent, meta),
            depends_on,
            consumes,
            produces: meta.produces.iter().map(|c| c.key.clone()).collect(),
        });
    }
}

/// Slugified, uniqueified instance id for a module name
fn unique_instance_id(module_name: &str, used: &mut FxHashSet<String>) -> String {
    let slug = slugify(module_name);
    let mut candidate = slug.clone();
    let mut suffix = 2;
    while !used.insert(candidate.clone()) {
        candidate = format!("{}-{}", slug, suffix);
        suffix += 1;
    }
    candidate
}

fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_dash = true;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        slug.push_str("node");
    }
    slug
}

/// Overlay intent-specific rules on top of config-schema defaults
fn build_config(intent: &ScanIntent, meta: &ModuleMetadata) -> ConfigMap {
    let mut config = ConfigMap::default();
    for (param, spec) in &meta.config_schema {
        if let Some(default) = &spec.default {
            config.insert(param.clone(), default.clone());
        }
    }

    let has = |param: &str| meta.config_schema.contains_key(param);

    if has("ports") {
        if let Some(ports) = &intent.custom_port_config {
            config.insert("ports".into(), json!(ports));
        } else {
            match intent.level {
                Some(ScanLevel::Comprehensive) => {
                    config.insert("ports".into(), json!("1-1024"));
                }
                Some(ScanLevel::Intrusive) => {
                    config.insert("ports".into(), json!("1-4096"));
                }
                Some(ScanLevel::Light) | None => {}
            }
        }
    }
    if let Some(timeout) = intent.custom_timeout {
        for param in ["timeout", "read_timeout", "connect_timeout"] {
            if has(param) {
                config.insert(param.into(), json!(timeout));
            }
        }
    }
    if let Some(count) = intent.ping_count {
        if has("count") {
            config.insert("count".into(), json!(count));
        }
    }
    if intent.allow_loopback && has("allow_loopback") {
        config.insert("allow_loopback".into(), json!(true));
    }
    if let Some(concurrency) = intent.concurrency {
        if has("concurrency") {
            config.insert("concurrency".into(), json!(concurrency));
        }
    }

    config
}
