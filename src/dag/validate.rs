//! DAG validation
//!
//! Structural, dependency and data-flow checks over a declarative schema.
//! The validator aggregates ALL errors and warnings into one result and
//! never mutates its input; callers decide whether warnings invalidate.

use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::contract::is_config_key;
use crate::dag::DagSchema;
use crate::error::{Result, SentraError};

/// Severity of a validation issue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// Stable rule identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueCode {
    EmptyDag,
    MissingId,
    DuplicateId,
    MissingModule,
    MissingDependency,
    Cycle,
    DataFlow,
    SelfDependency,
    NoOutput,
}

impl IssueCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueCode::EmptyDag => "empty_dag",
            IssueCode::MissingId => "missing_id",
            IssueCode::DuplicateId => "duplicate_id",
            IssueCode::MissingModule => "missing_module",
            IssueCode::MissingDependency => "missing_dependency",
            IssueCode::Cycle => "cycle",
            IssueCode::DataFlow => "data_flow",
            IssueCode::SelfDependency => "self_dependency",
            IssueCode::NoOutput => "no_output",
        }
    }
}

/// A single validation finding
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub code: IssueCode,
    /// Offending node id, when the issue is node-scoped
    pub node: Option<String>,
    pub message: String,
    pub severity: Severity,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.node {
            Some(node) => write!(f, "[{}] node '{}': {}", self.code.as_str(), node, self.message),
            None => write!(f, "[{}] {}", self.code.as_str(), self.message),
        }
    }
}

/// Aggregated validation outcome
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    fn push(&mut self, issue: ValidationIssue) {
        match issue.severity {
            Severity::Error => self.errors.push(issue),
            Severity::Warning => self.warnings.push(issue),
        }
    }

    fn error(&mut self, code: IssueCode, node: Option<&str>, message: impl Into<String>) {
        self.push(ValidationIssue {
            code,
            node: node.map(str::to_string),
            message: message.into(),
            severity: Severity::Error,
        });
    }

    fn warning(&mut self, code: IssueCode, node: Option<&str>, message: impl Into<String>) {
        self.push(ValidationIssue {
            code,
            node: node.map(str::to_string),
            message: message.into(),
            severity: Severity::Warning,
        });
    }

    /// One-line digest of all errors
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Convert errors into a `DAG_INVALID` failure
    pub fn ensure_valid(&self) -> Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(SentraError::DagInvalid {
                details: self.error_summary(),
            })
        }
    }
}

/// Validate a declarative DAG schema
pub fn validate(schema: &DagSchema) -> ValidationResult {
    let mut result = ValidationResult::default();

    if schema.nodes.is_empty() {
        result.error(IssueCode::EmptyDag, None, "DAG contains no nodes");
        return result;
    }

    // structural checks
    let mut seen: FxHashSet<&str> = FxHashSet::default();
    for (i, node) in schema.nodes.iter().enumerate() {
        if node.id.is_empty() {
            result.error(
                IssueCode::MissingId,
                None,
                format!("node at index {} has an empty id", i),
            );
            continue;
        }
        if !seen.insert(&node.id) {
            result.error(
                IssueCode::DuplicateId,
                Some(node.id.as_str()),
                "id appears more than once",
            );
        }
        if node.module.is_empty() {
            result.error(
                IssueCode::MissingModule,
                Some(node.id.as_str()),
                "node has no module reference",
            );
        }
    }

    let ids: FxHashSet<&str> = schema.nodes.iter().map(|n| n.id.as_str()).collect();

    // dependency checks
    for node in &schema.nodes {
        for dep in &node.depends_on {
            if dep == &node.id {
                result.warning(
                    IssueCode::SelfDependency,
                    Some(node.id.as_str()),
                    "node lists itself in depends_on",
                );
            } else if !ids.contains(dep.as_str()) {
                result.error(
                    IssueCode::MissingDependency,
                    Some(node.id.as_str()),
                    format!("depends_on references unknown node '{}'", dep),
                );
            }
        }
    }

    // cycle check (self-dependencies stay warnings, so self-edges are skipped)
    if let Some(stuck) = find_cycle(schema) {
        result.error(
            IssueCode::Cycle,
            None,
            format!("dependency cycle involving nodes: {}", stuck.join(", ")),
        );
    }

    // data-flow checks
    let mut produced_by: FxHashMap<&str, Vec<&str>> = FxHashMap::default();
    for node in &schema.nodes {
        for key in &node.produces {
            produced_by.entry(key.as_str()).or_default().push(&node.id);
        }
    }

    for node in &schema.nodes {
        if node.produces.is_empty() {
            result.warning(IssueCode::NoOutput, Some(node.id.as_str()), "node produces nothing (sink)");
        }

        for key in &node.consumes {
            if is_config_key(key) {
                continue;
            }
            let producers: Vec<&str> = produced_by
                .get(key.as_str())
                .map(|p| p.iter().copied().filter(|id| *id != node.id).collect())
                .unwrap_or_default();

            if producers.is_empty() {
                result.error(
                    IssueCode::DataFlow,
                    Some(node.id.as_str()),
                    format!("consumed key '{}' is produced by no node", key),
                );
                continue;
            }

            let ancestors = transitive_dependencies(schema, &node.id);
            if !producers.iter().any(|p| ancestors.contains(*p)) {
                result.warning(
                    IssueCode::DataFlow,
                    Some(node.id.as_str()),
                    format!(
                        "consumed key '{}' is produced by '{}', which is not a dependency; ordering is not guaranteed",
                        key, producers[0]
                    ),
                );
            }
        }
    }

    result
}

/// Kahn pass over `depends_on`; returns the sorted ids left with positive
/// in-degree when a cycle exists
fn find_cycle(schema: &DagSchema) -> Option<Vec<String>> {
    let ids: FxHashSet<&str> = schema.nodes.iter().map(|n| n.id.as_str()).collect();
    let mut in_degree: FxHashMap<&str, usize> = FxHashMap::default();
    let mut successors: FxHashMap<&str, Vec<&str>> = FxHashMap::default();

    for node in &schema.nodes {
        in_degree.entry(&node.id).or_insert(0);
    }
    for node in &schema.nodes {
        for dep in &node.depends_on {
            if dep == &node.id || !ids.contains(dep.as_str()) {
                continue;
            }
            *in_degree.entry(&node.id).or_insert(0) += 1;
            successors.entry(dep).or_default().push(&node.id);
        }
    }

    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(&id, _)| id)
        .collect();
    let mut removed = 0usize;

    while let Some(id) = queue.pop_front() {
        removed += 1;
        if let Some(next) = successors.get(id) {
            for &succ in next {
                let deg = in_degree.get_mut(succ).expect("successor has in-degree");
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(succ);
                }
            }
        }
    }

    if removed == in_degree.len() {
        None
    } else {
        let mut stuck: Vec<String> = in_degree
            .iter()
            .filter(|(_, &deg)| deg > 0)
            .map(|(&id, _)| id.to_string())
            .collect();
        stuck.sort();
        Some(stuck)
    }
}

/// All ids reachable from `id` by following `depends_on` edges
fn transitive_dependencies<'a>(schema: &'a DagSchema, id: &str) -> FxHashSet<&'a str> {
    let by_id: FxHashMap<&str, &crate::dag::DagNode> =
        schema.nodes.iter().map(|n| (n.id.as_str(), n)).collect();

    let mut visited: FxHashSet<&'a str> = FxHashSet::default();
    let mut queue: VecDeque<&str> = VecDeque::new();
    if let Some(node) = by_id.get(id) {
        for dep in &node.depends_on {
            queue.push_back(dep.as_str());
        }
    }
    while let Some(current) = queue.pop_front() {
        let Some(node) = by_id.get(current) else { continue };
        if !visited.insert(node.id.as_str()) {
            continue;
        }
        for dep in &node.depends_on {
            if !visited.contains(dep.as_str()) {
                queue.push_back(dep.as_str());
            }
        }
    }
    visited
}
