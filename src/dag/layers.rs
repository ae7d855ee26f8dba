//! Topological layering
//!
//! Computes the execution order of a DAG as layers: layer k holds every
//! node whose dependencies all live in layers 0..k-1, so the members of one
//! layer are runnable in parallel. Ties inside a layer are broken by a
//! stable sort on id.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::dag::DagSchema;
use crate::error::{Result, SentraError};

/// Compute topological layers, or fail with a cycle error
///
/// Self-dependencies are ignored here (the validator reports them as
/// warnings) and so are edges to unknown ids (reported as errors); layering
/// still answers for the well-formed part of the graph.
pub fn execution_order(schema: &DagSchema) -> Result<Vec<Vec<String>>> {
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

    let mut layers: Vec<Vec<String>> = Vec::new();
    let mut current: Vec<&str> = in_degree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(&id, _)| id)
        .collect();
    let mut placed = 0usize;

    while !current.is_empty() {
        current.sort_unstable();
        placed += current.len();

        let mut next: Vec<&str> = Vec::new();
        for &id in &current {
            if let Some(succ) = successors.get(id) {
                for &s in succ {
                    let deg = in_degree.get_mut(s).expect("successor has in-degree");
                    *deg -= 1;
                    if *deg == 0 {
                        next.push(s);
                    }
                }
            }
        }

        layers.push(current.iter().map(|s| s.to_string()).collect());
        current = next;
    }

    if placed != in_degree.len() {
        let mut stuck: Vec<&str> = in_degree
            .iter()
            .filter(|(_, &deg)| deg > 0)
            .map(|(&id, _)| id)
            .collect();
        stuck.sort_unstable();
        return Err(SentraError::DagInvalid {
            details: format!("dependency cycle involving nodes: {}", stuck.join(", ")),
        });
    }

    Ok(layers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::DagNode;

    fn node(id: &str, deps: &[&str]) -> DagNode {
        DagNode {
            id: id.into(),
            module: "mock".into(),
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn schema_of(nodes: Vec<DagNode>) -> DagSchema {
        DagSchema {
            name: "test".into(),
            nodes,
            ..Default::default()
        }
    }

    #[test]
    fn linear_chain_layers() {
        let layers = execution_order(&schema_of(vec![
            node("c", &["b"]),
            node("a", &[]),
            node("b", &["a"]),
        ]))
        .unwrap();
        assert_eq!(layers, vec![vec!["a"], vec!["b"], vec!["c"]]);
    }

    #[test]
    fn diamond_layers() {
        let layers = execution_order(&schema_of(vec![
            node("root", &[]),
            node("right", &["root"]),
            node("left", &["root"]),
            node("merge", &["left", "right"]),
        ]))
        .unwrap();
        assert_eq!(
            layers,
            vec![vec!["root"], vec!["left", "right"], vec!["merge"]]
        );
    }

    #[test]
    fn layering_respects_every_edge() {
        let schema = schema_of(vec![
            node("a", &[]),
            node("b", &["a"]),
            node("c", &["a"]),
            node("d", &["b", "c"]),
            node("e", &["a", "d"]),
        ]);
        let layers = execution_order(&schema).unwrap();

        let layer_of = |id: &str| {
            layers
                .iter()
                .position(|l| l.iter().any(|n| n == id))
                .unwrap()
        };
        for n in &schema.nodes {
            for dep in &n.depends_on {
                assert!(
                    layer_of(dep) < layer_of(&n.id),
                    "edge {} -> {} violates layering",
                    dep,
                    n.id
                );
            }
        }
    }

    #[test]
    fn ties_break_on_sorted_ids() {
        let layers = execution_order(&schema_of(vec![
            node("zeta", &[]),
            node("alpha", &[]),
            node("mid", &[]),
        ]))
        .unwrap();
        assert_eq!(layers, vec![vec!["alpha", "mid", "zeta"]]);
    }

    #[test]
    fn cycle_is_an_error() {
        let err = execution_order(&schema_of(vec![
            node("a", &["b"]),
            node("b", &["a"]),
            node("solo", &[]),
        ]))
        .unwrap_err();
        assert_eq!(err.code(), "DAG_INVALID");
        let msg = err.to_string();
        assert!(msg.contains("a") && msg.contains("b"));
    }

    #[test]
    fn self_dependency_does_not_deadlock_layering() {
        let layers = execution_order(&schema_of(vec![node("a", &["a"])])).unwrap();
        assert_eq!(layers, vec![vec!["a"]]);
    }
}
