//! DAG orchestrator
//!
//! Executes a concrete scan DAG: resolves inter-module dependencies, runs
//! independent nodes in parallel (one tokio task per node), streams typed
//! outputs through the shared data context and enforces the
//! failure-propagation rules.
//!
//! The scheduler loop is single-threaded; node tasks communicate back
//! through a `JoinSet`. Shared state (context, event log) is internally
//! synchronized, per-node bookkeeping is only touched by the scheduler.
//!
//! Failure policy:
//! - a fatal `execute` error (or panic) fails the node and every transitive
//!   dependent without running them
//! - output-level errors are logged, never fatal
//! - after the first fatal error no NEW node is launched; running nodes are
//!   awaited
//! - cancellation propagates to per-node child tokens; the run returns
//!   `CANCELED` once running nodes have wound down

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::contract::{
    ConfigMap, ModuleInputs, ModuleOutput, OutputSink, SharedModule, OUTPUT_CHANNEL_CAPACITY,
};
use crate::context::DataContext;
use crate::dag::DagSchema;
use crate::error::{Result, SentraError};
use crate::event_log::{EventLog, RunEventKind};
use crate::registry::ModuleRegistry;

/// Final context snapshot returned by a run
pub type RunSnapshot = FxHashMap<String, Value>;

/// Lifecycle state of a runtime node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Idle,
    Pending,
    Running,
    Completed,
    Failed,
}

impl NodeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeStatus::Completed | NodeStatus::Failed)
    }
}

/// Execution-time wrapper around one module instance
pub struct RuntimeNode {
    pub id: Arc<str>,
    pub module_name: String,
    module: SharedModule,
    pub config: ConfigMap,
    consumes: Vec<String>,
    produces: Vec<String>,
    pub status: NodeStatus,
    /// Last output per data key, for downstream input assembly
    pub outputs: FxHashMap<String, ModuleOutput>,
    pub started_at: Option<Instant>,
    pub finished_at: Option<Instant>,
    pub error: Option<String>,
}

impl RuntimeNode {
    pub fn produces(&self) -> &[String] {
        &self.produces
    }

    pub fn consumes(&self) -> &[String] {
        &self.consumes
    }
}

/// What a node task reports back to the scheduler
struct NodeRun {
    idx: usize,
    result: Result<()>,
    outputs: FxHashMap<String, ModuleOutput>,
}

/// Executes one validated DAG
pub struct Orchestrator {
    name: String,
    nodes: Vec<RuntimeNode>,
    index: FxHashMap<String, usize>,
    deps: Vec<Vec<usize>>,
    dependents: Vec<Vec<usize>>,
    context: DataContext,
    event_log: EventLog,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("name", &self.name)
            .field("index", &self.index)
            .finish()
    }
}

impl Orchestrator {
    /// Build the runtime graph for a schema, instantiating one module per
    /// node through the registry
    pub fn new(schema: &DagSchema, registry: &ModuleRegistry) -> Result<Self> {
        if schema.nodes.is_empty() {
            return Err(SentraError::DagInvalid {
                details: "DAG contains no nodes".to_string(),
            });
        }

        let mut nodes: Vec<RuntimeNode> = Vec::with_capacity(schema.nodes.len());
        let mut index: FxHashMap<String, usize> = FxHashMap::default();

        for decl in &schema.nodes {
            let module: SharedModule =
                Arc::from(registry.instantiate(&decl.id, &decl.module, &decl.config)?);
            let meta = module.metadata();

            // declared keys win; module metadata fills the gaps
            let consumes = if decl.consumes.is_empty() {
                meta.consumes.iter().map(|c| c.key.clone()).collect()
            } else {
                decl.consumes.clone()
            };
            let produces = if decl.produces.is_empty() {
                meta.produces.iter().map(|c| c.key.clone()).collect()
            } else {
                decl.produces.clone()
            };

            index.insert(decl.id.clone(), nodes.len());
            nodes.push(RuntimeNode {
                id: Arc::from(decl.id.as_str()),
                module_name: decl.module.clone(),
                module,
                config: decl.config.clone(),
                consumes,
                produces,
                status: NodeStatus::Idle,
                outputs: FxHashMap::default(),
                started_at: None,
                finished_at: None,
                error: None,
            });
        }

        // later registrant wins on duplicate producers
        let mut produces_map: FxHashMap<&str, usize> = FxHashMap::default();
        for (i, node) in nodes.iter().enumerate() {
            for key in &node.produces {
                if let Some(prev) = produces_map.insert(key, i) {
                    warn!(
                        component = "orchestrator",
                        key = %key,
                        previous = %nodes[prev].id,
                        node = %node.id,
                        "key produced by multiple nodes; using later producer"
                    );
                }
            }
        }

        // edges: data flow (consumes -> producer) plus declared depends_on
        let mut deps: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
        let add_edge = |deps: &mut Vec<Vec<usize>>,
                            dependents: &mut Vec<Vec<usize>>,
                            from: usize,
                            to: usize| {
            if from != to && !deps[to].contains(&from) {
                deps[to].push(from);
                dependents[from].push(to);
            }
        };
        for (i, node) in nodes.iter().enumerate() {
            for key in &node.consumes {
                if let Some(&producer) = produces_map.get(key.as_str()) {
                    add_edge(&mut deps, &mut dependents, producer, i);
                } else {
                    // external input, expected in the context at run time
                    debug!(
                        component = "orchestrator",
                        node = %node.id,
                        key = %key,
                        "consumed key has no in-DAG producer"
                    );
                }
            }
        }
        for (i, decl) in schema.nodes.iter().enumerate() {
            for dep in &decl.depends_on {
                if let Some(&d) = index.get(dep) {
                    add_edge(&mut deps, &mut dependents, d, i);
                }
            }
        }

        Ok(Self {
            name: schema.name.clone(),
            nodes,
            index,
            deps,
            dependents,
            context: DataContext::new(),
            event_log: EventLog::new(),
        })
    }

    /// Orchestrator over the process-wide registry
    pub fn from_global(schema: &DagSchema) -> Result<Self> {
        Self::new(schema, ModuleRegistry::global())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nodes(&self) -> &[RuntimeNode] {
        &self.nodes
    }

    pub fn node(&self, id: &str) -> Option<&RuntimeNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn node_status(&self, id: &str) -> Option<NodeStatus> {
        self.node(id).map(|n| n.status)
    }

    /// Ids of the nodes `id` waits on
    pub fn dependencies_of(&self, id: &str) -> Vec<&str> {
        self.index
            .get(id)
            .map(|&i| {
                self.deps[i]
                    .iter()
                    .map(|&d| self.nodes[d].id.as_ref())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Ids of the nodes waiting on `id`
    pub fn dependents_of(&self, id: &str) -> Vec<&str> {
        self.index
            .get(id)
            .map(|&i| {
                self.dependents[i]
                    .iter()
                    .map(|&d| self.nodes[d].id.as_ref())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn context(&self) -> &DataContext {
        &self.context
    }

    pub fn event_log(&self) -> &EventLog {
        &self.event_log
    }

    /// Execute the DAG
    ///
    /// Seeds `initial_inputs` (at minimum `config.targets`), then schedules
    /// until every node is terminal, the token is canceled or a fatal error
    /// occurred. Returns the context snapshot on success.
    pub async fn run(
        &mut self,
        cancel: CancellationToken,
        initial_inputs: ModuleInputs,
    ) -> Result<RunSnapshot> {
        let run_start = Instant::now();
        for (key, value) in initial_inputs {
            self.context.seed(key, value);
        }
        self.event_log.emit(RunEventKind::RunStarted {
            node_count: self.nodes.len(),
        });

        let mut join_set: JoinSet<NodeRun> = JoinSet::new();
        let mut fatal: Option<SentraError> = None;
        let mut canceled = false;

        loop {
            self.propagate_dependency_failures();

            if fatal.is_none() && !canceled {
                let launchable: Vec<usize> = (0..self.nodes.len())
                    .filter(|&i| {
                        self.nodes[i].status == NodeStatus::Idle
                            && self.deps[i]
                                .iter()
                                .all(|&d| self.nodes[d].status == NodeStatus::Completed)
                    })
                    .collect();
                for i in launchable {
                    self.launch(i, &cancel, &mut join_set);
                }
            }

            if self.all_terminal() {
                break;
            }
            if join_set.is_empty() {
                if canceled || fatal.is_some() {
                    break;
                }
                fatal = Some(SentraError::DagInvalid {
                    details: "dependency deadlock: no runnable nodes but run incomplete"
                        .to_string(),
                });
                break;
            }

            tokio::select! {
                _ = cancel.cancelled(), if !canceled => {
                    canceled = true;
                }
                Some(joined) = join_set.join_next() => {
                    match joined {
                        Ok(run) => {
                            if let Some(err) = self.finish_node(run) {
                                if fatal.is_none() && !canceled {
                                    fatal = Some(err);
                                }
                            }
                        }
                        Err(join_err) => {
                            if fatal.is_none() {
                                fatal = Some(SentraError::NodeFailed {
                                    node: "<scheduler>".to_string(),
                                    details: format!("node task join error: {}", join_err),
                                });
                            }
                        }
                    }
                }
            }
        }

        // running nodes always get to finish
        while let Some(joined) = join_set.join_next().await {
            if let Ok(run) = joined {
                if let Some(err) = self.finish_node(run) {
                    if fatal.is_none() && !canceled {
                        fatal = Some(err);
                    }
                }
            }
        }

        if canceled {
            self.event_log.emit(RunEventKind::RunCanceled);
            return Err(SentraError::Canceled);
        }
        if let Some(err) = fatal {
            let failed_node = self
                .nodes
                .iter()
                .find(|n| n.status == NodeStatus::Failed)
                .map(|n| Arc::clone(&n.id));
            self.event_log.emit(RunEventKind::RunFailed {
                error: err.to_string(),
                failed_node,
            });
            return Err(err);
        }

        self.event_log.emit(RunEventKind::RunCompleted {
            total_duration_ms: run_start.elapsed().as_millis() as u64,
        });
        Ok(self.context.snapshot())
    }

    fn all_terminal(&self) -> bool {
        self.nodes.iter().all(|n| n.status.is_terminal())
    }

    /// Fail every idle node whose dependency failed, to a fixed point
    fn propagate_dependency_failures(&mut self) {
        loop {
            let mut changed = false;
            for i in 0..self.nodes.len() {
                if self.nodes[i].status != NodeStatus::Idle {
                    continue;
                }
                let failed_dep = self.deps[i]
                    .iter()
                    .find(|&&d| self.nodes[d].status == NodeStatus::Failed)
                    .copied();
                if let Some(d) = failed_dep {
                    let dep_id = Arc::clone(&self.nodes[d].id);
                    let node = &mut self.nodes[i];
                    node.status = NodeStatus::Failed;
                    node.error = Some(format!("dependency '{}' failed", dep_id));
                    self.event_log.emit(RunEventKind::NodeSkipped {
                        node_id: Arc::clone(&node.id),
                        failed_dependency: dep_id,
                    });
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
    }

    /// Assemble inputs: a dependency's emitted value wins, the context is
    /// the fallback
    fn collect_inputs(&self, idx: usize) -> ModuleInputs {
        let mut inputs = ModuleInputs::default();
        for key in &self.nodes[idx].consumes {
            let from_dep = self.deps[idx]
                .iter()
                .find_map(|&d| self.nodes[d].outputs.get(key).map(|o| o.data.clone()));
            match from_dep.or_else(|| self.context.get(key)) {
                Some(value) => {
                    inputs.insert(key.clone(), value);
                }
                None => {
                    debug!(
                        component = "orchestrator",
                        node = %self.nodes[idx].id,
                        key = %key,
                        "consumed key not available at launch"
                    );
                }
            }
        }
        inputs
    }

    fn launch(&mut self, idx: usize, cancel: &CancellationToken, join_set: &mut JoinSet<NodeRun>) {
        let inputs = self.collect_inputs(idx);
        let dependencies: Vec<Arc<str>> = self.deps[idx]
            .iter()
            .map(|&d| Arc::clone(&self.nodes[d].id))
            .collect();

        let node = &mut self.nodes[idx];
        node.status = NodeStatus::Pending;
        self.event_log.emit(RunEventKind::NodeScheduled {
            node_id: Arc::clone(&node.id),
            dependencies,
        });

        node.status = NodeStatus::Running;
        node.started_at = Some(Instant::now());
        self.event_log.emit(RunEventKind::NodeStarted {
            node_id: Arc::clone(&node.id),
        });

        let node_id = Arc::clone(&node.id);
        let module = Arc::clone(&node.module);
        let child_cancel = cancel.child_token();
        let context = self.context.clone();
        let event_log = self.event_log.clone();

        join_set.spawn(async move {
            let (tx, mut rx) = mpsc::channel::<ModuleOutput>(OUTPUT_CHANNEL_CAPACITY);
            let sink = OutputSink::new(tx);

            // publish outputs as they stream, concurrently with execution
            let drain_id = Arc::clone(&node_id);
            let drain = tokio::spawn(async move {
                let mut collected: FxHashMap<String, ModuleOutput> = FxHashMap::default();
                while let Some(output) = rx.recv().await {
                    if let Some(err) = &output.error {
                        warn!(
                            component = "orchestrator",
                            node = %drain_id,
                            key = %output.data_key,
                            error = %err,
                            "output carries a non-fatal error"
                        );
                    }
                    context.append_unchecked(&output.data_key, output.data.clone());
                    event_log.emit(RunEventKind::OutputPublished {
                        node_id: Arc::clone(&drain_id),
                        data_key: output.data_key.clone(),
                    });
                    collected.insert(output.data_key.clone(), output);
                }
                collected
            });

            // panic guard: a panicking module fails its node, nothing else
            let exec_node = Arc::clone(&node_id);
            let exec =
                tokio::spawn(async move { module.execute(child_cancel, &inputs, sink).await });
            let result = match exec.await {
                Ok(result) => result,
                Err(join_err) if join_err.is_panic() => {
                    let payload = join_err.into_panic();
                    let message = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic payload".to_string());
                    Err(SentraError::NodePanic {
                        node: exec_node.to_string(),
                        message,
                    })
                }
                Err(_) => Err(SentraError::Canceled),
            };

            // execute has returned; the sink is closed, wait for the drain
            let outputs = drain.await.unwrap_or_default();
            NodeRun {
                idx,
                result,
                outputs,
            }
        });
    }

    /// Record a node task's outcome; returns the annotated fatal error, if
    /// any
    fn finish_node(&mut self, run: NodeRun) -> Option<SentraError> {
        let NodeRun {
            idx,
            result,
            outputs,
        } = run;
        let node = &mut self.nodes[idx];
        node.finished_at = Some(Instant::now());
        let duration_ms = node
            .started_at
            .map(|s| s.elapsed().as_millis() as u64)
            .unwrap_or(0);
        node.outputs = outputs;

        match result {
            Ok(()) => {
                node.status = NodeStatus::Completed;
                self.event_log.emit(RunEventKind::NodeCompleted {
                    node_id: Arc::clone(&node.id),
                    output_count: node.outputs.len(),
                    duration_ms,
                });
                None
            }
            Err(err) => {
                node.status = NodeStatus::Failed;
                node.error = Some(err.to_string());
                self.event_log.emit(RunEventKind::NodeFailed {
                    node_id: Arc::clone(&node.id),
                    error: err.to_string(),
                    duration_ms,
                });
                let annotated = match err {
                    SentraError::NodePanic { .. }
                    | SentraError::NodeFailed { .. }
                    | SentraError::Canceled => err,
                    other => SentraError::NodeFailed {
                        node: node.id.to_string(),
                        details: other.to_string(),
                    },
                };
                Some(annotated)
            }
        }
    }
}
