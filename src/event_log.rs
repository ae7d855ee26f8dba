//! Run event log
//!
//! Append-only audit trail of one orchestrator run:
//! - Event: envelope with id + timestamp + kind
//! - RunEventKind: run-level and node-level variants
//! - EventLog: thread-safe, append-only log
//!
//! Uses `Arc<str>` for node ids to keep event emission cheap on the hot
//! scheduling path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Single event in the run log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    /// Monotonic sequence id (for ordering)
    pub id: u64,
    /// Time since run start (ms)
    pub timestamp_ms: u64,
    pub kind: RunEventKind,
}

/// All possible event types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEventKind {
    // ═══════════════════════════════════════════
    // RUN LEVEL
    // ═══════════════════════════════════════════
    RunStarted {
        node_count: usize,
    },
    RunCompleted {
        total_duration_ms: u64,
    },
    RunFailed {
        error: String,
        failed_node: Option<Arc<str>>,
    },
    RunCanceled,

    // ═══════════════════════════════════════════
    // NODE LEVEL
    // ═══════════════════════════════════════════
    NodeScheduled {
        node_id: Arc<str>,
        dependencies: Vec<Arc<str>>,
    },
    NodeStarted {
        node_id: Arc<str>,
    },
    NodeCompleted {
        node_id: Arc<str>,
        output_count: usize,
        duration_ms: u64,
    },
    NodeFailed {
        node_id: Arc<str>,
        error: String,
        duration_ms: u64,
    },
    /// Node short-circuited because an upstream dependency failed
    NodeSkipped {
        node_id: Arc<str>,
        failed_dependency: Arc<str>,
    },
    OutputPublished {
        node_id: Arc<str>,
        data_key: String,
    },
}

impl RunEventKind {
    /// Extract node_id if event is node-related
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::NodeScheduled { node_id, .. }
            | Self::NodeStarted { node_id }
            | Self::NodeCompleted { node_id, .. }
            | Self::NodeFailed { node_id, .. }
            | Self::NodeSkipped { node_id, .. }
            | Self::OutputPublished { node_id, .. } => Some(node_id),
            Self::RunStarted { .. }
            | Self::RunCompleted { .. }
            | Self::RunFailed { .. }
            | Self::RunCanceled => None,
        }
    }

    pub fn is_run_event(&self) -> bool {
        matches!(
            self,
            Self::RunStarted { .. }
                | Self::RunCompleted { .. }
                | Self::RunFailed { .. }
                | Self::RunCanceled
        )
    }
}

/// Thread-safe, append-only event log
#[derive(Clone)]
pub struct EventLog {
    events: Arc<RwLock<Vec<RunEvent>>>,
    start_time: Instant,
    next_id: Arc<AtomicU64>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    /// Create a new event log (call at run start)
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            start_time: Instant::now(),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Emit an event (thread-safe, returns event id)
    pub fn emit(&self, kind: RunEventKind) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let event = RunEvent {
            id,
            timestamp_ms: self.start_time.elapsed().as_millis() as u64,
            kind,
        };
        self.events.write().push(event);
        id
    }

    /// Get all events (cloned)
    pub fn events(&self) -> Vec<RunEvent> {
        self.events.read().clone()
    }

    /// Filter events by node id
    pub fn filter_node(&self, node_id: &str) -> Vec<RunEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.kind.node_id() == Some(node_id))
            .collect()
    }

    /// Filter run-level events only
    pub fn run_events(&self) -> Vec<RunEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.kind.is_run_event())
            .collect()
    }

    /// Serialize to JSON for export/debugging
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self.events()).unwrap_or(Value::Null)
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}
