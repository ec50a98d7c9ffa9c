use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One execution of a tool call, recorded inside an [`ExecutionTrace`]
/// (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub tool: String,
    pub args: serde_json::Value,
    pub result: serde_json::Value,
    pub success: bool,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Scoring audit entry: which candidate SHGAT considered and whether it was
/// accepted (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub candidate_id: String,
    pub score: f32,
    pub accepted: bool,
}

/// Record of one procedure execution (spec §3). If `parent_trace_id` is
/// set, the parent must be flushed no later than the child (testable
/// property #2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionTrace {
    pub trace_id: Uuid,
    pub parent_trace_id: Option<Uuid>,
    pub capability_id: Option<String>,
    /// Unified with `trace_id` for fresh roots.
    pub workflow_id: Option<Uuid>,
    pub success: bool,
    pub duration_ms: u64,
    pub task_results: Vec<TaskResult>,
    pub decisions: Vec<Decision>,
    pub timestamp: DateTime<Utc>,
    pub executed_path: Vec<String>,
    pub priority: f32,
}

impl ExecutionTrace {
    /// New root trace: `trace_id` and `workflow_id` are the same id.
    pub fn new_root(capability_id: Option<String>) -> Self {
        let id = Uuid::now_v7();
        Self {
            trace_id: id,
            parent_trace_id: None,
            capability_id,
            workflow_id: Some(id),
            success: false,
            duration_ms: 0,
            task_results: Vec::new(),
            decisions: Vec::new(),
            timestamp: Utc::now(),
            executed_path: Vec::new(),
            priority: 0.5,
        }
    }

    pub fn new_child(parent: &ExecutionTrace, capability_id: Option<String>) -> Self {
        Self {
            trace_id: Uuid::now_v7(),
            parent_trace_id: Some(parent.trace_id),
            capability_id,
            workflow_id: parent.workflow_id,
            success: false,
            duration_ms: 0,
            task_results: Vec::new(),
            decisions: Vec::new(),
            timestamp: Utc::now(),
            executed_path: Vec::new(),
            priority: 0.5,
        }
    }
}

/// Derived from a finalized trace, used to train SHGAT (spec §3, §4.G.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingExample {
    pub intent_embedding: Vec<f32>,
    pub candidate_id: String,
    pub negative_cap_ids: Vec<String>,
    /// Negatives ordered by descending similarity to the positive, for
    /// curriculum partitioning.
    pub all_negatives_sorted: Vec<String>,
    pub outcome: bool,
    pub context_tools: Vec<String>,
}
