//! In-memory pending-HIL-approval state (spec §4.E, §5): the pending
//! workflow store and the session's running memory of already-granted
//! approvals. Both are process-lifetime only — a restart loses in-flight
//! approval pauses, which is acceptable since the TTL below already treats
//! them as a safety net, not durable state.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::domain::ApprovalType;

const PENDING_WORKFLOW_TTL: Duration = Duration::from_secs(3600);

/// Everything needed to resume a paused client-routed call: which FQDN and
/// arguments it was for, and why it paused. The code and tool definitions
/// are deliberately not stored here — resumption re-fetches the descriptor
/// (cheap, and authoritative since the integrity hash is already pinned).
#[derive(Debug, Clone)]
pub struct PendingWorkflow {
    pub workflow_id: String,
    pub fqdn: String,
    pub args: Value,
    pub approval_type: ApprovalType,
    pub description: String,
    pub context: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct PendingWorkflowStore {
    entries: Arc<RwLock<HashMap<String, PendingWorkflow>>>,
}

impl PendingWorkflowStore {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn insert(&self, workflow: PendingWorkflow) {
        self.sweep_expired().await;
        self.entries.write().await.insert(workflow.workflow_id.clone(), workflow);
    }

    /// Removes and returns the pending workflow, if any. Resumption
    /// consumes it exactly once: a second `continue_workflow` against the
    /// same id finds nothing here and the loader returns a benign
    /// "no pending workflow" status rather than re-running anything
    /// (testable property #5).
    pub async fn take(&self, workflow_id: &str) -> Option<PendingWorkflow> {
        self.entries.write().await.remove(workflow_id)
    }

    async fn sweep_expired(&self) {
        let now = Utc::now();
        self.entries.write().await.retain(|_, w| {
            now.signed_duration_since(w.created_at)
                .to_std()
                .map(|age| age < PENDING_WORKFLOW_TTL)
                .unwrap_or(true)
        });
    }
}

impl Default for PendingWorkflowStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks HIL grants already given during this process's lifetime so a
/// capability that calls the same sub-tool twice, or is itself re-invoked,
/// doesn't pause for the same approval twice.
#[derive(Clone)]
pub struct SessionApprovals {
    approved_tools: Arc<RwLock<HashSet<String>>>,
    installed_dependencies: Arc<RwLock<HashSet<String>>>,
}

impl SessionApprovals {
    pub fn new() -> Self {
        Self {
            approved_tools: Arc::new(RwLock::new(HashSet::new())),
            installed_dependencies: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    pub async fn approve_tool(&self, fqdn: &str) {
        self.approved_tools.write().await.insert(fqdn.to_string());
    }

    pub async fn is_tool_approved(&self, fqdn: &str) -> bool {
        self.approved_tools.read().await.contains(fqdn)
    }

    pub async fn mark_installed(&self, dependency: &str) {
        self.installed_dependencies.write().await.insert(dependency.to_string());
    }

    pub async fn is_dependency_installed(&self, dependency: &str) -> bool {
        self.installed_dependencies.read().await.contains(dependency)
    }
}

impl Default for SessionApprovals {
    fn default() -> Self {
        Self::new()
    }
}
