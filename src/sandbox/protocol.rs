//! Message kinds exchanged between a sandbox worker and its parent.
//! `Init` is conveyed as the worker thread's spawn arguments rather than a
//! channel message since the worker has no life before it.

use serde::{Deserialize, Serialize};

pub type CallId = u64;

/// worker -> parent.
#[derive(Debug, Clone)]
pub enum WorkerToParent {
    RpcCall {
        call_id: CallId,
        server: String,
        tool: String,
        args: serde_json::Value,
    },
    ToolStart {
        tool: String,
        trace_id: uuid::Uuid,
        ts: chrono::DateTime<chrono::Utc>,
    },
    ToolEnd {
        tool: String,
        trace_id: uuid::Uuid,
        ts: chrono::DateTime<chrono::Utc>,
        success: bool,
        duration_ms: u64,
        error: Option<String>,
    },
    ExecutionComplete(ExecutionOutcome),
}

/// parent -> worker.
#[derive(Debug, Clone)]
pub enum ParentToWorker {
    RpcResult {
        call_id: CallId,
        success: bool,
        value: Option<serde_json::Value>,
        error: Option<serde_json::Value>,
    },
}

/// The tagged union returned by `execute()`. Reshaped into the wire
/// `{status, ...}` envelope by the caller; this internal form keeps
/// `success`/`error` as plain Rust variants rather than mirroring the wire
/// JSON directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExecutionOutcome {
    Success { value: serde_json::Value },
    Failure { error: ExecutionError },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionError {
    pub code: String,
    pub message: String,
}

impl ExecutionOutcome {
    pub fn ok(value: serde_json::Value) -> Self {
        Self::Success { value }
    }

    pub fn err(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failure {
            error: ExecutionError {
                code: code.into(),
                message: message.into(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// One tool invocation recorded by the worker for the bridge's trace
/// accumulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool: String,
    pub args: serde_json::Value,
    pub result: serde_json::Value,
    pub success: bool,
    pub duration_ms: u64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// A tool the worker is allowed to call, known up front so the host object
/// can be generated without a JS `Proxy`: we enumerate tool definitions at
/// execution start and install concrete method stubs instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub server: String,
    pub tool: String,
}
