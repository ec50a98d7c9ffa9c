//! Worker Bridge: spawns sandbox workers, serves their RPC requests
//! against the MCP client registry, and records trace events. Concurrent
//! executions are isolated from one another — each call to [`Bridge::run`]
//! owns its own channel pair and tool-invocation log, so there is no
//! cross-talk between simultaneously running workers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{Decision, ExecutionTrace, TaskResult};
use crate::error::PmlResult;
use crate::mcp::McpStdioManager;
use crate::sandbox::{self, ExecutionOutcome, RpcCaller, ToolDefinition};

/// Adapts the MCP Stdio Manager to the sandbox's RPC contract. A tool call
/// whose target server isn't registered surfaces as an ordinary RPC error
/// the worker script may catch — not a bridge-level failure.
pub struct McpRpcCaller {
    manager: Arc<McpStdioManager>,
}

impl McpRpcCaller {
    pub fn new(manager: Arc<McpStdioManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl RpcCaller for McpRpcCaller {
    async fn call(
        &self,
        server: &str,
        tool: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, serde_json::Value> {
        self.manager
            .call_tool(server, tool, args)
            .await
            .map_err(|e| serde_json::json!({ "code": e.code(), "message": e.to_string() }))
    }
}

pub struct RunOutcome {
    pub outcome: ExecutionOutcome,
    pub trace: ExecutionTrace,
}

pub struct Bridge {
    rpc: Arc<dyn RpcCaller>,
    execution_timeout: Duration,
    rpc_timeout: Duration,
}

impl Bridge {
    pub fn new(manager: Arc<McpStdioManager>, execution_timeout: Duration, rpc_timeout: Duration) -> Self {
        Self {
            rpc: Arc::new(McpRpcCaller::new(manager)),
            execution_timeout,
            rpc_timeout,
        }
    }

    /// Constructs a bridge around a caller other than the default MCP
    /// client registry — used by the capability loader to inject a gating
    /// [`RpcCaller`] that can pause sub-tool calls for HIL approval.
    pub fn with_caller(rpc: Arc<dyn RpcCaller>, execution_timeout: Duration, rpc_timeout: Duration) -> Self {
        Self {
            rpc,
            execution_timeout,
            rpc_timeout,
        }
    }

    /// Executes `code` in a fresh worker, accumulating a complete
    /// [`ExecutionTrace`] whose `parent_trace_id` is `parent`'s id (or a
    /// freshly minted root if `parent` is `None`).
    pub async fn run(
        &self,
        code: String,
        args: serde_json::Value,
        context: serde_json::Value,
        tool_definitions: Vec<ToolDefinition>,
        capability_id: Option<String>,
        parent: Option<&ExecutionTrace>,
    ) -> PmlResult<RunOutcome> {
        let mut trace = match parent {
            Some(p) => ExecutionTrace::new_child(p, capability_id),
            None => ExecutionTrace::new_root(capability_id),
        };

        let started = std::time::Instant::now();
        let result = sandbox::execute(
            code,
            args,
            context,
            tool_definitions,
            self.rpc.clone(),
            self.execution_timeout,
            self.rpc_timeout,
            trace.trace_id,
        )
        .await;

        trace.duration_ms = started.elapsed().as_millis() as u64;

        let execution = match result {
            Ok(exec) => exec,
            Err(e) => {
                trace.success = false;
                trace.task_results.push(TaskResult {
                    tool: "<worker>".to_string(),
                    args: serde_json::Value::Null,
                    result: serde_json::json!({"error": e.to_string()}),
                    success: false,
                    duration_ms: trace.duration_ms,
                    timestamp: chrono::Utc::now(),
                });
                return Err(e);
            }
        };

        trace.success = execution.outcome.is_success();
        trace.task_results = execution
            .tool_invocations
            .iter()
            .map(|inv| TaskResult {
                tool: inv.tool.clone(),
                args: inv.args.clone(),
                result: inv.result.clone(),
                success: inv.success,
                duration_ms: inv.duration_ms,
                timestamp: inv.timestamp,
            })
            .collect();
        trace.decisions = vec![Decision {
            candidate_id: trace.capability_id.clone().unwrap_or_default(),
            score: 1.0,
            accepted: trace.success,
        }];

        Ok(RunOutcome {
            outcome: execution.outcome,
            trace,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingCaller(AtomicU32);

    #[async_trait]
    impl RpcCaller for CountingCaller {
        async fn call(
            &self,
            _server: &str,
            _tool: &str,
            args: serde_json::Value,
        ) -> Result<serde_json::Value, serde_json::Value> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(args)
        }
    }

    #[tokio::test]
    async fn records_a_trace_with_no_sub_tool_calls() {
        let bridge = Bridge::with_caller(
            Arc::new(CountingCaller(AtomicU32::new(0))),
            Duration::from_secs(5),
            Duration::from_secs(2),
        );
        let outcome = bridge
            .run(
                "return JSON.parse(args.input);".to_string(),
                serde_json::json!({"input": "{\"a\":1}"}),
                serde_json::json!({}),
                vec![],
                Some("pml.mcp.json.parse".to_string()),
                None,
            )
            .await
            .unwrap();

        assert!(outcome.trace.success);
        assert!(outcome.trace.task_results.is_empty());
        assert_eq!(outcome.trace.parent_trace_id, None);
    }

    #[tokio::test]
    async fn child_trace_links_to_parent() {
        let bridge = Bridge::with_caller(
            Arc::new(CountingCaller(AtomicU32::new(0))),
            Duration::from_secs(5),
            Duration::from_secs(2),
        );
        let root = bridge
            .run(
                "return 1;".to_string(),
                serde_json::json!({}),
                serde_json::json!({}),
                vec![],
                None,
                None,
            )
            .await
            .unwrap();

        let child = bridge
            .run(
                "return 2;".to_string(),
                serde_json::json!({}),
                serde_json::json!({}),
                vec![],
                None,
                Some(&root.trace),
            )
            .await
            .unwrap();

        assert_eq!(child.trace.parent_trace_id, Some(root.trace.trace_id));
    }
}
