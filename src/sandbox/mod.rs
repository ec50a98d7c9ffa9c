//! Sandbox Worker: evaluates a self-contained code string with no host
//! capabilities beyond a generated `mcp.<server>.<tool>(args)` surface that
//! proxies back through RPC. Runs on a dedicated blocking thread because
//! the embedded engine's context is not `Send`.

mod engine;
mod protocol;

pub use protocol::{ExecutionError, ExecutionOutcome, ToolDefinition, ToolInvocation};

use std::sync::mpsc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc as tokio_mpsc;
use tokio::time::timeout;

use crate::error::{PmlError, PmlResult};
use engine::WorkerInput;
use protocol::{ParentToWorker, WorkerToParent};

/// Dispatches one `mcp.<server>.<tool>(args)` call out to the real MCP
/// client registry. Implemented by the Worker Bridge.
#[async_trait]
pub trait RpcCaller: Send + Sync {
    async fn call(
        &self,
        server: &str,
        tool: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, serde_json::Value>;
}

pub struct SandboxExecution {
    pub outcome: ExecutionOutcome,
    pub tool_invocations: Vec<ToolInvocation>,
}

/// `execute(code, args, context, toolDefinitions, rpc, execution_timeout,
/// rpc_timeout) -> Result`. Spawns the worker on a blocking thread and
/// pumps RPC calls through an async dispatcher until the worker finishes or
/// the execution timeout trips.
pub async fn execute(
    code: String,
    args: serde_json::Value,
    context: serde_json::Value,
    tool_definitions: Vec<ToolDefinition>,
    rpc: std::sync::Arc<dyn RpcCaller>,
    execution_timeout: Duration,
    rpc_timeout: Duration,
    trace_id: uuid::Uuid,
) -> PmlResult<SandboxExecution> {
    let (tx_out, mut rx_out) = tokio_mpsc::unbounded_channel::<WorkerToParent>();
    let (tx_in, rx_in) = mpsc::channel::<ParentToWorker>();

    let worker_input = WorkerInput {
        code,
        args,
        context,
        tool_definitions,
        rpc_timeout,
        trace_id,
    };

    let (std_tx_out, std_rx_out) = mpsc::channel::<WorkerToParent>();
    // Bridge the worker's std sender into the async channel so the pump
    // loop below can `.await` on it; a tiny forwarding thread is cheaper
    // than making the worker generic over sender type.
    std::thread::spawn(move || {
        while let Ok(msg) = std_rx_out.recv() {
            if tx_out.send(msg).is_err() {
                break;
            }
        }
    });

    let join = tokio::task::spawn_blocking(move || engine::run(worker_input, std_tx_out, rx_in));

    let pump = async move {
        let mut invocations = Vec::new();
        loop {
            match rx_out.recv().await {
                Some(WorkerToParent::RpcCall {
                    call_id,
                    server,
                    tool,
                    args,
                }) => {
                    let started = Instant::now();
                    let result = timeout(rpc_timeout, rpc.call(&server, &tool, args.clone())).await;
                    let (success, value, error) = match result {
                        Ok(Ok(v)) => (true, Some(v), None),
                        Ok(Err(e)) => (false, None, Some(e)),
                        Err(_) => (
                            false,
                            None,
                            Some(serde_json::json!({"code": "RPC_TIMEOUT", "message": "rpc call timed out"})),
                        ),
                    };
                    invocations.push(ToolInvocation {
                        tool: format!("{server}:{tool}"),
                        args,
                        result: value.clone().unwrap_or(serde_json::Value::Null),
                        success,
                        duration_ms: started.elapsed().as_millis() as u64,
                        timestamp: chrono::Utc::now(),
                    });
                    if tx_in
                        .send(ParentToWorker::RpcResult {
                            call_id,
                            success,
                            value,
                            error,
                        })
                        .is_err()
                    {
                        break;
                    }
                }
                Some(WorkerToParent::ToolStart { tool, trace_id, ts }) => {
                    tracing::debug!(%trace_id, tool, %ts, "sub-tool call started");
                }
                Some(WorkerToParent::ToolEnd {
                    tool,
                    trace_id,
                    success,
                    duration_ms,
                    error,
                    ..
                }) => {
                    tracing::debug!(%trace_id, tool, success, duration_ms, error = ?error, "sub-tool call finished");
                }
                Some(WorkerToParent::ExecutionComplete(_)) | None => break,
            }
        }
        invocations
    };

    let bounded = async move {
        let invocations = pump.await;
        let outcome = join.await;
        (outcome, invocations)
    };

    match timeout(execution_timeout, bounded).await {
        Ok((Ok(outcome), invocations)) => Ok(SandboxExecution {
            outcome,
            tool_invocations: invocations,
        }),
        Ok((Err(join_err), _)) => Err(PmlError::execution(
            "EXECUTION_ERROR",
            format!("worker thread panicked: {join_err}"),
        )),
        Err(_) => Err(PmlError::execution(
            "EXECUTION_TIMEOUT",
            "execution exceeded the configured timeout",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct EchoCaller;

    #[async_trait]
    impl RpcCaller for EchoCaller {
        async fn call(
            &self,
            _server: &str,
            _tool: &str,
            args: serde_json::Value,
        ) -> Result<serde_json::Value, serde_json::Value> {
            Ok(args)
        }
    }

    #[tokio::test]
    async fn runs_plain_arithmetic_with_no_tool_calls() {
        let result = execute(
            "return args.a + args.b;".to_string(),
            serde_json::json!({"a": 1, "b": 2}),
            serde_json::json!({}),
            vec![],
            Arc::new(EchoCaller),
            Duration::from_secs(5),
            Duration::from_secs(2),
            uuid::Uuid::now_v7(),
        )
        .await
        .unwrap();

        assert!(result.outcome.is_success());
        assert!(result.tool_invocations.is_empty());
    }

    #[tokio::test]
    async fn proxies_a_tool_call_through_the_generated_surface() {
        let result = execute(
            "return await mcp.echo.ping(args);".to_string(),
            serde_json::json!({"hello": "world"}),
            serde_json::json!({}),
            vec![ToolDefinition {
                server: "echo".to_string(),
                tool: "ping".to_string(),
            }],
            Arc::new(EchoCaller),
            Duration::from_secs(5),
            Duration::from_secs(2),
            uuid::Uuid::now_v7(),
        )
        .await
        .unwrap();

        assert!(result.outcome.is_success());
        assert_eq!(result.tool_invocations.len(), 1);
    }

    #[tokio::test]
    async fn syntax_error_is_classified_as_parse_error() {
        let result = execute(
            "this is not valid js (".to_string(),
            serde_json::json!({}),
            serde_json::json!({}),
            vec![],
            Arc::new(EchoCaller),
            Duration::from_secs(5),
            Duration::from_secs(2),
            uuid::Uuid::now_v7(),
        )
        .await
        .unwrap();

        match result.outcome {
            ExecutionOutcome::Failure { error } => assert_eq!(error.code, "PARSE_ERROR"),
            ExecutionOutcome::Success { .. } => panic!("expected a parse error"),
        }
    }

    #[tokio::test]
    async fn a_thrown_error_inside_the_async_body_is_an_execution_error() {
        let result = execute(
            "throw new Error('boom');".to_string(),
            serde_json::json!({}),
            serde_json::json!({}),
            vec![],
            Arc::new(EchoCaller),
            Duration::from_secs(5),
            Duration::from_secs(2),
            uuid::Uuid::now_v7(),
        )
        .await
        .unwrap();

        match result.outcome {
            ExecutionOutcome::Failure { error } => assert_eq!(error.code, "EXECUTION_ERROR"),
            ExecutionOutcome::Success { .. } => panic!("expected an execution error"),
        }
    }

    #[tokio::test]
    async fn a_circular_return_value_is_tagged_instead_of_throwing() {
        let result = execute(
            "var o = {}; o.self = o; return o;".to_string(),
            serde_json::json!({}),
            serde_json::json!({}),
            vec![],
            Arc::new(EchoCaller),
            Duration::from_secs(5),
            Duration::from_secs(2),
            uuid::Uuid::now_v7(),
        )
        .await
        .unwrap();

        match result.outcome {
            ExecutionOutcome::Success { value } => assert_eq!(value["self"], "[Circular]"),
            ExecutionOutcome::Failure { error } => panic!("expected success, got {error:?}"),
        }
    }
}
