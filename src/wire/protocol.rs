//! `tools/call` dispatch shared by the stdio and HTTP transports (spec §6):
//! extracts `continue_workflow` from the call arguments, routes to the
//! loader, and renders whichever of the three response shapes applies.

use serde_json::Value;

use crate::loader::{ContinueWorkflow, Loader};
use crate::sandbox::ExecutionOutcome;

/// A tool advertised in `tools/list`.
#[derive(Debug, Clone)]
pub struct ExposedTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// `{status:"success", result, executed_locally:true}` /
/// `{status:"error", error, executed_locally:true}` /
/// `{status:"approval_required", ...}` (spec §6).
pub async fn dispatch_tool_call(loader: &Loader, name: &str, mut arguments: Value) -> Value {
    let continuation = arguments
        .as_object_mut()
        .and_then(|obj| obj.remove("continue_workflow"));

    let outcome = if let Some(continuation) = continuation {
        match parse_continue_workflow(continuation) {
            Ok(continuation) => loader.continue_workflow(continuation).await,
            Err(message) => {
                return serde_json::json!({
                    "status": "error",
                    "error": {"code": "BAD_REQUEST", "message": message},
                    "executed_locally": true,
                });
            }
        }
    } else {
        loader.call(name, arguments).await
    };

    match outcome {
        Ok(loaded) => match loaded.outcome {
            ExecutionOutcome::Success { value } => serde_json::json!({
                "status": "success",
                "result": value,
                "executed_locally": true,
            }),
            ExecutionOutcome::Failure { error } => serde_json::json!({
                "status": "error",
                "error": {"code": error.code, "message": error.message},
                "executed_locally": true,
            }),
        },
        Err(err) => err.to_wire_json(),
    }
}

fn parse_continue_workflow(raw: Value) -> Result<ContinueWorkflow, String> {
    let workflow_id = raw
        .get("workflow_id")
        .and_then(Value::as_str)
        .ok_or_else(|| "continue_workflow.workflow_id is required".to_string())?
        .to_string();
    let approved = raw
        .get("approved")
        .and_then(Value::as_bool)
        .ok_or_else(|| "continue_workflow.approved is required".to_string())?;
    Ok(ContinueWorkflow {
        workflow_id,
        approved,
    })
}
