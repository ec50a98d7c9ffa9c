//! Capability Loader (spec §4.E): the central orchestrator that turns a
//! bare FQDN and argument bag into a routed, gated, traced execution. This
//! is the piece every other surface (wire protocol, CLI) calls into.

mod workflow;

pub use workflow::{PendingWorkflow, PendingWorkflowStore, SessionApprovals};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::SqlitePool;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::bridge::Bridge;
use crate::catalog::{CatalogClient, ProcedureDescriptor, RouteKind};
use crate::config::{PermissionVerdict, WorkspaceConfig};
use crate::db;
use crate::domain::{ApprovalType, ExecutionTrace};
use crate::error::{PmlError, PmlResult};
use crate::lockfile::{IntegrityVerdict, LockfileChecker};
use crate::mcp::McpStdioManager;
use crate::sandbox::{self, ExecutionOutcome, RpcCaller, ToolDefinition};

const SENTINEL_KEY: &str = "__pml_approval_required__";

/// The client's answer to a previously raised [`PmlError::ApprovalRequired`].
#[derive(Debug, Clone)]
pub struct ContinueWorkflow {
    pub workflow_id: String,
    pub approved: bool,
}

/// What a successful call returns to its caller.
pub struct LoadedCapability {
    pub outcome: ExecutionOutcome,
    pub trace: ExecutionTrace,
}

/// Gates every sub-tool call a running capability makes against the
/// workspace's permission rules, pausing the whole execution for HIL
/// approval the same way a top-level call would. Dependency and api-key
/// gating do not apply here — those concern fetched procedure metadata,
/// which a raw MCP tool call has no equivalent of.
struct LoaderRpcCaller {
    manager: Arc<McpStdioManager>,
    workspace: Arc<RwLock<WorkspaceConfig>>,
    session: SessionApprovals,
}

#[async_trait]
impl RpcCaller for LoaderRpcCaller {
    async fn call(&self, server: &str, tool: &str, args: Value) -> Result<Value, Value> {
        let fqdn = format!("pml.mcp.{server}.{tool}");

        if !self.session.is_tool_approved(&fqdn).await {
            let verdict = self.workspace.read().await.evaluate_permission(&fqdn);
            match verdict {
                Some(PermissionVerdict::Allow) => {}
                Some(PermissionVerdict::Deny) => {
                    return Err(serde_json::json!({
                        "code": "permission_denied",
                        "message": format!("tool '{fqdn}' is denied by workspace policy"),
                    }));
                }
                Some(PermissionVerdict::Ask) | None => {
                    return Err(serde_json::json!({
                        SENTINEL_KEY: true,
                        "approval_type": ApprovalType::ToolPermission.as_str(),
                        "description": format!("capability wants to call sub-tool '{fqdn}'"),
                        "context": {"fqdn": fqdn},
                    }));
                }
            }
        }

        self.manager
            .call_tool(server, tool, args)
            .await
            .map_err(|e| serde_json::json!({ "code": e.code(), "message": e.to_string() }))
    }
}

pub struct Loader {
    db: SqlitePool,
    catalog: Arc<CatalogClient>,
    lockfile: LockfileChecker,
    workspace: Arc<RwLock<WorkspaceConfig>>,
    mcp: Arc<McpStdioManager>,
    pending: PendingWorkflowStore,
    session: SessionApprovals,
    descriptor_cache: RwLock<HashMap<String, ProcedureDescriptor>>,
    execution_timeout: Duration,
    rpc_timeout: Duration,
}

impl Loader {
    pub fn new(
        db: SqlitePool,
        catalog: Arc<CatalogClient>,
        lockfile: LockfileChecker,
        workspace: Arc<RwLock<WorkspaceConfig>>,
        mcp: Arc<McpStdioManager>,
        execution_timeout: Duration,
        rpc_timeout: Duration,
    ) -> Self {
        Self {
            db,
            catalog,
            lockfile,
            workspace,
            mcp,
            pending: PendingWorkflowStore::new(),
            session: SessionApprovals::new(),
            descriptor_cache: RwLock::new(HashMap::new()),
            execution_timeout,
            rpc_timeout,
        }
    }

    /// Grants a sub-tool permission for the remainder of this process's
    /// lifetime without going through the full HIL pause/resume round trip
    /// — used when a caller pre-authorizes tools up front (e.g. `--expose`).
    pub async fn approve_tool_for_session(&self, fqdn: &str) {
        self.session.approve_tool(fqdn).await;
    }

    /// Alias entry point: the wire protocol exposes capabilities by name,
    /// and every name in this system is shaped like an FQDN, so `call` is a
    /// thin pass-through to [`Loader::call_with_fqdn`].
    pub async fn call(&self, name: &str, args: Value) -> PmlResult<LoadedCapability> {
        self.call_with_fqdn(name, args).await
    }

    pub async fn call_with_fqdn(&self, fqdn: &str, args: Value) -> PmlResult<LoadedCapability> {
        self.run_pipeline(fqdn, args, None).await
    }

    /// Resumes a paused call after the client has resolved the approval it
    /// raised. A `false` answer surfaces as a plain execution error rather
    /// than re-raising the same pause, so a client can't get stuck looping.
    pub async fn continue_workflow(&self, continuation: ContinueWorkflow) -> PmlResult<LoadedCapability> {
        let Some(pending) = self.pending.take(&continuation.workflow_id).await else {
            return Err(PmlError::NotFound(format!(
                "no pending workflow '{}'",
                continuation.workflow_id
            )));
        };

        if !continuation.approved {
            return Err(PmlError::execution(
                "approval_rejected",
                format!("workflow '{}' was rejected by the caller", pending.workflow_id),
            ));
        }

        self.apply_approval(&pending).await?;

        let parent = synthetic_parent(&pending.workflow_id);
        self.run_pipeline(&pending.fqdn, pending.args.clone(), Some(parent)).await
    }

    pub async fn get_pending_traces(&self) -> PmlResult<Vec<ExecutionTrace>> {
        db::traces::list_unsynced(&self.db).await
    }

    pub async fn enqueue_pending_trace(&self, trace: &ExecutionTrace) -> PmlResult<()> {
        db::traces::insert(&self.db, trace).await
    }

    /// Applies whatever the just-resolved approval granted so the next
    /// pipeline pass proceeds past it: records a lockfile approval for an
    /// integrity pause, remembers a permission grant for a tool-permission
    /// pause, or marks a dependency installed. API-key pauses need no
    /// bookkeeping — the key itself must already be present in the
    /// environment by the time the caller resumes.
    async fn apply_approval(&self, pending: &PendingWorkflow) -> PmlResult<()> {
        match pending.approval_type {
            ApprovalType::Integrity => {
                let integrity = pending
                    .context
                    .get("integrity")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let kind = pending
                    .context
                    .get("kind")
                    .and_then(Value::as_str)
                    .unwrap_or("client")
                    .to_string();
                self.lockfile.record(&pending.fqdn, &integrity, &kind, true).await?;
            }
            ApprovalType::ToolPermission => {
                let fqdn = pending
                    .context
                    .get("fqdn")
                    .and_then(Value::as_str)
                    .unwrap_or(&pending.fqdn);
                self.session.approve_tool(fqdn).await;
            }
            ApprovalType::Dependency => {
                if let Some(dep) = pending.context.get("dependency").and_then(Value::as_str) {
                    self.session.mark_installed(dep).await;
                }
            }
            ApprovalType::ApiKeyRequired => {}
        }
        Ok(())
    }

    async fn fetch_descriptor(&self, fqdn: &str) -> PmlResult<ProcedureDescriptor> {
        if let Some(cached) = self.descriptor_cache.read().await.get(fqdn) {
            return Ok(cached.clone());
        }
        let descriptor = self.catalog.get_descriptor(fqdn).await?;
        self.descriptor_cache
            .write()
            .await
            .insert(fqdn.to_string(), descriptor.clone());
        Ok(descriptor)
    }

    /// The 8-step routed pipeline (spec §4.E): fetch, route, integrity
    /// gate, permission gate, dependency gate, api-key gate, execute,
    /// persist/flush trace.
    async fn run_pipeline(
        &self,
        fqdn: &str,
        args: Value,
        parent: Option<ExecutionTrace>,
    ) -> PmlResult<LoadedCapability> {
        let descriptor = self.fetch_descriptor(fqdn).await?;

        if descriptor.routing == RouteKind::Server {
            let response = self
                .catalog
                .forward_tool_call(serde_json::json!({
                    "fqdn": fqdn,
                    "args": args,
                }))
                .await?;
            let trace = ExecutionTrace::new_root(Some(fqdn.to_string()));
            return Ok(LoadedCapability {
                outcome: ExecutionOutcome::Success { value: response },
                trace,
            });
        }

        let code = descriptor
            .code
            .clone()
            .ok_or_else(|| PmlError::NotFound(format!("capability '{fqdn}' has no client code")))?;

        let verdict = self.lockfile.check(fqdn, &descriptor.integrity, "client").await?;
        match verdict {
            IntegrityVerdict::Unchanged | IntegrityVerdict::FirstFetchApproved => {}
            IntegrityVerdict::FirstFetchNeedsApproval => {
                return self
                    .raise_approval(
                        fqdn,
                        &args,
                        ApprovalType::Integrity,
                        format!("first fetch of '{fqdn}' needs approval before it can run"),
                        serde_json::json!({"integrity": descriptor.integrity, "kind": "client"}),
                    )
                    .await;
            }
            IntegrityVerdict::Drifted { old_hash, new_hash } => {
                return self
                    .raise_approval(
                        fqdn,
                        &args,
                        ApprovalType::Integrity,
                        format!("'{fqdn}' code changed since it was last approved"),
                        serde_json::json!({
                            "integrity": descriptor.integrity,
                            "kind": "client",
                            "old_hash": old_hash,
                            "new_hash": new_hash,
                        }),
                    )
                    .await;
            }
        }

        if !self.session.is_tool_approved(fqdn).await {
            match self.workspace.read().await.evaluate_permission(fqdn) {
                Some(PermissionVerdict::Allow) => {}
                Some(PermissionVerdict::Deny) => {
                    return Err(PmlError::PermissionDenied(format!(
                        "'{fqdn}' is denied by workspace policy"
                    )));
                }
                Some(PermissionVerdict::Ask) | None => {
                    return self
                        .raise_approval(
                            fqdn,
                            &args,
                            ApprovalType::ToolPermission,
                            format!("'{fqdn}' needs permission to run"),
                            serde_json::json!({"fqdn": fqdn}),
                        )
                        .await;
                }
            }
        }

        for dependency in &descriptor.dependencies {
            if !self.session.is_dependency_installed(dependency).await {
                return self
                    .raise_approval(
                        fqdn,
                        &args,
                        ApprovalType::Dependency,
                        format!("'{fqdn}' depends on '{dependency}', which needs approval to install"),
                        serde_json::json!({"dependency": dependency}),
                    )
                    .await;
            }
        }

        for env_key in &descriptor.required_env_keys {
            if std::env::var(env_key).is_err() {
                return self
                    .raise_approval(
                        fqdn,
                        &args,
                        ApprovalType::ApiKeyRequired,
                        format!("'{fqdn}' requires the '{env_key}' environment variable"),
                        serde_json::json!({"env_key": env_key}),
                    )
                    .await;
            }
        }

        let rpc: Arc<dyn RpcCaller> = Arc::new(LoaderRpcCaller {
            manager: self.mcp.clone(),
            workspace: self.workspace.clone(),
            session: self.session.clone(),
        });
        let bridge = Bridge::with_caller(rpc, self.execution_timeout, self.rpc_timeout);

        let tool_definitions = tool_definitions_from(&descriptor);
        let is_top_level = parent.is_none();
        let run = bridge
            .run(
                code,
                args.clone(),
                serde_json::json!({}),
                tool_definitions,
                Some(fqdn.to_string()),
                parent.as_ref(),
            )
            .await?;

        if let ExecutionOutcome::Failure { error } = &run.outcome {
            if let Some(sentinel) = extract_sentinel(&error.message) {
                return self.raise_from_sentinel(fqdn, &args, &sentinel).await;
            }
        }

        if is_top_level {
            self.enqueue_pending_trace(&run.trace).await?;
        }

        Ok(LoadedCapability {
            outcome: run.outcome,
            trace: run.trace,
        })
    }

    /// Mints a fresh workflow id, stores the pause, and returns it as a
    /// typed error for the caller to act on.
    async fn raise_approval(
        &self,
        fqdn: &str,
        args: &Value,
        approval_type: ApprovalType,
        description: String,
        context: Value,
    ) -> PmlResult<LoadedCapability> {
        let workflow_id = Uuid::now_v7().to_string();
        self.pending
            .insert(PendingWorkflow {
                workflow_id: workflow_id.clone(),
                fqdn: fqdn.to_string(),
                args: args.clone(),
                approval_type,
                description: description.clone(),
                context: context.clone(),
                created_at: chrono::Utc::now(),
            })
            .await;

        Err(PmlError::ApprovalRequired {
            approval_type,
            workflow_id,
            description,
            context,
        })
    }

    /// A sub-tool paused mid-execution (spec §4.E: error marker
    /// `__APPROVAL_REQUIRED__:<toolId>`, here generalized to the structured
    /// sentinel [`LoaderRpcCaller`] raises). The whole capability call is
    /// re-raised as a fresh top-level pause under a new workflow id, since
    /// resuming means re-running the capability from scratch once the
    /// sub-tool's permission is granted — with the same `args` the caller
    /// originally passed in, so resumption doesn't silently drop them.
    async fn raise_from_sentinel(&self, fqdn: &str, args: &Value, sentinel: &Value) -> PmlResult<LoadedCapability> {
        let approval_type = parse_approval_type(
            sentinel
                .get("approval_type")
                .and_then(Value::as_str)
                .unwrap_or("tool_permission"),
        );
        let description = sentinel
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("a sub-tool call needs approval")
            .to_string();
        let context = sentinel.get("context").cloned().unwrap_or(Value::Null);

        self.raise_approval(fqdn, args, approval_type, description, context).await
    }
}

fn synthetic_parent(workflow_id: &str) -> ExecutionTrace {
    let id = Uuid::parse_str(workflow_id).unwrap_or_else(|_| Uuid::now_v7());
    ExecutionTrace {
        trace_id: id,
        parent_trace_id: None,
        capability_id: None,
        workflow_id: Some(id),
        success: true,
        duration_ms: 0,
        task_results: vec![],
        decisions: vec![],
        timestamp: chrono::Utc::now(),
        executed_path: vec![],
        priority: 0.0,
    }
}

/// Descriptor tool entries are server-qualified fqdns (`pml.mcp.<server>.<tool>`);
/// the sandbox needs them split into the `(server, tool)` pairs it uses to
/// generate the worker's `mcp.<server>.<tool>(args)` surface.
fn tool_definitions_from(descriptor: &ProcedureDescriptor) -> Vec<ToolDefinition> {
    descriptor
        .tools
        .iter()
        .filter_map(|fqdn| {
            let rest = fqdn.strip_prefix("pml.mcp.").unwrap_or(fqdn);
            let (server, tool) = rest.split_once('.')?;
            Some(ToolDefinition {
                server: server.to_string(),
                tool: tool.to_string(),
            })
        })
        .collect()
}

/// Finds the JSON object embedded in a worker error message that marks it
/// as an approval pause rather than a genuine failure. The sandbox wraps
/// thrown errors in engine-specific text, so this walks back from the
/// sentinel key to the nearest preceding `{` and parses from there instead
/// of assuming the whole message is JSON.
fn extract_sentinel(message: &str) -> Option<Value> {
    let key_pos = message.find(SENTINEL_KEY)?;
    let start = message[..key_pos].rfind('{')?;
    let mut stream = serde_json::Deserializer::from_str(&message[start..]).into_iter::<Value>();
    stream.next()?.ok()
}

fn parse_approval_type(s: &str) -> ApprovalType {
    match s {
        "integrity" => ApprovalType::Integrity,
        "dependency" => ApprovalType::Dependency,
        "api_key_required" => ApprovalType::ApiKeyRequired,
        _ => ApprovalType::ToolPermission,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_sentinel_from_wrapped_worker_error_text() {
        let raw = serde_json::json!({
            "__pml_approval_required__": true,
            "approval_type": "tool_permission",
            "description": "needs approval",
            "context": {"fqdn": "pml.mcp.fs.write"},
        });
        let wrapped = format!("Uncaught Error: {}", raw);
        let extracted = extract_sentinel(&wrapped).expect("sentinel should be found");
        assert_eq!(extracted["approval_type"], "tool_permission");
        assert_eq!(extracted["context"]["fqdn"], "pml.mcp.fs.write");
    }

    #[test]
    fn returns_none_for_an_ordinary_error_message() {
        assert!(extract_sentinel("TypeError: x is not a function").is_none());
    }

    #[test]
    fn parses_every_approval_type_string() {
        assert_eq!(parse_approval_type("integrity"), ApprovalType::Integrity);
        assert_eq!(parse_approval_type("dependency"), ApprovalType::Dependency);
        assert_eq!(parse_approval_type("api_key_required"), ApprovalType::ApiKeyRequired);
        assert_eq!(parse_approval_type("tool_permission"), ApprovalType::ToolPermission);
        assert_eq!(parse_approval_type("garbage"), ApprovalType::ToolPermission);
    }
}
