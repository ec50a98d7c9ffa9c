//! Spawns and multiplexes JSON-RPC over stdio to external tool-server
//! subprocesses. Each server has an idle timer reset by every outbound
//! request; on expiry the process is gracefully shut down.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::error::{PmlError, PmlResult};
use super::health::HealthMonitor;
use super::protocol::{JsonRpcRequest, McpToolDescriptor, RequestId};
use super::transport::StdioTransport;

pub struct ServerSpec {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

struct ManagedServer {
    transport: Arc<StdioTransport>,
    last_used: Instant,
}

pub struct McpStdioManager {
    servers: RwLock<HashMap<String, ManagedServer>>,
    specs: RwLock<HashMap<String, ServerSpec>>,
    next_id: Mutex<i64>,
    idle_timeout: Duration,
    health: HealthMonitor,
}

impl McpStdioManager {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            servers: RwLock::new(HashMap::new()),
            specs: RwLock::new(HashMap::new()),
            next_id: Mutex::new(1),
            idle_timeout,
            health: HealthMonitor::new(),
        }
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.health
    }

    pub async fn register_server(&self, spec: ServerSpec) {
        self.specs.write().await.insert(spec.name.clone(), spec);
    }

    async fn ensure_spawned(&self, server: &str) -> PmlResult<Arc<StdioTransport>> {
        {
            let mut servers = self.servers.write().await;
            if let Some(managed) = servers.get_mut(server) {
                managed.last_used = Instant::now();
                return Ok(managed.transport.clone());
            }
        }

        let spec = self
            .specs
            .read()
            .await
            .get(server)
            .ok_or_else(|| PmlError::NotFound(format!("no mcp server registered: {server}")))?
            .clone_spec();

        let transport = Arc::new(StdioTransport::spawn(&spec.command, &spec.args, &spec.env).await?);
        self.servers.write().await.insert(
            server.to_string(),
            ManagedServer {
                transport: transport.clone(),
                last_used: Instant::now(),
            },
        );
        Ok(transport)
    }

    async fn next_request_id(&self) -> RequestId {
        let mut id = self.next_id.lock().await;
        let current = *id;
        *id += 1;
        RequestId::Number(current)
    }

    /// `tools/list` discovery against a spawned (or newly-spawned) server.
    pub async fn list_tools(&self, server: &str) -> PmlResult<Vec<McpToolDescriptor>> {
        let transport = self.ensure_spawned(server).await?;
        let id = self.next_request_id().await;
        let req = JsonRpcRequest::new(id, "tools/list", None);
        let body = serde_json::to_string(&req)?;
        let resp = transport.call(req.id.clone().unwrap(), &body).await?;
        self.touch(server).await;

        if let Some(err) = resp.error {
            self.health.record_failure(server, err.message.clone()).await;
            return Err(PmlError::Routing(format!(
                "{server} tools/list failed: {}",
                err.message
            )));
        }
        self.health.record_success(server).await;
        let tools = resp
            .result
            .and_then(|v| v.get("tools").cloned())
            .unwrap_or(serde_json::Value::Array(vec![]));
        Ok(serde_json::from_value(tools)?)
    }

    /// `tools/call` against `server`; resets the idle timer.
    pub async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        args: serde_json::Value,
    ) -> PmlResult<serde_json::Value> {
        let transport = self.ensure_spawned(server).await?;
        let id = self.next_request_id().await;
        let req = JsonRpcRequest::new(
            id,
            "tools/call",
            Some(serde_json::json!({ "name": tool, "arguments": args })),
        );
        let body = serde_json::to_string(&req)?;
        let resp = transport.call(req.id.clone().unwrap(), &body).await?;
        self.touch(server).await;

        if let Some(err) = resp.error {
            self.health.record_failure(server, err.message.clone()).await;
            return Err(PmlError::Routing(format!(
                "{server}:{tool} failed: {}",
                err.message
            )));
        }
        self.health.record_success(server).await;
        Ok(resp.result.unwrap_or(serde_json::Value::Null))
    }

    async fn touch(&self, server: &str) {
        if let Some(managed) = self.servers.write().await.get_mut(server) {
            managed.last_used = Instant::now();
        }
    }

    /// Sweeps servers idle past `idle_timeout`; call periodically from a
    /// background tick.
    pub async fn sweep_idle(&self) {
        let mut to_shutdown = Vec::new();
        {
            let servers = self.servers.read().await;
            for (name, managed) in servers.iter() {
                if managed.last_used.elapsed() >= self.idle_timeout {
                    to_shutdown.push(name.clone());
                }
            }
        }
        for name in to_shutdown {
            self.shutdown_server(&name).await;
        }
    }

    async fn shutdown_server(&self, server: &str) {
        if let Some(managed) = self.servers.write().await.remove(server) {
            managed.transport.shutdown().await;
        }
    }

    /// Forcibly terminates all processes.
    pub async fn shutdown_all(&self) {
        let names: Vec<String> = self.servers.read().await.keys().cloned().collect();
        for name in names {
            self.shutdown_server(&name).await;
        }
    }
}

impl ServerSpec {
    fn clone_spec(&self) -> ServerSpec {
        ServerSpec {
            name: self.name.clone(),
            command: self.command.clone(),
            args: self.args.clone(),
            env: self.env.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unregistered_server_is_not_found() {
        let manager = McpStdioManager::new(Duration::from_secs(300));
        let err = manager.list_tools("ghost").await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn sweep_idle_is_a_noop_with_no_servers() {
        let manager = McpStdioManager::new(Duration::from_millis(1));
        manager.sweep_idle().await;
    }
}
