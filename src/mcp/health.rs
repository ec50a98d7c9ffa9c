//! Per-server health tracking: consecutive-failure counts flip a
//! connected/disconnected flag, the way the teacher's `HealthMonitor`
//! tracks its MCP client servers. Feeds the idle-shutdown and
//! resource-model concerns of spec §4.C/§5 without changing the manager's
//! request path.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

const DISCONNECT_AFTER_CONSECUTIVE_FAILURES: u32 = 3;

#[derive(Debug, Clone)]
pub struct ServerHealth {
    pub name: String,
    pub connected: bool,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub total_requests: u64,
    pub total_failures: u64,
}

impl ServerHealth {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            connected: true,
            last_success: None,
            last_error: None,
            consecutive_failures: 0,
            total_requests: 0,
            total_failures: 0,
        }
    }

    pub fn record_success(&mut self) {
        self.total_requests += 1;
        self.consecutive_failures = 0;
        self.connected = true;
        self.last_success = Some(Utc::now());
    }

    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.total_requests += 1;
        self.total_failures += 1;
        self.consecutive_failures += 1;
        self.last_error = Some(error.into());
        if self.consecutive_failures >= DISCONNECT_AFTER_CONSECUTIVE_FAILURES {
            self.connected = false;
        }
    }

    pub fn success_rate(&self) -> f32 {
        if self.total_requests == 0 {
            1.0
        } else {
            (self.total_requests - self.total_failures) as f32 / self.total_requests as f32
        }
    }
}

#[derive(Default)]
pub struct HealthMonitor {
    servers: Arc<RwLock<HashMap<String, ServerHealth>>>,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register_server(&self, name: &str) {
        self.servers
            .write()
            .await
            .entry(name.to_string())
            .or_insert_with(|| ServerHealth::new(name));
    }

    pub async fn record_success(&self, name: &str) {
        self.register_server(name).await;
        if let Some(h) = self.servers.write().await.get_mut(name) {
            h.record_success();
        }
    }

    pub async fn record_failure(&self, name: &str, error: impl Into<String>) {
        self.register_server(name).await;
        if let Some(h) = self.servers.write().await.get_mut(name) {
            h.record_failure(error);
        }
    }

    pub async fn snapshot(&self, name: &str) -> Option<ServerHealth> {
        self.servers.read().await.get(name).cloned()
    }

    pub async fn all(&self) -> Vec<ServerHealth> {
        self.servers.read().await.values().cloned().collect()
    }
}
