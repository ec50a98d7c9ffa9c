//! `reqwest`-based cloud catalog client. Mirrors the teacher's
//! `HttpTransport` wrapper style (a `reqwest::Client` behind a small typed
//! surface) rather than hand-rolling request construction at every call
//! site.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PmlError, PmlResult};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Whether a tool/capability name resolves to code fetched and run
/// locally, or forwarded as-is to the cloud catalog's own executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteKind {
    Client,
    Server,
}

/// A procedure's full descriptor as published by the cloud catalog (spec
/// §4.D, §4.E): code and integrity hash for client-routed procedures,
/// declared dependencies and required env keys for the loader's gates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcedureDescriptor {
    pub fqdn: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub code: Option<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    pub routing: RouteKind,
    pub integrity: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub required_env_keys: Vec<String>,
}

pub struct CatalogClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl CatalogClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> PmlResult<Self> {
        let http = reqwest::Client::builder().timeout(DEFAULT_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// `POST /mcp`: forwards a JSON-RPC request verbatim to a server-routed
    /// procedure's backing implementation.
    pub async fn forward_tool_call(&self, request: serde_json::Value) -> PmlResult<serde_json::Value> {
        let resp = self
            .http
            .post(self.url("/mcp"))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;
        self.parse_json(resp).await
    }

    /// `GET /api/registry/<fqdn>`: fetches a procedure's descriptor.
    pub async fn get_descriptor(&self, fqdn: &str) -> PmlResult<ProcedureDescriptor> {
        let resp = self
            .http
            .get(self.url(&format!("/api/registry/{fqdn}")))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        self.parse_json(resp).await
    }

    /// `POST /api/registry/<fqdn>`: publishes a newly learned/refined
    /// procedure back to the catalog.
    pub async fn publish_descriptor(&self, descriptor: &ProcedureDescriptor) -> PmlResult<()> {
        let resp = self
            .http
            .post(self.url(&format!("/api/registry/{}", descriptor.fqdn)))
            .bearer_auth(&self.api_key)
            .json(descriptor)
            .send()
            .await?;
        self.ensure_success(resp).await
    }

    /// Trace upload endpoint: accepts a batch of already-sanitized trace
    /// objects (spec §4.F). Batching/backoff live in [`crate::trace::Syncer`];
    /// this is a single best-effort attempt.
    pub async fn upload_traces(&self, batch: &[serde_json::Value]) -> PmlResult<()> {
        let resp = self
            .http
            .post(self.url("/api/traces"))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "traces": batch }))
            .send()
            .await?;
        self.ensure_success(resp).await
    }

    async fn ensure_success(&self, resp: reqwest::Response) -> PmlResult<()> {
        if resp.status().is_success() {
            Ok(())
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            Err(PmlError::Routing(format!("cloud catalog returned {status}: {body}")))
        }
    }

    async fn parse_json<T: serde::de::DeserializeOwned>(&self, resp: reqwest::Response) -> PmlResult<T> {
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(PmlError::Routing(format!("cloud catalog returned {status}: {body}")));
        }
        Ok(resp.json::<T>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_routing_round_trips_through_json() {
        let raw = serde_json::json!({
            "fqdn": "pml.mcp.json.parse",
            "type": "deno",
            "code": "return JSON.parse(args.input);",
            "tools": [],
            "routing": "client",
            "integrity": "sha256-abc",
            "description": "parse a json string",
            "dependencies": [],
            "required_env_keys": [],
        });
        let descriptor: ProcedureDescriptor = serde_json::from_value(raw).unwrap();
        assert_eq!(descriptor.routing, RouteKind::Client);
        assert_eq!(descriptor.kind, "deno");
    }

    #[test]
    fn client_construction_fails_gracefully_never_panics() {
        assert!(CatalogClient::new("https://cloud.pml.dev", "key").is_ok());
    }
}
