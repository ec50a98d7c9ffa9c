//! `serve --port` HTTP transport (spec §6): the same JSON-RPC methods as
//! the stdio transport, carried over a single POST route, plus a bare
//! `/health` route and permissive CORS.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};

use crate::loader::Loader;
use crate::wire::protocol::{dispatch_tool_call, ExposedTool};

#[derive(Clone)]
struct HttpState {
    loader: Arc<Loader>,
    exposed: Arc<Vec<ExposedTool>>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    #[serde(default)]
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

pub fn router(loader: Arc<Loader>, exposed: Vec<ExposedTool>) -> Router {
    let state = HttpState {
        loader,
        exposed: Arc::new(exposed),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", post(handle_rpc).get(method_not_allowed))
        .route("/health", get(health))
        .layer(cors)
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({"status": "ok"})))
}

async fn method_not_allowed() -> Response {
    StatusCode::METHOD_NOT_ALLOWED.into_response()
}

async fn handle_rpc(State(state): State<HttpState>, Json(request): Json<JsonRpcRequest>) -> Json<Value> {
    let result = match request.method.as_str() {
        "initialize" => serde_json::json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "pml", "version": env!("CARGO_PKG_VERSION")},
        }),
        "tools/list" => serde_json::json!({
            "tools": state
                .exposed
                .iter()
                .map(|tool| serde_json::json!({
                    "name": tool.name,
                    "description": tool.description,
                    "inputSchema": tool.input_schema,
                }))
                .collect::<Vec<_>>(),
        }),
        "tools/call" => {
            let name = request
                .params
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let arguments = request.params.get("arguments").cloned().unwrap_or(Value::Null);
            dispatch_tool_call(&state.loader, &name, arguments).await
        }
        other => serde_json::json!({
            "status": "error",
            "error": {"code": "METHOD_NOT_FOUND", "message": format!("unknown method '{other}'")},
            "executed_locally": true,
        }),
    };

    Json(serde_json::json!({
        "jsonrpc": "2.0",
        "id": request.id,
        "result": result,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogClient;
    use crate::config::WorkspaceConfig;
    use crate::lockfile::LockfileChecker;
    use crate::mcp::McpStdioManager;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tokio::sync::RwLock;
    use tower::ServiceExt;

    async fn test_router() -> Router {
        let db = crate::db::connect("sqlite::memory:", 1).await.unwrap();
        let catalog = Arc::new(CatalogClient::new("https://cloud.pml.dev", "key").unwrap());
        let lockfile = LockfileChecker::new(db.clone(), true);
        let workspace = Arc::new(RwLock::new(WorkspaceConfig::scaffold(
            "demo",
            "https://cloud.pml.dev",
        )));
        let mcp = Arc::new(McpStdioManager::new(Duration::from_secs(300)));
        let loader = Arc::new(Loader::new(
            db,
            catalog,
            lockfile,
            workspace,
            mcp,
            Duration::from_secs(30),
            Duration::from_secs(10),
        ));
        router(loader, vec![])
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let app = test_router().await;
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn get_on_rpc_route_is_method_not_allowed() {
        let app = test_router().await;
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::GET)
                    .uri("/")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn tools_list_returns_exposed_tools() {
        let db = crate::db::connect("sqlite::memory:", 1).await.unwrap();
        let catalog = Arc::new(CatalogClient::new("https://cloud.pml.dev", "key").unwrap());
        let lockfile = LockfileChecker::new(db.clone(), true);
        let workspace = Arc::new(RwLock::new(WorkspaceConfig::scaffold(
            "demo",
            "https://cloud.pml.dev",
        )));
        let mcp = Arc::new(McpStdioManager::new(Duration::from_secs(300)));
        let loader = Arc::new(Loader::new(
            db,
            catalog,
            lockfile,
            workspace,
            mcp,
            Duration::from_secs(30),
            Duration::from_secs(10),
        ));
        let app = router(
            loader,
            vec![ExposedTool {
                name: "pml.mcp.json.parse".to_string(),
                description: "parse json".to_string(),
                input_schema: serde_json::json!({"type": "object"}),
            }],
        );

        let body = serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"});
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["result"]["tools"][0]["name"], "pml.mcp.json.parse");
    }
}
