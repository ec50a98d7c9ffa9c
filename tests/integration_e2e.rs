//! Cross-module integration scenarios (spec §8): S1-S4 literal scenarios
//! plus the dependency-ordering and dedup invariants, exercised against a
//! real loader wired to an in-memory sqlite pool and a local mock catalog
//! server instead of any single module's unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path as AxumPath, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::RwLock;

use pml::catalog::CatalogClient;
use pml::config::WorkspaceConfig;
use pml::db;
use pml::loader::{ContinueWorkflow, Loader};
use pml::lockfile::LockfileChecker;
use pml::mcp::McpStdioManager;

#[derive(Clone, Default)]
struct MockCatalogState {
    descriptors: Arc<Mutex<HashMap<String, Value>>>,
}

async fn get_descriptor(
    State(state): State<MockCatalogState>,
    AxumPath(fqdn): AxumPath<String>,
) -> Json<Value> {
    let descriptors = state.descriptors.lock().unwrap();
    Json(descriptors.get(&fqdn).cloned().unwrap_or(Value::Null))
}

async fn upload_traces() -> Json<Value> {
    Json(json!({"accepted": true}))
}

/// Spins up a tiny mock cloud catalog on a loopback ephemeral port, serving
/// only the two endpoints the loader's pipeline actually calls: descriptor
/// fetch and trace upload.
async fn spawn_mock_catalog(descriptors: HashMap<String, Value>) -> String {
    let state = MockCatalogState {
        descriptors: Arc::new(Mutex::new(descriptors)),
    };
    let app = Router::new()
        .route("/api/registry/{*fqdn}", get(get_descriptor))
        .route("/api/traces", post(upload_traces))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

struct Harness {
    loader: Loader,
}

async fn harness(base_url: &str, auto_approve: bool) -> Harness {
    let db = db::connect("sqlite::memory:", 1).await.unwrap();
    let catalog = Arc::new(CatalogClient::new(base_url, "test-key").unwrap());
    let lockfile = LockfileChecker::new(db.clone(), auto_approve);
    let workspace = Arc::new(RwLock::new(WorkspaceConfig::scaffold(
        "demo",
        base_url,
    )));
    let mcp = Arc::new(McpStdioManager::new(Duration::from_secs(300)));
    let loader = Loader::new(
        db,
        catalog,
        lockfile,
        workspace,
        mcp,
        Duration::from_secs(10),
        Duration::from_secs(5),
    );
    Harness { loader }
}

fn json_parse_descriptor(integrity: &str) -> Value {
    json_parse_descriptor_for("pml.mcp.json.parse", integrity)
}

fn json_parse_descriptor_for(fqdn: &str, integrity: &str) -> Value {
    json!({
        "fqdn": fqdn,
        "type": "deno",
        "code": "return JSON.parse(args.input);",
        "tools": [],
        "routing": "client",
        "integrity": integrity,
        "description": "parse a json string",
        "dependencies": [],
        "required_env_keys": [],
    })
}

fn echo_descriptor(fqdn: &str, integrity: &str) -> Value {
    json!({
        "fqdn": fqdn,
        "type": "deno",
        "code": "return args.input;",
        "tools": [],
        "routing": "client",
        "integrity": integrity,
        "description": "echo the input back",
        "dependencies": [],
        "required_env_keys": [],
    })
}

/// S1: a cached JSON-parse capability with a matching lockfile executes
/// locally with no sub-tool calls and a successful trace.
#[tokio::test]
async fn s1_local_execution_of_cached_json_parse_capability() {
    let mut descriptors = HashMap::new();
    descriptors.insert(
        "pml.mcp.json.parse".to_string(),
        json_parse_descriptor("sha256-ABC"),
    );
    let base_url = spawn_mock_catalog(descriptors).await;
    let harness = harness(&base_url, true).await;

    let loaded = harness
        .loader
        .call_with_fqdn("pml.mcp.json.parse", json!({"input": "{\"a\":1}"}))
        .await
        .expect("first call auto-approves and executes");

    assert!(loaded.trace.success);
    assert!(loaded.trace.task_results.is_empty());
    match loaded.outcome {
        pml::sandbox::ExecutionOutcome::Success { value } => assert_eq!(value["a"], 1),
        pml::sandbox::ExecutionOutcome::Failure { error } => panic!("expected success, got {error:?}"),
    }
}

/// S2: integrity drift pauses for approval, then resuming with
/// `continue_workflow` succeeds and rewrites the lockfile to the new hash.
#[tokio::test]
async fn s2_integrity_drift_approval_round_trip() {
    let mut descriptors = HashMap::new();
    descriptors.insert(
        "pml.mcp.updated.cap".to_string(),
        json_parse_descriptor_for("pml.mcp.updated.cap", "sha256-NEW"),
    );
    let base_url = spawn_mock_catalog(descriptors).await;

    // Seed the lockfile with an OLD hash to simulate a prior approval that
    // now disagrees with what the catalog serves.
    let db2 = db::connect("sqlite::memory:", 1).await.unwrap();
    let lockfile2 = LockfileChecker::new(db2.clone(), true);
    lockfile2
        .record("pml.mcp.updated.cap", "sha256-OLD", "client", true)
        .await
        .unwrap();
    let catalog2 = Arc::new(CatalogClient::new(base_url.clone(), "test-key").unwrap());
    let workspace2 = Arc::new(RwLock::new(WorkspaceConfig::scaffold("demo", &base_url)));
    let mcp2 = Arc::new(McpStdioManager::new(Duration::from_secs(300)));
    let loader2 = Loader::new(
        db2,
        catalog2,
        lockfile2,
        workspace2,
        mcp2,
        Duration::from_secs(10),
        Duration::from_secs(5),
    );

    let first = loader2
        .call_with_fqdn("pml.mcp.updated.cap", json!({"input": "{}"}))
        .await;
    let err = first.expect_err("drifted hash must pause for approval");
    let pml::error::PmlError::ApprovalRequired {
        approval_type,
        workflow_id,
        context,
        ..
    } = err
    else {
        panic!("expected ApprovalRequired, got {err:?}");
    };
    assert_eq!(approval_type, pml::domain::ApprovalType::Integrity);
    assert_eq!(context["old_hash"], "sha256-OLD");
    assert_eq!(context["new_hash"], "sha256-NEW");

    let resumed = loader2
        .continue_workflow(ContinueWorkflow {
            workflow_id: workflow_id.clone(),
            approved: true,
        })
        .await
        .expect("resuming an approved workflow executes the procedure");
    assert!(resumed.trace.success);

    // Re-running unresumed from scratch should now see the hash as
    // unchanged rather than drifted.
    let second = loader2
        .call_with_fqdn("pml.mcp.updated.cap", json!({"input": "{}"}))
        .await
        .expect("lockfile now agrees with the catalog's integrity");
    assert!(second.trace.success);
}

/// Rejecting a pending workflow must not execute the paused procedure and
/// must not leave it resumable under the same workflow id (no silent
/// double-execution, spec invariant #5).
#[tokio::test]
async fn rejected_approval_does_not_execute_and_is_not_resumable() {
    let mut descriptors = HashMap::new();
    descriptors.insert(
        "pml.mcp.updated.cap".to_string(),
        json_parse_descriptor_for("pml.mcp.updated.cap", "sha256-NEW"),
    );
    let base_url = spawn_mock_catalog(descriptors).await;

    let db = db::connect("sqlite::memory:", 1).await.unwrap();
    let lockfile = LockfileChecker::new(db.clone(), true);
    lockfile
        .record("pml.mcp.updated.cap", "sha256-OLD", "client", true)
        .await
        .unwrap();
    let catalog = Arc::new(CatalogClient::new(base_url.clone(), "test-key").unwrap());
    let workspace = Arc::new(RwLock::new(WorkspaceConfig::scaffold("demo", &base_url)));
    let mcp = Arc::new(McpStdioManager::new(Duration::from_secs(300)));
    let loader = Loader::new(
        db,
        catalog,
        lockfile,
        workspace,
        mcp,
        Duration::from_secs(10),
        Duration::from_secs(5),
    );

    let err = loader
        .call_with_fqdn("pml.mcp.updated.cap", json!({"input": "{}"}))
        .await
        .expect_err("drifted hash must pause");
    let pml::error::PmlError::ApprovalRequired { workflow_id, .. } = err else {
        panic!("expected ApprovalRequired");
    };

    let rejected = loader
        .continue_workflow(ContinueWorkflow {
            workflow_id: workflow_id.clone(),
            approved: false,
        })
        .await;
    assert!(rejected.is_err(), "rejection must not execute the procedure");

    // Replaying the same workflow id again must not re-execute anything:
    // the pending entry was consumed, so this is a benign "not found".
    let replay = loader
        .continue_workflow(ContinueWorkflow {
            workflow_id,
            approved: true,
        })
        .await;
    assert!(matches!(replay, Err(pml::error::PmlError::NotFound(_))));
}

/// S3 (partial): an unseen FQDN against an unreachable catalog surfaces as
/// a routing/network error rather than hanging or panicking.
#[tokio::test]
async fn s3_uncached_capability_against_unreachable_catalog_errors_fast() {
    // Port 1 is never a live listener on a loopback address; reqwest fails
    // fast with a connection-refused error instead of hanging.
    let harness = harness("http://127.0.0.1:1", true).await;

    let started = std::time::Instant::now();
    let result = harness
        .loader
        .call_with_fqdn("pml.mcp.never.seen", json!({}))
        .await;
    assert!(result.is_err());
    assert!(started.elapsed() < Duration::from_secs(10));
}

/// S4: five concurrent capability executions with distinct inputs must
/// not cross-talk — each call's result matches the input it was given.
#[tokio::test]
async fn s4_concurrent_executions_do_not_cross_talk() {
    let inputs = ["alpha", "beta", "gamma", "delta", "epsilon"];
    let mut descriptors = HashMap::new();
    for input in &inputs {
        let fqdn = format!("pml.mcp.echo.{input}");
        descriptors.insert(fqdn.clone(), echo_descriptor(&fqdn, "sha256-ECHO"));
    }
    let base_url = spawn_mock_catalog(descriptors).await;
    let harness = Arc::new(harness(&base_url, true).await);

    let mut handles = Vec::new();
    for input in inputs {
        let harness = harness.clone();
        handles.push(tokio::spawn(async move {
            let fqdn = format!("pml.mcp.echo.{input}");
            let loaded = harness
                .loader
                .call_with_fqdn(&fqdn, json!({"input": input}))
                .await
                .unwrap();
            (input, loaded.outcome)
        }));
    }

    for handle in handles {
        let (input, outcome) = handle.await.unwrap();
        match outcome {
            pml::sandbox::ExecutionOutcome::Success { value } => {
                assert_eq!(value.as_str(), Some(input), "cross-talk detected for {input}");
            }
            pml::sandbox::ExecutionOutcome::Failure { error } => {
                panic!("expected success for {input}, got {error:?}")
            }
        }
    }
}

/// Testable property #3 (dedup): saving two capabilities with the same
/// `code_hash` collapses to a single stored row under the first id.
#[tokio::test]
async fn dedup_by_code_hash_across_separate_saves() {
    let pool = db::connect("sqlite::memory:", 1).await.unwrap();
    let mut cap = sample_capability("cap-a", "sha256-SAME");
    db::capabilities::upsert(&pool, &cap).await.unwrap();

    cap.id = "cap-b".to_string();
    cap.fqdn = "pml.mcp.json.parse_alias".to_string();
    cap.intent = "a different intent text".to_string();
    db::capabilities::upsert(&pool, &cap).await.unwrap();

    let stored = db::capabilities::get_by_code_hash(&pool, "sha256-SAME")
        .await
        .unwrap()
        .expect("capability should exist");
    assert_eq!(stored.id, "cap-a", "second save with the same hash must not mint a new id");

    let all = db::capabilities::list_all(&pool).await.unwrap();
    assert_eq!(all.len(), 1, "duplicate code_hash must not create a second row");
}

/// Testable property #2: a parent trace flushed in the same batch as its
/// child must precede it, even when persisted out of order.
#[tokio::test]
async fn parent_trace_precedes_child_through_the_full_sync_path() {
    let pool = db::connect("sqlite::memory:", 1).await.unwrap();
    let root = pml::domain::ExecutionTrace::new_root(Some("pml.mcp.root".to_string()));
    let child = pml::domain::ExecutionTrace::new_child(&root, Some("pml.mcp.child".to_string()));

    // Insert child first to prove ordering isn't just insertion order.
    db::traces::insert(&pool, &child).await.unwrap();
    db::traces::insert(&pool, &root).await.unwrap();

    let unsynced = db::traces::list_unsynced(&pool).await.unwrap();
    let ordered = pml::trace::topological_order(unsynced);
    let root_pos = ordered.iter().position(|t| t.trace_id == root.trace_id).unwrap();
    let child_pos = ordered.iter().position(|t| t.trace_id == child.trace_id).unwrap();
    assert!(root_pos < child_pos);
}

fn sample_capability(id: &str, code_hash: &str) -> pml::domain::Capability {
    pml::domain::Capability {
        id: id.to_string(),
        fqdn: "pml.mcp.json.parse".to_string(),
        kind: "deno".to_string(),
        intent: "parse json".to_string(),
        intent_embedding: vec![0.1; 8],
        code_hash: code_hash.to_string(),
        code: "return JSON.parse(args.input);".to_string(),
        tools_used: Default::default(),
        usage_count: 0,
        success_rate: 0.0,
        success_count: 0,
        failure_count: 0,
    }
}
