//! Procedural Memory Layer core library.
//!
//! Wires the seven components in spec.md §2 together behind one
//! [`PmlContext`]: a single explicit value constructed at startup and
//! threaded into every transport, rather than ambient singletons (spec §9
//! "Global mutable state"), so tests can build isolated contexts against
//! temp workspaces and mock cloud servers.

pub mod bridge;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod learning;
pub mod loader;
pub mod lockfile;
pub mod mcp;
pub mod sandbox;
pub mod trace;
pub mod wire;

use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tokio::sync::RwLock;
use tracing::info;

use config::{PmlConfig, WorkspaceConfig, WORKSPACE_CONFIG_FILENAME};
use error::PmlResult;
use learning::{LearningConfig as CoreLearningConfig, LearningCore};
use loader::Loader;
use lockfile::LockfileChecker;
use mcp::McpStdioManager;
use trace::Syncer;

/// Everything a transport (stdio, HTTP, or a test harness) needs to serve
/// the agent-facing wire protocol: the capability loader, the learning
/// core it may consult for ranking, and the trace syncer flushed at
/// shutdown.
#[derive(Clone)]
pub struct PmlContext {
    pub config: Arc<PmlConfig>,
    pub workspace: Arc<RwLock<WorkspaceConfig>>,
    pub db: SqlitePool,
    pub loader: Arc<Loader>,
    pub learning: Arc<LearningCore>,
    pub mcp: Arc<McpStdioManager>,
    pub syncer: Arc<Syncer>,
}

impl PmlContext {
    /// Loads process config from the environment, opens (creating if
    /// needed) the sqlite store, reads the workspace's `.pml.json`, and
    /// constructs every component. Fails fast (spec §7 "Configuration" /
    /// "Workspace" kinds) if the API key is missing or the workspace file
    /// is present but malformed.
    pub async fn bootstrap() -> PmlResult<Self> {
        let config = PmlConfig::from_env()?;
        Self::build(config).await
    }

    pub async fn build(config: PmlConfig) -> PmlResult<Self> {
        let config = Arc::new(config);

        let db = db::connect(&config.database.url, config.database.max_connections).await?;

        let workspace_path = std::path::Path::new(&config.workspace).join(WORKSPACE_CONFIG_FILENAME);
        let workspace_config = if workspace_path.exists() {
            WorkspaceConfig::load(&workspace_path)?
        } else {
            WorkspaceConfig::scaffold(&config.workspace, &config.cloud.url)
        };
        let workspace = Arc::new(RwLock::new(workspace_config));

        let catalog = Arc::new(catalog::CatalogClient::new(
            config.cloud.url.clone(),
            config.cloud.api_key.clone(),
        )?);

        let lockfile = LockfileChecker::new(db.clone(), true);
        let mcp = Arc::new(McpStdioManager::new(Duration::from_millis(config.mcp.idle_shutdown_ms)));
        spawn_idle_sweeper(mcp.clone());

        let loader = Arc::new(Loader::new(
            db.clone(),
            catalog.clone(),
            lockfile,
            workspace.clone(),
            mcp.clone(),
            Duration::from_millis(config.sandbox.execution_timeout_ms),
            Duration::from_millis(config.sandbox.rpc_timeout_ms),
        ));

        let learning = Arc::new(
            LearningCore::new(
                db.clone(),
                CoreLearningConfig {
                    use_per: config.learning.use_per,
                    ..CoreLearningConfig::default()
                },
            )
            .await?,
        );

        let syncer = Arc::new(Syncer::new(db.clone(), catalog));

        info!(workspace = %config.workspace, "pml context initialized");

        Ok(Self {
            config,
            workspace,
            db,
            loader,
            learning,
            mcp,
            syncer,
        })
    }

    /// Flushes any pending traces, then tears down MCP subprocesses.
    /// Mirrors spec §5's `shutdown`: flush, terminate workers (owned
    /// per-execution by the bridge, already gone once `run` returns),
    /// shut down MCP subprocesses. Traces are already persisted by the
    /// loader as each workflow completes (spec §4.E step 7), so flushing
    /// here is just the deferred sync pass over whatever's unsynced.
    pub async fn shutdown(&self) -> PmlResult<()> {
        match self.syncer.flush().await {
            Ok(outcome) => info!(uploaded = outcome.uploaded, batches = outcome.batches, "flushed traces"),
            Err(e) => tracing::debug!(error = %e, "trace flush failed at shutdown, left queued"),
        }
        self.mcp.shutdown_all().await;
        Ok(())
    }

    pub fn workspace_file_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.config.workspace).join(WORKSPACE_CONFIG_FILENAME)
    }

    /// Loads persisted tools/capabilities into the learning core so SHGAT
    /// scoring isn't cold on a warm restart.
    pub async fn warm_learning_core(&self) -> PmlResult<()> {
        for capability in db::capabilities::list_all(&self.db).await? {
            self.learning.register_capability(&capability).await;
        }
        Ok(())
    }
}

/// Ticks `sweep_idle` for the lifetime of the process so the idle-shutdown
/// responsibility actually fires instead of sitting dormant behind a
/// callable-but-uncalled method.
fn spawn_idle_sweeper(mcp: Arc<McpStdioManager>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(30));
        loop {
            ticker.tick().await;
            mcp.sweep_idle().await;
        }
    });
}
