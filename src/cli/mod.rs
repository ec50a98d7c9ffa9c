//! CLI subcommand runners (spec §6 "CLI surface"). `main.rs` parses
//! [`CliArgs`] and calls straight into one of these.

mod args;

pub use args::{CliArgs, Command};

use std::path::Path;

use tracing::info;

use crate::config::{WorkspaceConfig, WORKSPACE_CONFIG_FILENAME};
use crate::wire::{router, ExposedTool};
use crate::PmlContext;

/// Tools exposed over the wire: one entry per capability already known
/// locally (the loader's own cache), filtered to `--expose` if given, or
/// entirely replaced by it when `--only` is set.
async fn exposed_tools(ctx: &PmlContext, expose: &Option<Vec<String>>, only: bool) -> anyhow::Result<Vec<ExposedTool>> {
    let mut tools = Vec::new();

    if !only {
        for cap in crate::db::capabilities::list_all(&ctx.db).await? {
            tools.push(ExposedTool {
                name: cap.fqdn.clone(),
                description: cap.intent.clone(),
                input_schema: serde_json::json!({"type": "object"}),
            });
        }
    }

    if let Some(names) = expose {
        for name in names {
            if !tools.iter().any(|t| &t.name == name) {
                tools.push(ExposedTool {
                    name: name.clone(),
                    description: String::new(),
                    input_schema: serde_json::json!({"type": "object"}),
                });
            }
            ctx.loader.approve_tool_for_session(name).await;
        }
    }

    Ok(tools)
}

/// `stdio`: start the MCP protocol server over stdin/stdout. Exits with
/// code 1 on missing `PML_API_KEY` or an invalid workspace (surfaced by
/// `PmlContext::bootstrap` as `Err`); code 0 on a clean shutdown.
pub async fn run_stdio(expose: Option<Vec<String>>, only: bool) -> anyhow::Result<()> {
    use rmcp::ServiceExt;

    let ctx = PmlContext::bootstrap().await?;
    ctx.warm_learning_core().await?;
    let exposed = exposed_tools(&ctx, &expose, only).await?;

    let handler = crate::wire::PmlServerHandler::new(ctx.loader.clone(), exposed);

    info!("pml stdio server ready");
    let service = handler.serve(rmcp::transport::stdio()).await?;
    service.waiting().await?;

    ctx.shutdown().await?;
    Ok(())
}

/// `serve --port <p>`: the same protocol over HTTP.
pub async fn run_serve(port: Option<u16>) -> anyhow::Result<()> {
    let ctx = PmlContext::bootstrap().await?;
    ctx.warm_learning_core().await?;
    let exposed = exposed_tools(&ctx, &None, false).await?;

    let bind_port = port.unwrap_or(ctx.config.server.port);
    let addr = format!("{}:{}", ctx.config.server.host, bind_port);

    let app = router(ctx.loader.clone(), exposed);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "pml http server listening");

    let shutdown_ctx = ctx.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    shutdown_ctx.shutdown().await?;
    Ok(())
}

/// `init`: scaffold a workspace `.pml.json`. Deliberately does not require
/// `PML_API_KEY` — a fresh workspace is exactly where that key is often
/// still missing.
pub async fn run_init(path: String) -> anyhow::Result<()> {
    let workspace_dir = Path::new(&path);
    std::fs::create_dir_all(workspace_dir)?;
    let config_path = workspace_dir.join(WORKSPACE_CONFIG_FILENAME);

    if config_path.exists() {
        println!("{} already exists, leaving it untouched", config_path.display());
        return Ok(());
    }

    let cloud_url = std::env::var("PML_CLOUD_URL").unwrap_or_else(|_| crate::config::DEFAULT_CLOUD_URL.to_string());
    let workspace_name = workspace_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "workspace".to_string());

    let scaffold = WorkspaceConfig::scaffold(&workspace_name, &cloud_url);
    scaffold.save(&config_path)?;

    println!("scaffolded {}", config_path.display());
    Ok(())
}

/// Dispatches a parsed [`CliArgs`] to the matching subcommand runner.
pub async fn run(args: CliArgs) -> anyhow::Result<()> {
    match args.command {
        Command::Stdio { expose, only } => run_stdio(expose, only).await,
        Command::Serve { port } => run_serve(port).await,
        Command::Init { path } => run_init(path).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn init_scaffolds_a_fresh_workspace_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_string_lossy().to_string();
        run_init(path).await.unwrap();

        let config_path = dir.path().join(WORKSPACE_CONFIG_FILENAME);
        assert!(config_path.exists());
        let loaded = WorkspaceConfig::load(&config_path).unwrap();
        assert_eq!(loaded.server.port, 7337);
    }

    #[tokio::test]
    async fn init_leaves_an_existing_config_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join(WORKSPACE_CONFIG_FILENAME);
        let original = WorkspaceConfig::scaffold("custom", "https://example.test");
        original.save(&config_path).unwrap();

        run_init(dir.path().to_string_lossy().to_string()).await.unwrap();

        let reloaded = WorkspaceConfig::load(&config_path).unwrap();
        assert_eq!(reloaded.workspace, "custom");
    }
}
