//! Manual [`ServerHandler`] implementation for the `stdio` transport.
//! Tool names are resolved dynamically against the loader rather than
//! known at compile time, so this is a plain `async fn` implementation
//! (grounded on `examples/other_examples/.../putao520-agentic-warden`'s
//! `AgenticWardenMcpServer`) rather than the teacher's macro-based
//! `#[tool_router]`/`#[tool_handler]` server, whose fixed tool set doesn't
//! fit a catalog of capabilities that grows at runtime.

use std::sync::Arc;

use rmcp::model::{
    CallToolRequestParam, CallToolResult, Content, Implementation, InitializeRequestParam,
    InitializeResult, ListToolsResult, PaginatedRequestParam, ServerCapabilities,
};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::ErrorData;
use rmcp::ServerHandler;

use crate::loader::Loader;
use crate::wire::protocol::{dispatch_tool_call, ExposedTool};

#[derive(Clone)]
pub struct PmlServerHandler {
    loader: Arc<Loader>,
    exposed: Arc<Vec<ExposedTool>>,
}

impl PmlServerHandler {
    pub fn new(loader: Arc<Loader>, exposed: Vec<ExposedTool>) -> Self {
        Self {
            loader,
            exposed: Arc::new(exposed),
        }
    }
}

impl ServerHandler for PmlServerHandler {
    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        let tools = self
            .exposed
            .iter()
            .map(|tool| {
                let schema_map = match tool.input_schema.clone() {
                    serde_json::Value::Object(map) => map,
                    _ => serde_json::Map::new(),
                };
                rmcp::model::Tool {
                    name: tool.name.clone().into(),
                    title: None,
                    description: Some(tool.description.clone().into()),
                    input_schema: Arc::new(schema_map),
                    output_schema: None,
                    icons: None,
                    annotations: None,
                }
            })
            .collect();

        Ok(ListToolsResult {
            tools,
            next_cursor: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        let arguments = serde_json::Value::Object(request.arguments.unwrap_or_default());
        let response = dispatch_tool_call(&self.loader, &request.name, arguments).await;
        let text = serde_json::to_string_pretty(&response).unwrap_or_else(|_| response.to_string());

        Ok(CallToolResult {
            content: vec![Content::text(text)],
            structured_content: Some(response),
            is_error: None,
            meta: None,
        })
    }

    async fn initialize(
        &self,
        request: InitializeRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<InitializeResult, ErrorData> {
        Ok(InitializeResult {
            protocol_version: request.protocol_version,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "pml".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: Some("Procedural Memory Layer".to_string()),
                icons: None,
                website_url: None,
            },
            instructions: None,
        })
    }
}
