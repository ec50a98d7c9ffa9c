//! MCP Stdio Manager: owns long-lived subprocess tool servers that speak
//! JSON-RPC 2.0 over stdin/stdout.

pub mod health;
mod manager;
mod protocol;
mod transport;

pub use health::{HealthMonitor, ServerHealth};
pub use manager::{McpStdioManager, ServerSpec};
pub use protocol::{JsonRpcRequest, JsonRpcResponse, McpToolDescriptor, RequestId};
