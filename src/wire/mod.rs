//! Agent-facing wire protocol (spec §6): JSON-RPC 2.0 over stdio or HTTP,
//! both transports sharing the same dispatch logic against a [`Loader`].

mod http;
mod protocol;
mod server;

pub use http::router;
pub use protocol::{dispatch_tool_call, ExposedTool};
pub use server::PmlServerHandler;
