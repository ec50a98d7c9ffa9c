use serde::{Deserialize, Serialize};

/// Atomic primitive exposed by an MCP server. Immutable for the lifetime of
/// its host server process (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    /// Namespaced `server:name`.
    pub id: String,
    /// Fully-qualified domain-style name, e.g. `pml.mcp.<namespace>.<name>`.
    pub fqdn: String,
    pub input_schema: serde_json::Value,
    pub embedding: Vec<f32>,
}

impl Tool {
    pub fn server_name(&self) -> Option<&str> {
        self.id.split_once(':').map(|(server, _)| server)
    }

    pub fn tool_name(&self) -> Option<&str> {
        self.id.split_once(':').map(|(_, name)| name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(id: &str) -> Tool {
        Tool {
            id: id.to_string(),
            fqdn: "pml.mcp.fs.read".to_string(),
            input_schema: serde_json::json!({}),
            embedding: vec![0.0; 4],
        }
    }

    #[test]
    fn splits_server_and_tool_name() {
        let t = tool("filesystem:read_file");
        assert_eq!(t.server_name(), Some("filesystem"));
        assert_eq!(t.tool_name(), Some("read_file"));
    }

    #[test]
    fn malformed_id_has_no_parts() {
        let t = tool("no-colon-here");
        assert_eq!(t.server_name(), None);
    }
}
