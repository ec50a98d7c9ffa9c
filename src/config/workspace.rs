//! `.pml.json` workspace configuration (spec §6).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PmlError, PmlResult};

pub const WORKSPACE_CONFIG_FILENAME: &str = ".pml.json";
pub const WORKSPACE_CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudSection {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    pub port: u16,
}

/// `{allow[], deny[], ask[]}`. Evaluated first-match-wins in that order by
/// the permission gate (spec §4.E step 3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionsSection {
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
    #[serde(default)]
    pub ask: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    pub version: u32,
    pub workspace: String,
    pub cloud: CloudSection,
    pub server: ServerSection,
    #[serde(default)]
    pub permissions: PermissionsSection,
}

impl WorkspaceConfig {
    pub fn scaffold(workspace_name: &str, cloud_url: &str) -> Self {
        Self {
            version: WORKSPACE_CONFIG_VERSION,
            workspace: workspace_name.to_string(),
            cloud: CloudSection {
                url: cloud_url.to_string(),
            },
            server: ServerSection { port: 7337 },
            permissions: PermissionsSection::default(),
        }
    }

    pub fn load(path: &Path) -> PmlResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| PmlError::Workspace(format!("cannot read {}: {e}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| PmlError::Workspace(format!("malformed {}: {e}", path.display())))
    }

    pub fn save(&self, path: &Path) -> PmlResult<()> {
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw)
            .map_err(|e| PmlError::Workspace(format!("cannot write {}: {e}", path.display())))
    }

    /// First-match-wins evaluation of a tool FQDN against `{allow, deny, ask}`
    /// (spec §4.E step 3). `None` means no rule matched: caller defaults to
    /// asking.
    pub fn evaluate_permission(&self, fqdn: &str) -> Option<PermissionVerdict> {
        for rule in &self.permissions.allow {
            if glob_match(rule, fqdn) {
                return Some(PermissionVerdict::Allow);
            }
        }
        for rule in &self.permissions.deny {
            if glob_match(rule, fqdn) {
                return Some(PermissionVerdict::Deny);
            }
        }
        for rule in &self.permissions.ask {
            if glob_match(rule, fqdn) {
                return Some(PermissionVerdict::Ask);
            }
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionVerdict {
    Allow,
    Deny,
    Ask,
}

/// Minimal glob: `*` matches any suffix/prefix/substring span, exact match
/// otherwise. Sufficient for `fs.*`, `*.write`, `pml.mcp.fs.write` style
/// patterns without pulling in a glob crate for three characters of syntax.
fn glob_match(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    match (pattern.strip_prefix('*'), pattern.strip_suffix('*')) {
        (Some(suffix), _) if pattern.ends_with('*') => {
            let inner = &suffix[..suffix.len() - 1];
            value.contains(inner)
        }
        (Some(suffix), _) => value.ends_with(suffix),
        (None, Some(prefix)) => value.starts_with(prefix),
        (None, None) => value == pattern,
    }
}
