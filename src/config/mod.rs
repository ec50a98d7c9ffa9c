//! Configuration (spec §6, ambient per SPEC_FULL §6.2): process-level env
//! config plus the per-workspace `.pml.json` file.

pub mod helpers;
mod process;
mod workspace;

pub use process::{
    CloudConfig, DatabaseConfig, LearningConfig, LoggingConfig, McpConfig, PmlConfig,
    SandboxConfig, ServerConfig, DEFAULT_CLOUD_URL,
};
pub use workspace::{
    CloudSection, PermissionVerdict, PermissionsSection, ServerSection, WorkspaceConfig,
    WORKSPACE_CONFIG_FILENAME, WORKSPACE_CONFIG_VERSION,
};
