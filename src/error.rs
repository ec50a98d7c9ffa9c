//! Error taxonomy for the PML core.
//!
//! Kinds mirror spec §7: configuration/workspace errors are fatal at
//! startup, routing/network errors degrade to an `{status:"error"}` agent
//! response, approval errors are a typed pause (not an exception the
//! procedure can swallow), execution errors are wrapped and still traced.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::domain::ApprovalType;

#[derive(Debug, thiserror::Error)]
pub enum PmlError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid workspace: {0}")]
    Workspace(String),

    #[error("routing/network error: {0}")]
    Routing(String),

    #[error("approval required")]
    ApprovalRequired {
        approval_type: ApprovalType,
        workflow_id: String,
        description: String,
        context: serde_json::Value,
    },

    #[error("execution error [{code}]: {message}")]
    Execution { code: String, message: String },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type PmlResult<T> = Result<T, PmlError>;

impl PmlError {
    pub fn execution(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Error code used by the sandbox/bridge layer (`EXECUTION_TIMEOUT`,
    /// `WORKER_TERMINATED`, `PARSE_ERROR`, `RPC_TIMEOUT`, `PERMISSION_DENIED`,
    /// `EXECUTION_ERROR`).
    pub fn code(&self) -> &'static str {
        match self {
            PmlError::Configuration(_) => "CONFIGURATION_ERROR",
            PmlError::Workspace(_) => "WORKSPACE_ERROR",
            PmlError::Routing(_) => "NETWORK_ERROR",
            PmlError::ApprovalRequired { .. } => "APPROVAL_REQUIRED",
            PmlError::Execution { code, .. } => {
                // Leak is avoided: known codes are static strings already.
                match code.as_str() {
                    "EXECUTION_TIMEOUT" => "EXECUTION_TIMEOUT",
                    "WORKER_TERMINATED" => "WORKER_TERMINATED",
                    "PARSE_ERROR" => "PARSE_ERROR",
                    "RPC_TIMEOUT" => "RPC_TIMEOUT",
                    _ => "EXECUTION_ERROR",
                }
            }
            PmlError::PermissionDenied(_) => "PERMISSION_DENIED",
            PmlError::NotFound(_) => "NOT_FOUND",
            PmlError::Database(_) => "DATABASE_ERROR",
            PmlError::Http(_) => "NETWORK_ERROR",
            PmlError::Io(_) => "IO_ERROR",
            PmlError::Serde(_) => "PARSE_ERROR",
        }
    }

    /// Render as the wire protocol's `{status:"error"}` or
    /// `{status:"approval_required"}` shape (spec §6).
    pub fn to_wire_json(&self) -> serde_json::Value {
        if let PmlError::ApprovalRequired {
            approval_type,
            workflow_id,
            description,
            context,
        } = self
        {
            return json!({
                "status": "approval_required",
                "approval_type": approval_type,
                "workflow_id": workflow_id,
                "description": description,
                "context": context,
                "options": ["continue", "abort"],
            });
        }

        json!({
            "status": "error",
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            },
            "executed_locally": true,
        })
    }
}

impl IntoResponse for PmlError {
    fn into_response(self) -> Response {
        let status = match &self {
            PmlError::ApprovalRequired { .. } => StatusCode::OK,
            PmlError::NotFound(_) => StatusCode::NOT_FOUND,
            PmlError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            PmlError::Configuration(_) | PmlError::Workspace(_) => StatusCode::INTERNAL_SERVER_ERROR,
            PmlError::Routing(_) | PmlError::Http(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::OK,
        };
        (status, Json(self.to_wire_json())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_error_code_passthrough() {
        let err = PmlError::execution("EXECUTION_TIMEOUT", "timed out");
        assert_eq!(err.code(), "EXECUTION_TIMEOUT");
    }

    #[test]
    fn unknown_execution_code_falls_back() {
        let err = PmlError::execution("WEIRD", "oops");
        assert_eq!(err.code(), "EXECUTION_ERROR");
    }

    #[test]
    fn approval_required_wire_shape() {
        let err = PmlError::ApprovalRequired {
            approval_type: ApprovalType::Integrity,
            workflow_id: "wf-1".into(),
            description: "hash drift".into(),
            context: json!({"old_hash": "a", "new_hash": "b"}),
        };
        let v = err.to_wire_json();
        assert_eq!(v["status"], "approval_required");
        assert_eq!(v["workflow_id"], "wf-1");
    }
}
