use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::agent::api_version::ApiVersion;

/// Which kind of entity a failed lookup was looking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Agent,
    Action,
    Backup,
    BackupManager,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EntityKind::Agent => "Agent",
            EntityKind::Action => "Action",
            EntityKind::Backup => "Backup",
            EntityKind::BackupManager => "Backup manager",
        };
        f.write_str(name)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum OrchestratorError {
    #[error("Unable to {operation} because Agent <{}> is in state <{state}>", agent_id.as_deref().unwrap_or("unrecognized"))]
    IllegalTransition {
        agent_id: Option<String>,
        state: &'static str,
        operation: &'static str,
    },

    #[error("Unable to {operation} because Agent <{agent_id}> uses unsupported API version <{version}>")]
    UnsupportedApiVersion {
        agent_id: String,
        version: ApiVersion,
        operation: &'static str,
    },

    #[error("Invalid registration message: {}", .0.join("; "))]
    InvalidRegistration(Vec<String>),

    #[error("Invalid id <{id}>: {reason}")]
    InvalidId { id: String, reason: &'static str },

    #[error("Agent <{0}> is already registered")]
    AgentAlreadyRegistered(String),

    #[error("Backup <{0}> already exists")]
    DuplicateBackupId(String),

    #[error("Action with id <{0}> already exists")]
    DuplicateActionId(String),

    #[error("{kind} <{id}> not found")]
    NotFound { kind: EntityKind, id: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl OrchestratorError {
    pub fn not_found(kind: EntityKind, id: impl Into<String>) -> Self {
        OrchestratorError::NotFound { kind, id: id.into() }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unprocessable(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<OrchestratorError> for AppError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::NotFound { .. } => AppError::NotFound(err.to_string()),
            OrchestratorError::InvalidId { .. } | OrchestratorError::InvalidRegistration(_) => {
                AppError::BadRequest(err.to_string())
            }
            OrchestratorError::IllegalTransition { .. }
            | OrchestratorError::AgentAlreadyRegistered(_)
            | OrchestratorError::DuplicateBackupId(_)
            | OrchestratorError::DuplicateActionId(_) => AppError::Conflict(err.to_string()),
            OrchestratorError::UnsupportedApiVersion { .. } => AppError::Unprocessable(err.to_string()),
            OrchestratorError::Transport(m) => AppError::Internal(anyhow::anyhow!(m)),
            OrchestratorError::Internal(e) => AppError::Internal(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, msg) = match &self {
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            AppError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
            AppError::Unprocessable(m) => (StatusCode::UNPROCESSABLE_ENTITY, m.clone()),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:#}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".into())
            }
        };
        (status, Json(json!({ "error": msg }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_illegal_transition_message_names_agent_and_state() {
        let err = OrchestratorError::IllegalTransition {
            agent_id: Some("a1".into()),
            state: "Recognized",
            operation: "execute backup",
        };
        assert_eq!(
            err.to_string(),
            "Unable to execute backup because Agent <a1> is in state <Recognized>"
        );
    }

    #[test]
    fn test_registration_error_joins_all_reasons() {
        let err = OrchestratorError::InvalidRegistration(vec!["one".into(), "two".into()]);
        assert_eq!(err.to_string(), "Invalid registration message: one; two");
    }

    #[test]
    fn test_duplicate_backup_maps_to_conflict() {
        let app: AppError = OrchestratorError::DuplicateBackupId("x".into()).into();
        assert!(matches!(app, AppError::Conflict(_)));
        let app: AppError = OrchestratorError::not_found(EntityKind::Backup, "x").into();
        assert!(matches!(app, AppError::NotFound(m) if m == "Backup <x> not found"));
    }
}
