use crate::backup_manager::{BackupManager, Ownership};
use crate::error::AppError;
use crate::models::action::ActionRecord;
use crate::models::backup::BackupRecord;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_backup_managers).post(create_backup_manager))
        .route("/{id}", get(get_backup_manager))
        .route("/{id}/backups", get(list_backups))
        .route("/{id}/actions", get(list_actions))
}

#[derive(Debug, Serialize)]
pub struct BackupManagerView {
    pub id: String,
    pub parent_id: String,
    pub agent_ids: Vec<String>,
    pub is_virtual: bool,
    pub agent_visible_id: String,
    pub owned_backups: usize,
    pub readable_backups: usize,
    pub last_action: Option<ActionRecord>,
}

impl From<&BackupManager> for BackupManagerView {
    fn from(manager: &BackupManager) -> Self {
        Self {
            id: manager.id().to_string(),
            parent_id: manager.parent_id().to_string(),
            agent_ids: manager.virtual_information().agent_ids.clone(),
            is_virtual: manager.is_virtual(),
            agent_visible_id: manager.agent_visible_id().to_string(),
            owned_backups: manager.backups(Ownership::Owned).len(),
            readable_backups: manager.backups(Ownership::Readable).len(),
            last_action: manager.last_action().map(|a| a.record()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateBackupManagerRequest {
    pub id: String,
    #[serde(default)]
    pub parent_id: String,
    #[serde(default)]
    pub agent_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct BackupsQuery {
    #[serde(default = "default_ownership")]
    pub ownership: Ownership,
}

fn default_ownership() -> Ownership {
    Ownership::Readable
}

async fn list_backup_managers(State(state): State<Arc<AppState>>) -> Json<Vec<BackupManagerView>> {
    let managers = state
        .backup_managers
        .backup_managers()
        .iter()
        .map(|m| BackupManagerView::from(m.as_ref()))
        .collect();
    Json(managers)
}

async fn get_backup_manager(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<BackupManagerView>, AppError> {
    let manager = state.backup_managers.get_backup_manager(&id)?;
    Ok(Json(BackupManagerView::from(manager.as_ref())))
}

async fn create_backup_manager(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateBackupManagerRequest>,
) -> Result<(StatusCode, Json<BackupManagerView>), AppError> {
    if body.id.is_empty() {
        return Err(AppError::BadRequest("id is required".into()));
    }

    let repository = state.backup_managers.clone();
    let manager = tokio::task::spawn_blocking(move || {
        repository.create_backup_manager(&body.parent_id, &body.id, body.agent_ids)
    })
    .await
    .map_err(|e| anyhow::anyhow!(e))??;

    Ok((StatusCode::CREATED, Json(BackupManagerView::from(manager.as_ref()))))
}

async fn list_backups(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<BackupsQuery>,
) -> Result<Json<Vec<BackupRecord>>, AppError> {
    let manager = state.backup_managers.get_backup_manager(&id)?;
    let backups = manager
        .backups(query.ownership)
        .iter()
        .map(|b| b.record())
        .collect();
    Ok(Json(backups))
}

async fn list_actions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<ActionRecord>>, AppError> {
    let manager = state.backup_managers.get_backup_manager(&id)?;
    Ok(Json(manager.actions().iter().map(|a| a.record()).collect()))
}
