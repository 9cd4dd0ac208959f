use crate::agent::AgentInfo;
use crate::error::AppError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_agents))
        .route("/{id}", get(get_agent))
        .route("/{id}/cancel", post(cancel_action))
}

async fn list_agents(State(state): State<Arc<AppState>>) -> Result<Json<Vec<AgentInfo>>, AppError> {
    let agents = state
        .agents
        .agents()
        .iter()
        .filter_map(|agent| agent.info().ok())
        .collect();
    Ok(Json(agents))
}

async fn get_agent(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<AgentInfo>, AppError> {
    let agent = state.agents.agent(&id)?;
    Ok(Json(agent.info()?))
}

async fn cancel_action(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<AgentInfo>, AppError> {
    let agent = state.agents.agent(&id)?;
    let info = tokio::task::spawn_blocking(move || {
        agent.cancel_action()?;
        agent.info()
    })
    .await
    .map_err(|e| anyhow::anyhow!(e))??;
    tracing::info!(agent_id = %id, "Cancel requested through control plane");
    Ok(Json(info))
}
