pub mod agents;
pub mod backup_managers;

use crate::state::AppState;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api/agents", agents::router())
        .nest("/api/backup-managers", backup_managers::router())
        .route("/ws/agent", get(crate::ws::agent_socket::ws_handler))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health(axum::extract::State(state): axum::extract::State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "initialized": state.backup_managers.is_initialized(),
        "agents": state.agents.agents().len(),
        "vbrm_auto_create": format!("{:?}", state.config.vbrm_auto_create).to_uppercase(),
        "delete_vbrm": state.config.delete_vbrm,
    }))
}
