use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::agent::stream::{AgentCommandSink, WsAgentStream};
use crate::agent::Agent;
use crate::error::OrchestratorError;
use crate::protocol::AgentControl;
use crate::state::AppState;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_agent_socket(socket, state))
}

async fn handle_agent_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let stream = WsAgentStream::new(tx);
    let closed = stream.closed();
    let agent = Agent::new(Arc::new(stream.clone()), state.agents.clone());

    // Forward outgoing commands to the agent, flushing what is queued once the connection is closed
    let send_task = {
        let closed = closed.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = rx.recv() => match msg {
                        Some(msg) => {
                            if sender.send(Message::Text(msg.into())).await.is_err() {
                                return;
                            }
                        }
                        None => return,
                    },
                    _ = closed.cancelled() => break,
                }
            }
            while let Ok(msg) = rx.try_recv() {
                if sender.send(Message::Text(msg.into())).await.is_err() {
                    return;
                }
            }
            let _ = sender.send(Message::Close(None)).await;
        })
    };

    loop {
        let msg = tokio::select! {
            msg = receiver.next() => msg,
            _ = closed.cancelled() => break,
        };
        let text = match msg {
            Some(Ok(Message::Text(t))) => t.to_string(),
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
            Some(Ok(_)) => continue,
        };

        let message: AgentControl = match serde_json::from_str(&text) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("Discarding malformed agent message: {e}");
                continue;
            }
        };

        let processing = agent.clone();
        let result = tokio::task::spawn_blocking(move || processing.process_message(&message)).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e @ OrchestratorError::InvalidRegistration(_))) => {
                tracing::warn!("Rejecting agent registration: {e}");
                stream.reject_registration(&e.to_string());
                stream.close();
                break;
            }
            Ok(Err(e)) => tracing::warn!(agent = ?agent, "Failed to process agent message: {e}"),
            Err(e) => tracing::error!("Agent message task failed: {e}"),
        }
    }

    // Cleanup on disconnect
    let closing = agent.clone();
    if let Err(e) = tokio::task::spawn_blocking(move || closing.close_connection()).await {
        tracing::error!("Agent close task failed: {e}");
    }
    let _ = send_task.await;
}
