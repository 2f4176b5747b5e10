use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

use viewer_api::StoredMessage;

use super::AppState;

// ═══════════════════════════════════════════════════════════════
//  WebSocket: /ws
// ═══════════════════════════════════════════════════════════════

pub(crate) async fn handle_ws(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_connection(socket, state))
}

// ═══════════════════════════════════════════════════════════════
//  Protocol types
// ═══════════════════════════════════════════════════════════════

#[derive(Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum WsAction {
    /// Буфер сообщений одного topic'а.
    Messages { topic: String },
    Search { term: String },
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsReply {
    Messages {
        topic: String,
        messages: Vec<StoredMessage>,
    },
    SearchResult {
        term: String,
        topic: Option<String>,
    },
    /// Клиент не успевал читать: пропущено `skipped` событий.
    Lagged { skipped: u64 },
    Error { error: String },
}

// ═══════════════════════════════════════════════════════════════
//  Connection handler
// ═══════════════════════════════════════════════════════════════

async fn ws_connection(mut socket: WebSocket, state: AppState) {
    let (out_tx, mut out_rx) = mpsc::channel::<String>(state.ws_buffer);
    let mut events = state.viewer.events();

    loop {
        tokio::select! {
            biased;

            msg = socket.recv() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    _ => break,
                };

                let text = match msg {
                    Message::Text(t) => t,
                    Message::Close(_) => break,
                    _ => continue,
                };

                let reply = handle_action(&state, text.as_str()).await;
                if let Some(json) = to_json(&reply) {
                    if socket.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
            }

            event = events.recv() => {
                let json = match event {
                    Ok(event) => to_json(&event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "ws client lagging behind view events");
                        to_json(&WsReply::Lagged { skipped })
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if let Some(json) = json {
                    if out_tx.try_send(json).is_err() {
                        tracing::debug!("ws outbound queue full, event dropped");
                    }
                }
            }

            Some(json) = out_rx.recv() => {
                if socket.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
        }
    }

    tracing::debug!("ws connection closed");
}

async fn handle_action(state: &AppState, text: &str) -> WsReply {
    let action: WsAction = match serde_json::from_str(text) {
        Ok(a) => a,
        Err(e) => return WsReply::Error { error: format!("parse: {e}") },
    };

    let query = state.viewer.query();
    match action {
        WsAction::Messages { topic } => {
            let messages = query.get_messages(&topic).await;
            WsReply::Messages { topic, messages }
        }
        WsAction::Search { term } => {
            let topic = query.search(&term).await;
            WsReply::SearchResult { term, topic }
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> Option<String> {
    match serde_json::to_string(value) {
        Ok(json) => Some(json),
        Err(e) => {
            tracing::error!(error = %e, "ws serialize failed");
            None
        }
    }
}
