//! WebSocket trace feed.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct TraceQuery {
    /// Only forward events for this key.
    pub key: Option<String>,
}

/// Stream trace events as JSON text frames.
pub async fn trace_stream(
    ws: WebSocketUpgrade,
    Query(query): Query<TraceQuery>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_trace_stream(socket, query.key, state))
}

async fn handle_trace_stream(mut socket: WebSocket, key: Option<String>, state: AppState) {
    let mut events = state.host.subscribe();
    let hello = serde_json::json!({
        "type": "connected",
        "key": key,
    });
    if socket.send(Message::Text(hello.to_string())).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                let frame = match event {
                    Ok(event) => {
                        if key.as_deref().is_some_and(|k| k != event.key()) {
                            continue;
                        }
                        match serde_json::to_string(&event) {
                            Ok(json) => json,
                            Err(err) => {
                                warn!(error = %err, "trace event not serializable");
                                continue;
                            }
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        serde_json::json!({"type": "lagged", "skipped": skipped}).to_string()
                    }
                    Err(RecvError::Closed) => break,
                };
                if socket.send(Message::Text(frame)).await.is_err() {
                    break;
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        let _ = socket.send(Message::Pong(data)).await;
                    }
                    _ => {}
                }
            }
        }
    }
    debug!("trace stream closed");
}
