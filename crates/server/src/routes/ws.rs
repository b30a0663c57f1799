// crates/server/src/routes/ws.rs
//! WebSocket stream of job events.
//!
//! - `WS /ws` -- sends `connected { active_jobs }`, then every job event as a
//!   JSON text frame. A text frame `ping` is answered with `pong`.

use std::sync::Arc;

use axum::{
    extract::ws::{Message, WebSocket},
    extract::{State, WebSocketUpgrade},
    response::Response,
    routing::get,
    Router,
};

use crate::state::AppState;

/// Build the WebSocket router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/ws", get(ws_handler))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_events_ws(socket, state))
}

async fn handle_events_ws(mut socket: WebSocket, state: Arc<AppState>) {
    // Unsubscribes on drop, whichever way the loop exits.
    let mut sub = state.controller.subscribe();
    tracing::debug!(subscriber = sub.id(), "WebSocket client connected");

    loop {
        tokio::select! {
            event = sub.recv() => {
                let Some(event) = event else {
                    tracing::debug!(subscriber = sub.id(), "Subscriber dropped by hub, closing socket");
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                };
                let json = match serde_json::to_string(&event) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to serialize job event");
                        continue;
                    }
                };
                if socket.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            msg = socket.recv() => match msg {
                Some(Ok(Message::Text(text))) if text.as_str() == "ping" => {
                    if socket.send(Message::Text("pong".into())).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "WebSocket receive error");
                    break;
                }
            },
        }
    }

    tracing::debug!(subscriber = sub.id(), "WebSocket client disconnected");
}
