use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use serde_json::json;

use tracing::debug;

use crate::bus::StreamMessage;
use crate::state::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let (id, mut rx) = state.bus.subscribe();
    let mut shutdown = state.shutdown.subscribe();

    // Initial frames: the recent-event window and the terminal snapshot
    let initial = {
        let db = state.db.lock().expect("db lock");
        let events = db.recent_events(state.config.initial_events);
        let terminal = db.terminal_snapshot(10);
        (events, terminal)
    };

    let mut ok = true;
    if let Ok(events) = initial.0 {
        ok = send(&mut socket, &StreamMessage::new("initial", json!(events))).await;
    }
    if ok {
        if let Ok((active, completed)) = initial.1 {
            ok = send(
                &mut socket,
                &StreamMessage::new(
                    "terminal_status",
                    json!({ "active": active, "recently_completed": completed }),
                ),
            )
            .await;
        }
    }

    while ok {
        tokio::select! {
            _ = shutdown.changed() => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
            outbound = rx.recv() => {
                match outbound {
                    Some(message) => {
                        if !send(&mut socket, &message).await {
                            break;
                        }
                    }
                    // Bus dropped us (slow subscriber)
                    None => break,
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        debug!(subscriber = id, error = %e, "stream receive error");
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.bus.unsubscribe(id);
}

async fn send(socket: &mut WebSocket, message: &StreamMessage) -> bool {
    match serde_json::to_string(message) {
        Ok(text) => socket.send(Message::Text(text.into())).await.is_ok(),
        Err(_) => true,
    }
}
