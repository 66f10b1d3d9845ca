use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::{
    metrics::REALTIME_CONNECTIONS_ACTIVE,
    models::{ClientMessage, RoomId, ServerMessage},
    services::{room_hub::ConnId, AppState},
};

const OUTBOUND_BUFFER: usize = 64;

/// GET /api/v1/realtime
pub async fn realtime_socket(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let conn: ConnId = Uuid::new_v4();
    REALTIME_CONNECTIONS_ACTIVE.inc();
    tracing::debug!(conn = %conn, "Realtime connection opened");

    // Split so room forwarders and the reader can both produce output.
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(OUTBOUND_BUFFER);

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to encode realtime frame");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut forwarders: HashMap<RoomId, JoinHandle<()>> = HashMap::new();

    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(conn = %conn, error = %e, "Realtime read failed");
                break;
            }
        };

        match frame {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(text.as_str()) {
                Ok(message) => {
                    handle_client_message(&state, conn, message, &tx, &mut forwarders).await;
                }
                Err(e) => {
                    let notice = ServerMessage::ErrorNotice {
                        room: None,
                        message: format!("Malformed frame: {}", e),
                    };
                    if tx.send(notice).await.is_err() {
                        break;
                    }
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    for (_, handle) in forwarders.drain() {
        handle.abort();
    }
    state.live_quizzes.disconnect(conn).await;
    drop(tx);
    let _ = writer.await;

    REALTIME_CONNECTIONS_ACTIVE.dec();
    tracing::debug!(conn = %conn, "Realtime connection closed");
}

async fn handle_client_message(
    state: &AppState,
    conn: ConnId,
    message: ClientMessage,
    tx: &mpsc::Sender<ServerMessage>,
    forwarders: &mut HashMap<RoomId, JoinHandle<()>>,
) {
    match message {
        ClientMessage::Join { room, identity } => {
            match state.live_quizzes.join(conn, &room, identity).await {
                Ok(outcome) => {
                    if let Some(previous) = forwarders.remove(&room) {
                        previous.abort();
                    }
                    for initial in outcome.initial {
                        if tx.send(initial).await.is_err() {
                            return;
                        }
                    }
                    let handle = tokio::spawn(forward_room(
                        room.clone(),
                        outcome.receiver,
                        tx.clone(),
                    ));
                    forwarders.insert(room, handle);
                }
                Err(e) => {
                    tracing::debug!(conn = %conn, room = %room, error = %e, "Join refused");
                    let _ = tx
                        .send(ServerMessage::ErrorNotice {
                            room: Some(room),
                            message: e.to_string(),
                        })
                        .await;
                }
            }
        }
        ClientMessage::Leave { room } => {
            if let Some(handle) = forwarders.remove(&room) {
                handle.abort();
            }
            state.live_quizzes.leave(conn, &room).await;
        }
        ClientMessage::Ping => {
            let _ = tx.send(ServerMessage::Pong).await;
        }
    }
}

/// Relays one room's broadcasts to the socket until the room ends or the socket goes away.
async fn forward_room(
    room: RoomId,
    mut receiver: broadcast::Receiver<ServerMessage>,
    tx: mpsc::Sender<ServerMessage>,
) {
    loop {
        match receiver.recv().await {
            Ok(message) => {
                let terminal = matches!(message, ServerMessage::Ended { .. });
                if tx.send(message).await.is_err() || terminal {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                // the next full snapshot resyncs the client
                tracing::warn!(room = %room, skipped, "Realtime subscriber lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
