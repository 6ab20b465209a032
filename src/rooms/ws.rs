use std::sync::Arc;

use axum::{
    body::Bytes,
    debug_handler,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{AppState, db::ChatMessage, session::CurrentUser};

use super::{ChatCoordinator, ChatSettings, Connection};

const OUTBOUND_BUFFER: usize = 64;

/// Inbound websocket frame.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum ClientFrame {
    Join {
        rental_id: Uuid,
    },
    Chat {
        rental_id: Uuid,
        sender_id: Option<Uuid>,
        body: String,
    },
}

#[debug_handler(state = AppState)]
pub(crate) async fn chat_ws(
    State(chat): State<ChatCoordinator>,
    State(settings): State<ChatSettings>,
    CurrentUser(user): CurrentUser,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| run_connection(socket, chat, settings, user.id))
}

/// Drives one websocket until either side closes it.
async fn run_connection(socket: WebSocket, chat: ChatCoordinator, settings: ChatSettings, user_id: Uuid) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Arc<ChatMessage>>(OUTBOUND_BUFFER);

    let conn = Arc::new(Connection::new(user_id, tx));
    chat.registry().register(conn.clone());
    info!(conn_id = %conn.id, %user_id, "chat connection opened");

    let writer_conn = conn.clone();
    let writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(settings.ping_interval);
        // the first tick completes immediately
        ping.tick().await;

        loop {
            tokio::select! {
                _ = writer_conn.closed() => break,
                message = rx.recv() => {
                    let Some(message) = message else { break };
                    let text = match serde_json::to_string(&*message) {
                        Ok(text) => text,
                        Err(err) => {
                            warn!(conn_id = %writer_conn.id, error = %err, "could not encode chat message");
                            continue;
                        }
                    };
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }

        let _ = sink.send(Message::Close(None)).await;
        writer_conn.close();
    });

    loop {
        let frame = tokio::select! {
            _ = conn.closed() => break,
            frame = stream.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => {
                conn.touch();
                handle_frame(&chat, &conn, text.as_str().as_bytes()).await;
            }
            Some(Ok(Message::Binary(bytes))) => {
                conn.touch();
                handle_frame(&chat, &conn, &bytes).await;
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => conn.touch(),
            Some(Ok(Message::Close(_))) | None => break,
            Some(Err(err)) => {
                debug!(conn_id = %conn.id, error = %err, "websocket read failed");
                break;
            }
        }
    }

    conn.close();
    chat.registry().unregister(conn.id);
    if let Err(err) = writer.await {
        warn!(conn_id = %conn.id, error = %err, "websocket writer task failed");
    }
    info!(conn_id = %conn.id, %user_id, "chat connection closed");
}

/// Applies one inbound frame. Bad frames are logged and dropped.
pub(crate) async fn handle_frame(chat: &ChatCoordinator, conn: &Connection, raw: &[u8]) {
    let frame: ClientFrame = match serde_json::from_slice(raw) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(conn_id = %conn.id, error = %err, "dropping malformed frame");
            return;
        }
    };

    match frame {
        ClientFrame::Join { rental_id } => {
            let previous = chat.registry().join(conn.id, rental_id);
            info!(conn_id = %conn.id, %rental_id, ?previous, "joined chat room");
        }
        ClientFrame::Chat {
            rental_id,
            sender_id,
            body,
        } => {
            if sender_id.is_some_and(|sender_id| sender_id != conn.user_id) {
                warn!(conn_id = %conn.id, ?sender_id, "dropping frame sent on behalf of another user");
                return;
            }
            if chat.registry().room_of(conn.id) != Some(rental_id) {
                warn!(conn_id = %conn.id, %rental_id, "dropping chat frame for a room not joined");
                return;
            }

            if let Err(err) = chat.post(conn.user_id, rental_id, &body).await {
                warn!(conn_id = %conn.id, %rental_id, error = %err, "chat message refused");
            }
        }
    }
}
