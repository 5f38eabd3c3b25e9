use crate::gateway::{self, Shared};
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Pumps one WebSocket connection: a spawned task drains the outbound queue
/// while this task feeds inbound frames to the gateway. All game state stays
/// behind the room actors; this layer only moves text frames.
pub async fn handle_socket(socket: WebSocket, shared: Arc<Shared>) {
    let (mut sender, mut receiver) = socket.split();
    let conn_id = Uuid::new_v4().to_string();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    shared.register_connection(&conn_id, tx);
    tracing::debug!(conn_id = %conn_id, "connection_opened");

    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if frame.is_empty() {
                continue;
            }
            if sender.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    while let Some(result) = receiver.next().await {
        let Ok(message) = result else { break };
        match message {
            Message::Text(text) => {
                gateway::handle_frame(&shared, &conn_id, &text).await;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    gateway::handle_disconnect(&shared, &conn_id).await;
    shared.unregister_connection(&conn_id);
    tracing::debug!(conn_id = %conn_id, "connection_closed");
    send_task.abort();
}
