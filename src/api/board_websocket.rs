use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use warp::ws::{Message, WebSocket};

use crate::board::{RoomRegistry, Session};

pub async fn handle_board_websocket(websocket: WebSocket, registry: Arc<RoomRegistry>) {
    let (mut ws_sender, mut ws_receiver) = websocket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let mut session = Session::new(registry, tx);
    let connection_id = session.connection_id();
    tracing::info!(connection_id, "New board WebSocket connection established");

    // A close frame queued by the room ends the writer, which in turn ends
    // the read loop below.
    let mut sender_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = message.is_close();
            if let Err(e) = ws_sender.send(message).await {
                tracing::debug!(connection_id, error = %e, "Failed to send WebSocket message");
                break;
            }
            if closing {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(message)) => {
                    if message.is_close() {
                        break;
                    }
                    handle_websocket_message(&mut session, message).await;
                }
                Some(Err(e)) => {
                    tracing::warn!(connection_id, error = %e, "WebSocket error");
                    break;
                }
                None => break,
            },
            _ = &mut sender_task => {
                tracing::debug!(connection_id, "Outbound stream finished");
                break;
            }
        }
    }

    session.disconnect().await;
    sender_task.abort();
    tracing::info!(connection_id, "Board WebSocket connection closed");
}

async fn handle_websocket_message(session: &mut Session, message: Message) {
    if let Ok(text) = message.to_str() {
        tracing::debug!(
            connection_id = session.connection_id(),
            len = text.len(),
            "Received board message"
        );
        session.handle_text(text).await;
    } else if message.is_binary() {
        tracing::debug!(connection_id = session.connection_id(), "Ignoring binary frame");
    }
}
