use tokio::sync::mpsc;
use warp::ws::Message;

use super::protocol::ServerMessage;
use super::room::{ConnectionId, Member};
use crate::error::{BoardError, Result};

/// Who in a room receives a broadcast.
#[derive(Debug, Clone, Copy)]
pub enum Recipients<'a> {
    All,
    /// Everyone except one connection, e.g. the sender of a move.
    ExceptConnection(ConnectionId),
    /// Everyone except every connection of one client identity.
    ExceptClient(&'a str),
}

impl Recipients<'_> {
    fn includes(&self, member: &Member) -> bool {
        match self {
            Recipients::All => true,
            Recipients::ExceptConnection(id) => member.connection_id != *id,
            Recipients::ExceptClient(client_id) => member.client_id != *client_id,
        }
    }
}

pub fn encode(message: &ServerMessage) -> Result<String> {
    serde_json::to_string(message)
        .map_err(|e| BoardError::internal(format!("failed to encode server message: {e}")))
}

/// Deliver one message to the selected members of a room.
///
/// The message is encoded once. Members whose connection is already gone
/// are skipped and a failed send never stops delivery to the rest.
/// Returns the number of members the message was handed to.
pub fn broadcast<'a>(
    members: impl IntoIterator<Item = &'a Member>,
    message: &ServerMessage,
    recipients: Recipients<'_>,
) -> usize {
    let text = match encode(message) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(error = %e, "Dropping broadcast");
            return 0;
        }
    };

    let mut delivered = 0;
    for member in members {
        if !recipients.includes(member) {
            continue;
        }
        if member.sender.is_closed() {
            tracing::debug!(client_id = %member.client_id, "Skipping closed connection");
            continue;
        }
        if member.sender.send(Message::text(text.clone())).is_err() {
            tracing::warn!(client_id = %member.client_id, "Failed to queue broadcast");
            continue;
        }
        delivered += 1;
    }
    delivered
}

/// Send a message to a single connection.
pub fn unicast(sender: &mpsc::UnboundedSender<Message>, message: &ServerMessage) -> bool {
    match encode(message) {
        Ok(text) => sender.send(Message::text(text)).is_ok(),
        Err(e) => {
            tracing::error!(error = %e, "Dropping unicast");
            false
        }
    }
}
