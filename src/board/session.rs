use std::sync::Arc;

use super::broadcast::unicast;
use super::ids;
use super::protocol::{ClientMessage, ServerMessage};
use super::registry::RoomRegistry;
use super::room::{ConnectionId, Member, OutboundSender, Room};
use crate::error::{BoardError, Result};

const DEFAULT_DISPLAY_NAME: &str = "Anonymous";
/// Longest prefix of a rejected payload that makes it into the logs.
const LOGGED_PAYLOAD_PREFIX: usize = 128;

/// Where a connection is in its life. A session joins at most one room and
/// never goes back to `Unattached`.
pub enum SessionState {
    Unattached,
    Attached(Arc<Room>),
    Closed,
}

/// Server side of one client connection: interprets inbound messages and
/// applies them to the joined room.
pub struct Session {
    connection_id: ConnectionId,
    client_id: Option<String>,
    name: String,
    state: SessionState,
    outbound: OutboundSender,
    registry: Arc<RoomRegistry>,
}

impl Session {
    pub fn new(registry: Arc<RoomRegistry>, outbound: OutboundSender) -> Self {
        Self {
            connection_id: registry.next_connection_id(),
            client_id: None,
            name: DEFAULT_DISPLAY_NAME.to_string(),
            state: SessionState::Unattached,
            outbound,
            registry,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn room(&self) -> Option<&Arc<Room>> {
        match &self.state {
            SessionState::Attached(room) => Some(room),
            _ => None,
        }
    }

    /// Handle one raw text frame. Unparseable payloads are logged and
    /// answered with an `error`; they never end the session.
    pub async fn handle_text(&mut self, text: &str) {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => self.handle_message(message).await,
            Err(e) => {
                tracing::warn!(
                    connection_id = self.connection_id,
                    error = %e,
                    raw_len = text.len(),
                    raw_prefix = %payload_prefix(text),
                    "Failed to parse board message"
                );
                self.report(BoardError::from(e));
            }
        }
    }

    pub async fn handle_message(&mut self, message: ClientMessage) {
        if matches!(self.state, SessionState::Closed) {
            return;
        }

        if let Err(e) = self.apply(message).await {
            if e.is_client_facing() {
                tracing::debug!(
                    connection_id = self.connection_id,
                    error = %e,
                    "Rejected client message"
                );
                self.report(e);
            } else {
                tracing::debug!(
                    connection_id = self.connection_id,
                    error = %e,
                    "Ignoring client message"
                );
            }
        }
    }

    async fn apply(&mut self, message: ClientMessage) -> Result<()> {
        match message {
            ClientMessage::Create { client_id, name } => {
                self.ensure_unattached()?;
                self.identify(client_id, name);

                let room = self.registry.create_room(self.member()?).await;
                self.state = SessionState::Attached(room);
            }

            ClientMessage::Join {
                room_id,
                client_id,
                name,
            } => {
                self.ensure_unattached()?;
                self.identify(client_id, name);

                let room = self.registry.join_room(&room_id, self.member()?).await?;
                self.state = SessionState::Attached(room);
            }

            ClientMessage::Opinion { opinion } => {
                let (room, client_id) = self.attached()?;
                room.post_opinion(client_id, opinion).await?;
            }

            ClientMessage::Vote { opinion_id } => {
                let (room, client_id) = self.attached()?;
                room.vote(client_id, &opinion_id).await?;
            }

            ClientMessage::Reaction { opinion_id, emoji } => {
                let (room, client_id) = self.attached()?;
                room.toggle_reaction(client_id, &opinion_id, &emoji).await?;
            }

            ClientMessage::Move { opinion_id, x, y } => {
                let connection_id = self.connection_id;
                let (room, _) = self.attached()?;
                room.move_opinion(connection_id, &opinion_id, x, y).await?;
            }

            ClientMessage::Delete { opinion_id } => {
                let (room, client_id) = self.attached()?;
                room.delete_opinion(client_id, &opinion_id).await?;
            }

            ClientMessage::Unknown => {
                tracing::debug!(
                    connection_id = self.connection_id,
                    "Ignoring unknown message type"
                );
            }
        }
        Ok(())
    }

    /// The connection is gone. Anything already applied stays applied.
    pub async fn disconnect(&mut self) {
        let state = std::mem::replace(&mut self.state, SessionState::Closed);
        let client_id = self.client_id.as_deref();
        if let (SessionState::Attached(room), Some(client_id)) = (state, client_id) {
            self.registry
                .leave_room(&room, client_id, self.connection_id)
                .await;
        }
        tracing::debug!(connection_id = self.connection_id, "Session closed");
    }

    fn ensure_unattached(&self) -> Result<()> {
        match &self.state {
            SessionState::Attached(room) => Err(BoardError::AlreadyInRoom(room.code().to_string())),
            SessionState::Unattached | SessionState::Closed => Ok(()),
        }
    }

    fn attached(&self) -> Result<(&Arc<Room>, &str)> {
        match (&self.state, self.client_id.as_deref()) {
            (SessionState::Attached(room), Some(client_id)) => Ok((room, client_id)),
            _ => Err(BoardError::NotInRoom),
        }
    }

    /// Adopt the identity the client presents, or a generated one.
    fn identify(&mut self, client_id: Option<String>, name: Option<String>) {
        let client_id = client_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(ids::new_entity_id);
        self.client_id = Some(client_id);

        if let Some(name) = name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()) {
            self.name = name;
        }
    }

    fn member(&self) -> Result<Member> {
        let client_id = self
            .client_id
            .clone()
            .ok_or_else(|| BoardError::internal("session has no identity"))?;
        Ok(Member {
            client_id,
            name: self.name.clone(),
            connection_id: self.connection_id,
            sender: self.outbound.clone(),
        })
    }

    fn report(&self, error: BoardError) {
        unicast(
            &self.outbound,
            &ServerMessage::Error {
                message: error.to_string(),
            },
        );
    }
}

/// Cut `text` to at most `LOGGED_PAYLOAD_PREFIX` bytes on a char boundary.
fn payload_prefix(text: &str) -> &str {
    if text.len() <= LOGGED_PAYLOAD_PREFIX {
        return text;
    }
    let mut end = LOGGED_PAYLOAD_PREFIX;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
