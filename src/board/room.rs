use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, Mutex, MutexGuard};
use warp::ws::Message;

use super::broadcast::{broadcast, Recipients};
use super::ids;
use super::lifecycle::{CloseReason, RoomTimers};
use super::protocol::{NewOpinion, OpinionView, ServerMessage, UserInfo};
use crate::error::{BoardError, Result};

pub type ConnectionId = u64;
pub type OutboundSender = mpsc::UnboundedSender<Message>;

/// A connected client as seen by a room. The connection itself is owned by
/// its session; the room only holds the outbound queue.
#[derive(Debug, Clone)]
pub struct Member {
    pub client_id: String,
    pub name: String,
    pub connection_id: ConnectionId,
    pub sender: OutboundSender,
}

impl Member {
    fn close_connection(&self) {
        let _ = self.sender.send(Message::close());
    }
}

#[derive(Debug, Clone)]
pub struct Opinion {
    pub id: String,
    pub text: String,
    pub image_url: Option<String>,
    pub x: f64,
    pub y: f64,
    voted_by: HashSet<String>,
    reactions: HashMap<String, HashSet<String>>,
    pub creator_id: String,
    pub created_at: u64,
}

impl Opinion {
    pub fn new(creator_id: &str, content: NewOpinion) -> Self {
        Self {
            id: ids::new_entity_id(),
            text: content.text,
            image_url: content.image_url,
            x: content.x,
            y: content.y,
            voted_by: HashSet::new(),
            reactions: HashMap::new(),
            creator_id: creator_id.to_string(),
            created_at: unix_millis(),
        }
    }

    pub fn votes(&self) -> usize {
        self.voted_by.len()
    }

    /// Record a vote. Returns the new count, or `None` if this client had
    /// already voted.
    pub fn vote(&mut self, client_id: &str) -> Option<usize> {
        if self.voted_by.insert(client_id.to_string()) {
            Some(self.votes())
        } else {
            None
        }
    }

    /// Flip this client's reaction. Returns the emoji's new count; an emoji
    /// nobody holds any more is dropped from the map.
    pub fn toggle_reaction(&mut self, client_id: &str, emoji: &str) -> usize {
        let reactors = self.reactions.entry(emoji.to_string()).or_default();
        if !reactors.remove(client_id) {
            reactors.insert(client_id.to_string());
        }

        let count = reactors.len();
        if count == 0 {
            self.reactions.remove(emoji);
        }
        count
    }

    pub fn view(&self) -> OpinionView {
        OpinionView {
            id: self.id.clone(),
            text: self.text.clone(),
            image_url: self.image_url.clone(),
            x: self.x,
            y: self.y,
            votes: self.votes(),
            reactions: self
                .reactions
                .iter()
                .map(|(emoji, reactors)| (emoji.clone(), reactors.len()))
                .collect::<BTreeMap<_, _>>(),
            creator_id: self.creator_id.clone(),
            created_at: self.created_at,
        }
    }
}

/// Mutable per-room aggregate, only reachable through the room's lock.
#[derive(Debug, Default)]
pub struct RoomState {
    pub(crate) members: HashMap<String, Member>,
    /// Kept in posting order for the initial sync of joiners.
    pub(crate) opinions: Vec<Opinion>,
    pub(crate) timers: RoomTimers,
    pub(crate) closed: bool,
}

impl RoomState {
    /// Add a member. A client already present under another connection is
    /// replaced and its old connection closed; returns whether that happened.
    pub(crate) fn insert_member(&mut self, member: Member) -> bool {
        let Some(previous) = self.members.insert(member.client_id.clone(), member) else {
            return false;
        };
        tracing::info!(
            client_id = %previous.client_id,
            connection_id = previous.connection_id,
            "Client reconnected, closing previous connection"
        );
        previous.close_connection();
        true
    }

    /// Remove the member bound to this connection. A stale connection whose
    /// identity has since reconnected leaves the newer membership alone.
    pub(crate) fn remove_member(&mut self, client_id: &str, connection_id: ConnectionId) -> bool {
        match self.members.get(client_id) {
            Some(member) if member.connection_id == connection_id => {
                self.members.remove(client_id);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn users(&self, owner_id: &str) -> Vec<UserInfo> {
        let mut users: Vec<UserInfo> = self
            .members
            .values()
            .map(|m| UserInfo {
                id: m.client_id.clone(),
                name: m.name.clone(),
                is_owner: m.client_id == owner_id,
            })
            .collect();
        users.sort_by(|a, b| b.is_owner.cmp(&a.is_owner).then_with(|| a.id.cmp(&b.id)));
        users
    }

    pub(crate) fn opinion_views(&self) -> Vec<OpinionView> {
        self.opinions.iter().map(Opinion::view).collect()
    }

    pub(crate) fn broadcast(&self, message: &ServerMessage, recipients: Recipients<'_>) -> usize {
        broadcast(self.members.values(), message, recipients)
    }

    fn opinion_mut(&mut self, opinion_id: &str) -> Result<&mut Opinion> {
        self.opinions
            .iter_mut()
            .find(|o| o.id == opinion_id)
            .ok_or_else(|| BoardError::OpinionNotFound(opinion_id.to_string()))
    }

    /// Notify everyone, disconnect them and drop all content. Timers are
    /// cancelled last so a timer task running this is not cut short.
    pub(crate) fn close(&mut self, reason: CloseReason) {
        self.broadcast(
            &ServerMessage::RoomClosing {
                reason: reason.to_string(),
            },
            Recipients::All,
        );
        for member in self.members.values() {
            member.close_connection();
        }
        self.members.clear();
        self.opinions.clear();
        self.closed = true;
        self.timers.cancel_all();
    }
}

/// A code-addressed collaboration room.
#[derive(Debug)]
pub struct Room {
    code: String,
    generation: u64,
    owner_id: String,
    state: Mutex<RoomState>,
}

impl Room {
    pub(crate) fn new(code: String, generation: u64, owner_id: String, state: RoomState) -> Self {
        Self {
            code,
            generation,
            owner_id,
            state: Mutex::new(state),
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    /// Distinguishes this room from earlier rooms that used the same code.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, RoomState> {
        self.state.lock().await
    }

    /// Lock the room for a mutation. A closed room behaves as if the session
    /// were no longer attached.
    async fn lock_open(&self) -> Result<MutexGuard<'_, RoomState>> {
        let state = self.state.lock().await;
        if state.closed {
            return Err(BoardError::NotInRoom);
        }
        Ok(state)
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }

    pub async fn member_count(&self) -> usize {
        self.state.lock().await.members.len()
    }

    pub async fn opinions(&self) -> Vec<OpinionView> {
        self.state.lock().await.opinion_views()
    }

    pub async fn post_opinion(&self, creator_id: &str, content: NewOpinion) -> Result<OpinionView> {
        let mut state = self.lock_open().await?;

        let opinion = Opinion::new(creator_id, content);
        let view = opinion.view();
        state.opinions.push(opinion);

        state.broadcast(
            &ServerMessage::Opinion {
                opinion: view.clone(),
            },
            Recipients::All,
        );
        tracing::debug!(
            room_id = %self.code,
            opinion_id = %view.id,
            creator_id = %creator_id,
            "Opinion posted"
        );
        Ok(view)
    }

    /// Returns the new vote count, or `None` for a repeated vote.
    pub async fn vote(&self, voter_id: &str, opinion_id: &str) -> Result<Option<usize>> {
        let mut state = self.lock_open().await?;

        let Some(votes) = state.opinion_mut(opinion_id)?.vote(voter_id) else {
            tracing::debug!(
                room_id = %self.code,
                opinion_id = %opinion_id,
                voter_id = %voter_id,
                "Ignoring repeated vote"
            );
            return Ok(None);
        };

        state.broadcast(
            &ServerMessage::Vote {
                opinion_id: opinion_id.to_string(),
                votes,
            },
            Recipients::All,
        );
        Ok(Some(votes))
    }

    pub async fn toggle_reaction(
        &self,
        client_id: &str,
        opinion_id: &str,
        emoji: &str,
    ) -> Result<usize> {
        let mut state = self.lock_open().await?;

        let count = state.opinion_mut(opinion_id)?.toggle_reaction(client_id, emoji);

        state.broadcast(
            &ServerMessage::Reaction {
                opinion_id: opinion_id.to_string(),
                emoji: emoji.to_string(),
                count,
            },
            Recipients::All,
        );
        Ok(count)
    }

    /// Last writer wins. The mover already shows the new position, so it is
    /// not echoed back to that connection.
    pub async fn move_opinion(
        &self,
        mover: ConnectionId,
        opinion_id: &str,
        x: f64,
        y: f64,
    ) -> Result<()> {
        let mut state = self.lock_open().await?;

        let opinion = state.opinion_mut(opinion_id)?;
        opinion.x = x;
        opinion.y = y;

        state.broadcast(
            &ServerMessage::Move {
                opinion_id: opinion_id.to_string(),
                x,
                y,
            },
            Recipients::ExceptConnection(mover),
        );
        Ok(())
    }

    pub async fn delete_opinion(&self, requester_id: &str, opinion_id: &str) -> Result<()> {
        let mut state = self.lock_open().await?;

        if state.opinion_mut(opinion_id)?.creator_id != requester_id {
            return Err(BoardError::NotOpinionCreator(opinion_id.to_string()));
        }
        state.opinions.retain(|o| o.id != opinion_id);

        state.broadcast(
            &ServerMessage::Deleted {
                opinion_id: opinion_id.to_string(),
            },
            Recipients::All,
        );
        tracing::debug!(room_id = %self.code, opinion_id = %opinion_id, "Opinion deleted");
        Ok(())
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
