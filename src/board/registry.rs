use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

use super::broadcast::{unicast, Recipients};
use super::ids;
use super::lifecycle::{CloseReason, Lifecycle, LifecycleConfig};
use super::protocol::{ServerMessage, UserInfo};
use super::room::{ConnectionId, Member, Room, RoomState};
use crate::error::{BoardError, Result};

/// Live rooms by code.
///
/// The map lock is only held for create, lookup and delete; everything else
/// runs under the individual room's lock. When both are needed the map lock
/// is taken first.
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Arc<Room>>>,
    lifecycle: Lifecycle,
    next_generation: AtomicU64,
    next_connection_id: AtomicU64,
}

impl RoomRegistry {
    pub fn new() -> Arc<Self> {
        Self::with_lifecycle(LifecycleConfig::default())
    }

    pub fn with_lifecycle(config: LifecycleConfig) -> Arc<Self> {
        Arc::new_cyclic(|registry| Self {
            rooms: RwLock::new(HashMap::new()),
            lifecycle: Lifecycle::new(config, registry.clone()),
            next_generation: AtomicU64::new(1),
            next_connection_id: AtomicU64::new(1),
        })
    }

    pub fn next_connection_id(&self) -> ConnectionId {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Create a room owned by `owner`, who becomes its only member and is
    /// sent the initial `joined`.
    pub async fn create_room(&self, owner: Member) -> Arc<Room> {
        let mut rooms = self.rooms.write().await;
        let code = loop {
            let code = ids::new_room_code();
            if !rooms.contains_key(&code) {
                break code;
            }
            tracing::debug!(room_id = %code, "Room code collision, drawing again");
        };
        self.insert_room(&mut rooms, code, owner)
    }

    fn insert_room(
        &self,
        rooms: &mut HashMap<String, Arc<Room>>,
        code: String,
        owner: Member,
    ) -> Arc<Room> {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        unicast(
            &owner.sender,
            &ServerMessage::Joined {
                room_id: code.clone(),
                client_id: owner.client_id.clone(),
                owner_id: owner.client_id.clone(),
                opinions: Vec::new(),
                users: Vec::new(),
            },
        );

        let owner_id = owner.client_id.clone();
        let mut state = RoomState::default();
        state.insert_member(owner);
        self.lifecycle
            .arm_idle_timer(&code, generation, &mut state.timers);

        let room = Arc::new(Room::new(code.clone(), generation, owner_id.clone(), state));
        rooms.insert(code.clone(), room.clone());

        tracing::info!(room_id = %code, owner_id = %owner_id, generation, "Room created");
        room
    }

    /// Case-insensitive lookup. `None` is an ordinary outcome: the room may
    /// have expired or never existed.
    pub async fn lookup_room(&self, code: &str) -> Option<Arc<Room>> {
        let code = ids::normalize_room_code(code);
        self.rooms.read().await.get(&code).cloned()
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Add `member` to an existing room. The joiner gets a `joined` with the
    /// full board, everyone else a `user_joined`.
    pub async fn join_room(&self, code: &str, member: Member) -> Result<Arc<Room>> {
        let code = ids::normalize_room_code(code);
        let room = self
            .lookup_room(&code)
            .await
            .ok_or_else(|| BoardError::RoomNotFound(code.clone()))?;

        let mut state = room.lock().await;
        // deleted between lookup and lock
        if state.closed {
            return Err(BoardError::RoomNotFound(code));
        }

        if state.timers.cancel_grace() {
            tracing::info!(room_id = %code, "Member rejoined, room deletion cancelled");
        }

        let client_id = member.client_id.clone();
        let user = UserInfo {
            id: client_id.clone(),
            name: member.name.clone(),
            is_owner: client_id == room.owner_id(),
        };
        let sender = member.sender.clone();
        let reconnected = state.insert_member(member);

        unicast(
            &sender,
            &ServerMessage::Joined {
                room_id: code.clone(),
                client_id: client_id.clone(),
                owner_id: room.owner_id().to_string(),
                opinions: state.opinion_views(),
                users: state.users(room.owner_id()),
            },
        );
        // the others already list a reconnecting client
        if !reconnected {
            state.broadcast(
                &ServerMessage::UserJoined { user },
                Recipients::ExceptClient(&client_id),
            );
        }

        tracing::info!(
            room_id = %code,
            client_id = %client_id,
            members = state.members.len(),
            "Client joined room"
        );
        drop(state);
        Ok(room)
    }

    /// Remove a departing connection. Remaining members get `user_left`; if
    /// nobody is left the grace timer is armed.
    pub async fn leave_room(&self, room: &Room, client_id: &str, connection_id: ConnectionId) {
        let mut state = room.lock().await;
        if state.closed || !state.remove_member(client_id, connection_id) {
            return;
        }

        state.broadcast(
            &ServerMessage::UserLeft {
                user_id: client_id.to_string(),
            },
            Recipients::All,
        );

        let remaining = state.members.len();
        tracing::info!(
            room_id = %room.code(),
            client_id = %client_id,
            remaining,
            "Client left room"
        );

        if remaining == 0 {
            self.lifecycle
                .arm_grace_timer(room.code(), room.generation(), &mut state.timers);
            tracing::info!(
                room_id = %room.code(),
                grace_secs = self.lifecycle.config().empty_room_grace.as_secs_f64(),
                "Room is empty, scheduled for deletion"
            );
        }
    }

    /// Delete a room: announce `room_closing`, disconnect every member and
    /// cancel its timers. Deleting an unknown or already deleted code is a
    /// no-op. Returns whether a room was deleted.
    pub async fn delete_room(&self, code: &str, reason: CloseReason) -> bool {
        let code = ids::normalize_room_code(code);
        self.remove_room(&code, None, reason).await
    }

    /// Called by room timers. Acts only if the room under `code` is still
    /// the one that armed the timer, and for `AllMembersLeft` only if it is
    /// still empty.
    pub(crate) async fn expire_room(
        &self,
        code: &str,
        generation: u64,
        reason: CloseReason,
    ) -> bool {
        self.remove_room(code, Some(generation), reason).await
    }

    async fn remove_room(&self, code: &str, generation: Option<u64>, reason: CloseReason) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get(code).cloned() else {
            return false;
        };

        if generation.is_some_and(|g| g != room.generation()) {
            tracing::debug!(room_id = %code, "Ignoring timer of a previous room with this code");
            return false;
        }

        let mut state = room.lock().await;
        if reason == CloseReason::AllMembersLeft && !state.members.is_empty() {
            tracing::debug!(room_id = %code, "Room repopulated, keeping it");
            return false;
        }

        rooms.remove(code);
        drop(rooms);

        let members = state.members.len();
        state.close(reason);
        drop(state);

        tracing::info!(room_id = %code, reason = %reason, members, "Room deleted");
        true
    }

    /// Close every live room, e.g. on shutdown.
    pub async fn close_all(&self, reason: CloseReason) {
        let codes: Vec<String> = self.rooms.read().await.keys().cloned().collect();
        for code in codes {
            self.remove_room(&code, None, reason).await;
        }
    }

    #[cfg(test)]
    pub(crate) async fn create_room_with_code(&self, code: &str, owner: Member) -> Arc<Room> {
        let mut rooms = self.rooms.write().await;
        self.insert_room(&mut rooms, code.to_string(), owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::sync::mpsc;
    use tokio::time::sleep;
    use warp::ws::Message;

    use crate::board::ids::{ROOM_CODE_ALPHABET, ROOM_CODE_LEN};

    fn member(
        registry: &RoomRegistry,
        client_id: &str,
    ) -> (Member, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Member {
                client_id: client_id.to_string(),
                name: client_id.to_string(),
                connection_id: registry.next_connection_id(),
                sender: tx,
            },
            rx,
        )
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<Message> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    fn json(msg: &Message) -> serde_json::Value {
        serde_json::from_str(msg.to_str().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_create_room() {
        let registry = RoomRegistry::new();
        let (alice, mut alice_rx) = member(&registry, "alice");

        let room = registry.create_room(alice).await;
        assert_eq!(room.code().len(), ROOM_CODE_LEN);
        assert!(room.code().bytes().all(|b| ROOM_CODE_ALPHABET.contains(&b)));
        assert_eq!(room.owner_id(), "alice");
        assert_eq!(room.member_count().await, 1);
        assert_eq!(registry.room_count().await, 1);

        let joined = json(&drain(&mut alice_rx)[0]);
        assert_eq!(joined["type"], "joined");
        assert_eq!(joined["roomId"], room.code());
        assert_eq!(joined["ownerId"], "alice");
        assert_eq!(joined["opinions"].as_array().unwrap().len(), 0);
        assert_eq!(joined["users"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_lookup_is_case_insensitive() {
        let registry = RoomRegistry::new();
        let (alice, _rx) = member(&registry, "alice");
        let room = registry.create_room(alice).await;

        let lower = room.code().to_lowercase();
        let found = registry.lookup_room(&lower).await.unwrap();
        assert!(Arc::ptr_eq(&found, &room));
        assert!(registry.lookup_room("ZZZZZZ").await.is_none());
    }

    #[tokio::test]
    async fn test_join_room() {
        let registry = RoomRegistry::new();
        let (alice, mut alice_rx) = member(&registry, "alice");
        let room = registry.create_room(alice).await;
        drain(&mut alice_rx);

        let (bob, mut bob_rx) = member(&registry, "bob");
        let joined_room = registry
            .join_room(&room.code().to_lowercase(), bob)
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&joined_room, &room));

        let joined = json(&drain(&mut bob_rx)[0]);
        assert_eq!(joined["type"], "joined");
        assert_eq!(joined["roomId"], room.code());
        let users = joined["users"].as_array().unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0]["id"], "alice");
        assert_eq!(users[0]["isOwner"], true);

        let notices = drain(&mut alice_rx);
        assert_eq!(notices.len(), 1);
        let notice = json(&notices[0]);
        assert_eq!(notice["type"], "user_joined");
        assert_eq!(notice["user"]["id"], "bob");
    }

    #[tokio::test]
    async fn test_join_nonexistent_room() {
        let registry = RoomRegistry::new();
        let (bob, _rx) = member(&registry, "bob");

        let err = registry.join_room("zzzzzz", bob).await.unwrap_err();
        assert!(matches!(err, BoardError::RoomNotFound(ref code) if code == "ZZZZZZ"));
    }

    #[tokio::test]
    async fn test_delete_room_notifies_and_is_idempotent() {
        let registry = RoomRegistry::new();
        let (alice, mut alice_rx) = member(&registry, "alice");
        let room = registry.create_room(alice).await;
        drain(&mut alice_rx);

        assert!(registry.delete_room(room.code(), CloseReason::ServerShutdown).await);
        assert!(!registry.delete_room(room.code(), CloseReason::ServerShutdown).await);

        let msgs = drain(&mut alice_rx);
        assert_eq!(msgs.len(), 2);
        assert_eq!(json(&msgs[0])["type"], "room_closing");
        assert_eq!(json(&msgs[0])["reason"], "server shutting down");
        assert!(msgs[1].is_close());

        assert!(room.is_closed().await);
        assert!(registry.lookup_room(room.code()).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_is_exactly_one_hour() {
        let registry = RoomRegistry::new();
        let (alice, mut alice_rx) = member(&registry, "alice");
        let room = registry.create_room(alice).await;
        let code = room.code().to_string();

        // activity does not extend the horizon
        for _ in 0..59 {
            sleep(Duration::from_secs(60)).await;
            room.post_opinion(
                "alice",
                crate::board::protocol::NewOpinion {
                    text: "still here".to_string(),
                    image_url: None,
                    x: 0.0,
                    y: 0.0,
                },
            )
            .await
            .unwrap();
        }
        sleep(Duration::from_secs(59)).await;
        assert!(registry.lookup_room(&code).await.is_some());

        sleep(Duration::from_secs(2)).await;
        assert!(registry.lookup_room(&code).await.is_none());

        let closing = drain(&mut alice_rx)
            .into_iter()
            .filter(|m| m.is_text())
            .map(|m| json(&m))
            .find(|v| v["type"] == "room_closing")
            .unwrap();
        assert_eq!(closing["reason"], "time horizon elapsed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_room_deleted_after_grace() {
        let registry = RoomRegistry::new();
        let (alice, _rx) = member(&registry, "alice");
        let connection_id = alice.connection_id;
        let room = registry.create_room(alice).await;

        registry.leave_room(&room, "alice", connection_id).await;
        assert!(room.lock().await.timers.has_grace());

        sleep(Duration::from_secs(4)).await;
        assert!(registry.lookup_room(room.code()).await.is_some());

        sleep(Duration::from_secs(2)).await;
        assert!(registry.lookup_room(room.code()).await.is_none());
        assert!(room.is_closed().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejoin_during_grace_keeps_room() {
        let registry = RoomRegistry::new();
        let (alice, _rx) = member(&registry, "alice");
        let connection_id = alice.connection_id;
        let room = registry.create_room(alice).await;

        registry.leave_room(&room, "alice", connection_id).await;
        sleep(Duration::from_secs(3)).await;

        let (bob, _bob_rx) = member(&registry, "bob");
        registry.join_room(room.code(), bob).await.unwrap();
        assert!(!room.lock().await.timers.has_grace());

        sleep(Duration::from_secs(10)).await;
        assert!(registry.lookup_room(room.code()).await.is_some());
        assert_eq!(room.member_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_timer_spares_newer_room_with_same_code() {
        let registry = RoomRegistry::new();
        let (alice, _alice_rx) = member(&registry, "alice");
        let alice_conn = alice.connection_id;
        let old = registry.create_room_with_code("ABC234", alice).await;

        registry.leave_room(&old, "alice", alice_conn).await;
        // shutdown-style delete: the old grace timer is aborted, but even a
        // straggler must not touch the replacement
        assert!(registry.delete_room("ABC234", CloseReason::ServerShutdown).await);
        registry
            .expire_room("ABC234", old.generation(), CloseReason::AllMembersLeft)
            .await;

        let (bob, _bob_rx) = member(&registry, "bob");
        let bob_conn = bob.connection_id;
        let newer = registry.create_room_with_code("ABC234", bob).await;
        assert_ne!(old.generation(), newer.generation());

        registry.leave_room(&newer, "bob", bob_conn).await;
        assert!(
            !registry
                .expire_room("ABC234", old.generation(), CloseReason::AllMembersLeft)
                .await
        );
        assert!(
            !registry
                .expire_room("ABC234", old.generation(), CloseReason::TimeHorizonElapsed)
                .await
        );
        assert!(registry.lookup_room("ABC234").await.is_some());
    }

    #[tokio::test]
    async fn test_leave_broadcasts_user_left() {
        let registry = RoomRegistry::new();
        let (alice, mut alice_rx) = member(&registry, "alice");
        let room = registry.create_room(alice).await;
        let (bob, _bob_rx) = member(&registry, "bob");
        let bob_conn = bob.connection_id;
        registry.join_room(room.code(), bob).await.unwrap();
        drain(&mut alice_rx);

        registry.leave_room(&room, "bob", bob_conn).await;

        let msgs = drain(&mut alice_rx);
        assert_eq!(msgs.len(), 1);
        let left = json(&msgs[0]);
        assert_eq!(left["type"], "user_left");
        assert_eq!(left["userId"], "bob");
        assert!(!room.lock().await.timers.has_grace());
    }

    #[tokio::test]
    async fn test_reconnect_does_not_announce_user_twice() {
        let registry = RoomRegistry::new();
        let (alice, mut alice_rx) = member(&registry, "alice");
        let room = registry.create_room(alice).await;
        let (bob, mut old_bob_rx) = member(&registry, "bob");
        registry.join_room(room.code(), bob).await.unwrap();
        drain(&mut alice_rx);
        drain(&mut old_bob_rx);

        let (bob_again, mut bob_rx) = member(&registry, "bob");
        registry.join_room(room.code(), bob_again).await.unwrap();

        assert!(drain(&mut alice_rx).is_empty());
        assert!(drain(&mut old_bob_rx)[0].is_close());
        let joined = json(&drain(&mut bob_rx)[0]);
        assert_eq!(joined["users"].as_array().unwrap().len(), 2);
        assert_eq!(room.member_count().await, 2);
    }

    fn opinion_content(text: &str) -> crate::board::protocol::NewOpinion {
        crate::board::protocol::NewOpinion {
            text: text.to_string(),
            image_url: None,
            x: 0.0,
            y: 0.0,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_votes_and_reactions_are_serialized() {
        const CLIENTS: usize = 20;
        const TASKS_PER_CLIENT: usize = 25;

        let registry = RoomRegistry::new();
        let (alice, _alice_rx) = member(&registry, "alice");
        let room = registry.create_room(alice).await;
        let opinion_id = room
            .post_opinion("alice", opinion_content("contested"))
            .await
            .unwrap()
            .id;

        let mut handles = Vec::new();
        for client in 0..CLIENTS {
            for _ in 0..TASKS_PER_CLIENT {
                let room = room.clone();
                let opinion_id = opinion_id.clone();
                let voter = format!("voter-{}", client);
                handles.push(tokio::spawn(async move {
                    room.vote(&voter, &opinion_id).await.unwrap();
                    room.toggle_reaction(&voter, &opinion_id, "👍").await.unwrap();
                }));
            }
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let opinions = room.opinions().await;
        assert_eq!(opinions[0].votes, CLIENTS);
        // every client toggled an odd number of times
        assert_eq!(opinions[0].reactions.get("👍"), Some(&CLIENTS));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_delete_room_during_in_flight_moves() {
        let registry = RoomRegistry::new();
        let (alice, _alice_rx) = member(&registry, "alice");
        let mover = alice.connection_id;
        let room = registry.create_room(alice).await;
        let opinion_id = room
            .post_opinion("alice", opinion_content("drag me"))
            .await
            .unwrap()
            .id;

        let mut handles = Vec::new();
        for i in 0..200 {
            let room = room.clone();
            let opinion_id = opinion_id.clone();
            handles.push(tokio::spawn(async move {
                room.move_opinion(mover, &opinion_id, i as f64, i as f64).await
            }));
        }
        let deleted = registry.delete_room(room.code(), CloseReason::ServerShutdown);
        assert!(deleted.await);

        for handle in handles {
            let result = handle.await.unwrap();
            assert!(matches!(result, Ok(()) | Err(BoardError::NotInRoom)));
        }
        assert!(room.is_closed().await);
        assert!(room.opinions().await.is_empty());
        assert_eq!(registry.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_close_all() {
        let registry = RoomRegistry::new();
        for name in ["alice", "bob", "carol"] {
            let (m, _rx) = member(&registry, name);
            registry.create_room(m).await;
        }
        assert_eq!(registry.room_count().await, 3);

        registry.close_all(CloseReason::ServerShutdown).await;
        assert_eq!(registry.room_count().await, 0);
    }
}
