use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Messages sent by clients over the board WebSocket.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    Create {
        client_id: Option<String>,
        name: Option<String>,
    },

    Join {
        room_id: String,
        client_id: Option<String>,
        name: Option<String>,
    },

    Opinion {
        opinion: NewOpinion,
    },

    Vote {
        opinion_id: String,
    },

    Reaction {
        opinion_id: String,
        emoji: String,
    },

    Move {
        opinion_id: String,
        x: f64,
        y: f64,
    },

    Delete {
        opinion_id: String,
    },

    /// Any `type` this server does not know. Ignored.
    #[serde(other)]
    Unknown,
}

/// Content of a note as posted by a client.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOpinion {
    #[serde(default)]
    pub text: String,
    pub image_url: Option<String>,
    pub x: f64,
    pub y: f64,
}

/// Messages sent by the server to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Joined {
        room_id: String,
        client_id: String,
        owner_id: String,
        opinions: Vec<OpinionView>,
        users: Vec<UserInfo>,
    },

    UserJoined {
        user: UserInfo,
    },

    UserLeft {
        user_id: String,
    },

    Opinion {
        opinion: OpinionView,
    },

    Vote {
        opinion_id: String,
        votes: usize,
    },

    Reaction {
        opinion_id: String,
        emoji: String,
        count: usize,
    },

    Move {
        opinion_id: String,
        x: f64,
        y: f64,
    },

    Deleted {
        opinion_id: String,
    },

    Error {
        message: String,
    },

    RoomClosing {
        reason: String,
    },
}

/// Client-visible projection of an opinion. Voter and reactor identities
/// never leave the server; only their counts do.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpinionView {
    pub id: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub x: f64,
    pub y: f64,
    pub votes: usize,
    pub reactions: BTreeMap<String, usize>,
    pub creator_id: String,
    pub created_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub id: String,
    pub name: String,
    pub is_owner: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_join() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"join","roomId":"abc234","clientId":"c1"}"#).unwrap();
        match msg {
            ClientMessage::Join { room_id, client_id, name } => {
                assert_eq!(room_id, "abc234");
                assert_eq!(client_id.as_deref(), Some("c1"));
                assert!(name.is_none());
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_opinion_without_text() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"opinion","opinion":{"imageUrl":"data:image/png;base64,AAAA","x":1.5,"y":-2}}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::Opinion { opinion } => {
                assert_eq!(opinion.text, "");
                assert_eq!(opinion.image_url.as_deref(), Some("data:image/png;base64,AAAA"));
                assert_eq!(opinion.x, 1.5);
                assert_eq!(opinion.y, -2.0);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_is_tolerated() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"sync","opinions":[]}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Unknown));
    }

    #[test]
    fn test_missing_field_is_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"vote"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>(r#"{"roomId":"ABC234"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>("not json").is_err());
    }

    #[test]
    fn test_server_message_wire_shape() {
        let msg = ServerMessage::RoomClosing {
            reason: "all members left".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "room_closing", "reason": "all members left"})
        );

        let msg = ServerMessage::UserLeft {
            user_id: "c1".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "user_left", "userId": "c1"})
        );
    }

    #[test]
    fn test_opinion_view_omits_missing_image() {
        let view = OpinionView {
            id: "o1".to_string(),
            text: "hello".to_string(),
            image_url: None,
            x: 10.0,
            y: 20.0,
            votes: 0,
            reactions: BTreeMap::from([("👍".to_string(), 2)]),
            creator_id: "c1".to_string(),
            created_at: 42,
        };
        let value = serde_json::to_value(ServerMessage::Opinion { opinion: view }).unwrap();
        assert_eq!(value["type"], "opinion");
        assert_eq!(value["opinion"]["creatorId"], "c1");
        assert_eq!(value["opinion"]["reactions"]["👍"], 2);
        assert!(value["opinion"].get("imageUrl").is_none());
    }
}
