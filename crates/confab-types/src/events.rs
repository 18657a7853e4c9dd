use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::MessageView;

/// Commands sent FROM client TO core over the WebSocket.
///
/// Internally tagged so every frame carries an explicit `type`. A frame
/// whose tag is unknown fails to parse and is answered with an `error`
/// envelope rather than silently dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Authenticate the connection. Must be the first frame.
    Auth { token: String },

    /// Submit a message to a room.
    Message {
        room_id: Uuid,
        content: String,
        kind: crate::models::MessageKind,
        #[serde(default)]
        reply_to_id: Option<Uuid>,
        #[serde(default)]
        attachment_url: Option<String>,
        #[serde(default)]
        attachment_name: Option<String>,
        #[serde(default)]
        attachment_size: Option<u64>,
    },

    /// Ephemeral typing indicator, never persisted.
    TypingStart { room_id: Uuid },
    TypingStop { room_id: Uuid },

    /// Advance the read cursor for a room to "now".
    MarkRead { room_id: Uuid },
}

/// Events sent FROM core TO clients over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Authentication accepted; carries the rooms this session was
    /// subscribed to.
    AuthSuccess {
        user_id: Uuid,
        display_name: String,
        rooms: Vec<Uuid>,
    },

    AuthError { reason: String },

    /// A durably persisted message, fanned out to every subscriber of the
    /// room (including the sender's other sessions).
    Message { message: MessageView },

    /// A message's content was edited.
    MessageUpdate { message: MessageView },

    /// A message was soft-deleted.
    MessageDelete { room_id: Uuid, message_id: Uuid },

    TypingStart { room_id: Uuid, user_id: Uuid },
    TypingStop { room_id: Uuid, user_id: Uuid },

    /// A participant advanced their read cursor.
    MessageRead {
        room_id: Uuid,
        user_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// A user came online or went offline.
    UserStatus {
        user_id: Uuid,
        status: PresenceStatus,
    },

    ReactionAdd {
        room_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
        emoji: String,
    },

    ReactionRemove {
        room_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
        emoji: String,
    },

    /// A rejection scoped to the originating connection only.
    Error { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

impl PresenceStatus {
    pub fn is_online(&self) -> bool {
        matches!(self, Self::Online)
    }
}
