use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Direct chats have exactly two participants; groups any number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
    Direct,
    Group,
}

impl RoomKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Group => "group",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "direct" => Some(Self::Direct),
            "group" => Some(Self::Group),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Audio,
    Voice,
    Document,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Voice => "voice",
            Self::Document => "document",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            "audio" => Some(Self::Audio),
            "voice" => Some(Self::Voice),
            "document" => Some(Self::Document),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: Uuid,
    pub kind: RoomKind,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One row per (room, user) membership. The only field the live core
/// mutates after join is `last_read_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub room_id: Uuid,
    pub user_id: Uuid,
    pub joined_at: DateTime<Utc>,
    pub last_read_at: Option<DateTime<Utc>>,
    pub muted: bool,
    pub archived: bool,
    pub is_admin: bool,
}

/// Opaque attachment descriptor. The core never inspects attachment bytes;
/// the URL points at an external store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    pub name: Option<String>,
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub room_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub kind: MessageKind,
    pub reply_to_id: Option<Uuid>,
    pub attachment: Option<Attachment>,
    pub created_at: DateTime<Utc>,
    pub edited: bool,
    pub deleted: bool,
}

/// Minimal sender identity resolved from storage for outbound events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sender {
    pub id: Uuid,
    pub display_name: String,
}

/// Reactions grouped per emoji, as returned by the history endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionGroup {
    pub emoji: String,
    pub count: usize,
    pub user_ids: Vec<Uuid>,
}

/// A message as delivered to clients: the persisted record plus sender
/// identity. The WebSocket `message` event and the HTTP history endpoint
/// both use this shape so the two transports cannot diverge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageView {
    pub id: Uuid,
    pub room_id: Uuid,
    pub sender: Sender,
    pub content: String,
    pub kind: MessageKind,
    pub reply_to_id: Option<Uuid>,
    pub attachment: Option<Attachment>,
    pub created_at: DateTime<Utc>,
    pub edited: bool,
    pub deleted: bool,
    #[serde(default)]
    pub reactions: Vec<ReactionGroup>,
}

impl MessageView {
    pub fn from_message(message: Message, sender: Sender) -> Self {
        Self {
            id: message.id,
            room_id: message.room_id,
            sender,
            content: message.content,
            kind: message.kind,
            reply_to_id: message.reply_to_id,
            attachment: message.attachment,
            created_at: message.created_at,
            edited: message.edited,
            deleted: message.deleted,
            reactions: vec![],
        }
    }
}
