//! Database row types. These map directly to SQLite rows.
//! Distinct from the confab-types API models to keep the DB layer
//! independent; conversion happens in `queries`.

pub struct RoomRow {
    pub id: String,
    pub kind: String,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: String,
}

pub struct ParticipantRow {
    pub room_id: String,
    pub user_id: String,
    pub joined_at: String,
    pub last_read_at: Option<String>,
    pub muted: bool,
    pub archived: bool,
    pub is_admin: bool,
}

pub struct MessageRow {
    pub id: String,
    pub room_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
    pub kind: String,
    pub reply_to_id: Option<String>,
    pub attachment_url: Option<String>,
    pub attachment_name: Option<String>,
    pub attachment_size: Option<u64>,
    pub created_at: String,
    pub edited: bool,
    pub deleted: bool,
}

pub struct ReactionRow {
    pub id: String,
    pub message_id: String,
    pub user_id: String,
    pub emoji: String,
}

/// A user's room listing joined with their own participant flags.
pub struct MembershipRow {
    pub room: RoomRow,
    pub last_read_at: Option<String>,
    pub muted: bool,
    pub archived: bool,
    pub is_admin: bool,
}
