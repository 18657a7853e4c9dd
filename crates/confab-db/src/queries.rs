use chrono::{DateTime, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use confab_types::error::ChatError;
use confab_types::models::{
    Attachment, Message, MessageKind, MessageView, Participant, Room, RoomKind, Sender,
};

use crate::models::{MembershipRow, MessageRow, ParticipantRow, ReactionRow, RoomRow};
use crate::{Database, fmt_ts, parse_ts};

/// Input for message creation. The id is generated by the core before the
/// insert, never assigned by storage.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: Uuid,
    pub room_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub kind: MessageKind,
    pub reply_to_id: Option<Uuid>,
    pub attachment: Option<Attachment>,
}

impl Database {
    // -- Users --

    pub fn create_user(&self, id: Uuid, display_name: &str) -> Result<(), ChatError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, display_name) VALUES (?1, ?2)",
                (id.to_string(), display_name),
            )
            .map_err(ChatError::storage)?;
            Ok(())
        })
    }

    pub fn sender_identity(&self, id: Uuid) -> Result<Option<Sender>, ChatError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT display_name FROM users WHERE id = ?1",
                [id.to_string()],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .map(|display_name| Ok(Sender { id, display_name }))
            .transpose()
        })
    }

    /// Advisory presence mirror. Never authoritative for online/offline
    /// logic; failures are the caller's to log and ignore.
    pub fn set_last_status(&self, user_id: Uuid, online: bool) -> Result<(), ChatError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET last_status = ?2 WHERE id = ?1",
                (user_id.to_string(), if online { "online" } else { "offline" }),
            )
            .map_err(ChatError::storage)?;
            Ok(())
        })
    }

    // -- Rooms --

    pub fn create_room(
        &self,
        id: Uuid,
        kind: RoomKind,
        name: Option<&str>,
        avatar_url: Option<&str>,
        creator: Uuid,
        member_ids: &[Uuid],
    ) -> Result<Room, ChatError> {
        let created_at = Utc::now();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO rooms (id, kind, name, avatar_url, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                (
                    id.to_string(),
                    kind.as_str(),
                    name,
                    avatar_url,
                    fmt_ts(created_at),
                ),
            )
            .map_err(ChatError::storage)?;

            // The creator is admin of group rooms; direct rooms have no admin.
            let joined = fmt_ts(created_at);
            let creator_admin = matches!(kind, RoomKind::Group);
            conn.execute(
                "INSERT INTO participants (room_id, user_id, joined_at, is_admin)
                 VALUES (?1, ?2, ?3, ?4)",
                (id.to_string(), creator.to_string(), &joined, creator_admin),
            )
            .map_err(ChatError::storage)?;

            for member in member_ids {
                if *member == creator {
                    continue;
                }
                conn.execute(
                    "INSERT OR IGNORE INTO participants (room_id, user_id, joined_at)
                     VALUES (?1, ?2, ?3)",
                    (id.to_string(), member.to_string(), &joined),
                )
                .map_err(ChatError::storage)?;
            }

            Ok(Room {
                id,
                kind,
                name: name.map(str::to_string),
                avatar_url: avatar_url.map(str::to_string),
                created_at,
            })
        })
    }

    pub fn get_room(&self, id: Uuid) -> Result<Option<Room>, ChatError> {
        self.with_conn(|conn| {
            query_room(conn, id)?.map(room_from_row).transpose()
        })
    }

    pub fn update_room(
        &self,
        id: Uuid,
        name: Option<&str>,
        avatar_url: Option<&str>,
    ) -> Result<Room, ChatError> {
        self.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE rooms SET
                         name = COALESCE(?2, name),
                         avatar_url = COALESCE(?3, avatar_url)
                     WHERE id = ?1",
                    (id.to_string(), name, avatar_url),
                )
                .map_err(ChatError::storage)?;
            if changed == 0 {
                return Err(ChatError::RoomNotFound(id));
            }
            query_room(conn, id)?
                .map(room_from_row)
                .transpose()?
                .ok_or(ChatError::RoomNotFound(id))
        })
    }

    /// Room listing for one user, joined with that user's participant flags.
    pub fn list_rooms(&self, user_id: Uuid) -> Result<Vec<MembershipRow>, ChatError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT r.id, r.kind, r.name, r.avatar_url, r.created_at,
                            p.last_read_at, p.muted, p.archived, p.is_admin
                     FROM participants p
                     JOIN rooms r ON r.id = p.room_id
                     WHERE p.user_id = ?1
                     ORDER BY r.created_at DESC",
                )
                .map_err(ChatError::storage)?;

            let rows = stmt
                .query_map([user_id.to_string()], |row| {
                    Ok(MembershipRow {
                        room: RoomRow {
                            id: row.get(0)?,
                            kind: row.get(1)?,
                            name: row.get(2)?,
                            avatar_url: row.get(3)?,
                            created_at: row.get(4)?,
                        },
                        last_read_at: row.get(5)?,
                        muted: row.get(6)?,
                        archived: row.get(7)?,
                        is_admin: row.get(8)?,
                    })
                })
                .map_err(ChatError::storage)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(ChatError::storage)?;

            Ok(rows)
        })
    }

    // -- Participants --

    /// Used once per session establishment to subscribe the connection.
    pub fn list_memberships(&self, user_id: Uuid) -> Result<Vec<Uuid>, ChatError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT room_id FROM participants WHERE user_id = ?1")
                .map_err(ChatError::storage)?;
            let rows = stmt
                .query_map([user_id.to_string()], |row| row.get::<_, String>(0))
                .map_err(ChatError::storage)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(ChatError::storage)?;

            rows.iter().map(|s| parse_uuid(s)).collect()
        })
    }

    pub fn get_participant(
        &self,
        room_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Participant>, ChatError> {
        self.with_conn(|conn| {
            query_participant(conn, room_id, user_id)?
                .map(participant_from_row)
                .transpose()
        })
    }

    /// Upserts the read cursor to `max(existing, at)` and returns the
    /// effective value. Idempotent; never moves the cursor backward.
    pub fn mark_read(
        &self,
        room_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, ChatError> {
        self.with_conn(|conn| {
            let at_str = fmt_ts(at);
            let changed = conn
                .execute(
                    "UPDATE participants SET last_read_at =
                         CASE WHEN last_read_at IS NULL OR last_read_at < ?3
                              THEN ?3 ELSE last_read_at END
                     WHERE room_id = ?1 AND user_id = ?2",
                    (room_id.to_string(), user_id.to_string(), &at_str),
                )
                .map_err(ChatError::storage)?;
            if changed == 0 {
                return Err(ChatError::NotAParticipant(room_id));
            }

            let effective: String = conn
                .query_row(
                    "SELECT last_read_at FROM participants
                     WHERE room_id = ?1 AND user_id = ?2",
                    (room_id.to_string(), user_id.to_string()),
                    |row| row.get(0),
                )
                .map_err(ChatError::storage)?;
            parse_ts(&effective)
        })
    }

    pub fn update_participant_flags(
        &self,
        room_id: Uuid,
        user_id: Uuid,
        muted: Option<bool>,
        archived: Option<bool>,
    ) -> Result<Participant, ChatError> {
        self.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE participants SET
                         muted = COALESCE(?3, muted),
                         archived = COALESCE(?4, archived)
                     WHERE room_id = ?1 AND user_id = ?2",
                    (room_id.to_string(), user_id.to_string(), muted, archived),
                )
                .map_err(ChatError::storage)?;
            if changed == 0 {
                return Err(ChatError::NotAParticipant(room_id));
            }
            query_participant(conn, room_id, user_id)?
                .map(participant_from_row)
                .transpose()?
                .ok_or(ChatError::NotAParticipant(room_id))
        })
    }

    // -- Messages --

    /// Insert a message. Fails with `NotAParticipant` if the sender has no
    /// membership row and `InvalidReply` if the reply target lives in a
    /// different room (or does not exist). No broadcast happens anywhere
    /// unless this returns Ok.
    pub fn create_message(&self, new: &NewMessage) -> Result<Message, ChatError> {
        self.with_conn(|conn| {
            if query_participant(conn, new.room_id, new.sender_id)?.is_none() {
                return Err(ChatError::NotAParticipant(new.room_id));
            }

            if let Some(reply_to) = new.reply_to_id {
                let reply_room: Option<String> = conn
                    .query_row(
                        "SELECT room_id FROM messages WHERE id = ?1",
                        [reply_to.to_string()],
                        |row| row.get(0),
                    )
                    .optional()?;
                match reply_room {
                    Some(room) if parse_uuid(&room)? == new.room_id => {}
                    _ => return Err(ChatError::InvalidReply),
                }
            }

            let created_at = Utc::now();
            let (url, name, size) = match &new.attachment {
                Some(a) => (Some(a.url.as_str()), a.name.as_deref(), a.size),
                None => (None, None, None),
            };
            conn.execute(
                "INSERT INTO messages
                     (id, room_id, sender_id, content, kind, reply_to_id,
                      attachment_url, attachment_name, attachment_size, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                (
                    new.id.to_string(),
                    new.room_id.to_string(),
                    new.sender_id.to_string(),
                    &new.content,
                    new.kind.as_str(),
                    new.reply_to_id.map(|id| id.to_string()),
                    url,
                    name,
                    size,
                    fmt_ts(created_at),
                ),
            )
            .map_err(ChatError::storage)?;

            Ok(Message {
                id: new.id,
                room_id: new.room_id,
                sender_id: new.sender_id,
                content: new.content.clone(),
                kind: new.kind,
                reply_to_id: new.reply_to_id,
                attachment: new.attachment.clone(),
                created_at,
                edited: false,
                deleted: false,
            })
        })
    }

    pub fn get_message(&self, id: Uuid) -> Result<Option<Message>, ChatError> {
        self.with_conn(|conn| {
            query_message(conn, id)?.map(message_from_row).transpose()
        })
    }

    /// Content is the only field an edit may touch; only the author edits.
    pub fn edit_message(
        &self,
        id: Uuid,
        editor: Uuid,
        content: &str,
    ) -> Result<Message, ChatError> {
        self.with_conn(|conn| {
            let row = query_message(conn, id)?.ok_or(ChatError::MessageNotFound(id))?;
            let msg = message_from_row(row)?;
            if msg.sender_id != editor {
                return Err(ChatError::Forbidden);
            }
            if msg.deleted {
                return Err(ChatError::MessageNotFound(id));
            }

            conn.execute(
                "UPDATE messages SET content = ?2, edited = 1 WHERE id = ?1",
                (id.to_string(), content),
            )
            .map_err(ChatError::storage)?;

            Ok(Message {
                content: content.to_string(),
                edited: true,
                ..msg
            })
        })
    }

    /// Soft delete: the row stays (the room owns it until a cascading room
    /// delete), only the flag flips.
    pub fn soft_delete_message(&self, id: Uuid, user_id: Uuid) -> Result<Message, ChatError> {
        self.with_conn(|conn| {
            let row = query_message(conn, id)?.ok_or(ChatError::MessageNotFound(id))?;
            let msg = message_from_row(row)?;
            if msg.sender_id != user_id {
                return Err(ChatError::Forbidden);
            }

            conn.execute(
                "UPDATE messages SET deleted = 1 WHERE id = ?1",
                [id.to_string()],
            )
            .map_err(ChatError::storage)?;

            Ok(Message {
                deleted: true,
                ..msg
            })
        })
    }

    /// History page for a room, newest first, with cursor pagination via
    /// the `before` timestamp of the previous page's oldest message.
    pub fn get_messages(
        &self,
        room_id: Uuid,
        limit: u32,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<MessageRow>, ChatError> {
        self.with_conn(|conn| {
            // JOIN users to fetch sender_name in a single query.
            let mut stmt = conn
                .prepare(
                    "SELECT m.id, m.room_id, m.sender_id, u.display_name,
                            m.content, m.kind, m.reply_to_id,
                            m.attachment_url, m.attachment_name, m.attachment_size,
                            m.created_at, m.edited, m.deleted
                     FROM messages m
                     LEFT JOIN users u ON m.sender_id = u.id
                     WHERE m.room_id = ?1
                       AND (?2 IS NULL OR m.created_at < ?2)
                     ORDER BY m.created_at DESC
                     LIMIT ?3",
                )
                .map_err(ChatError::storage)?;

            let rows = stmt
                .query_map(
                    (
                        room_id.to_string(),
                        before.map(fmt_ts),
                        limit,
                    ),
                    |row| {
                        Ok(MessageRow {
                            id: row.get(0)?,
                            room_id: row.get(1)?,
                            sender_id: row.get(2)?,
                            sender_name: row
                                .get::<_, Option<String>>(3)?
                                .unwrap_or_else(|| "unknown".to_string()),
                            content: row.get(4)?,
                            kind: row.get(5)?,
                            reply_to_id: row.get(6)?,
                            attachment_url: row.get(7)?,
                            attachment_name: row.get(8)?,
                            attachment_size: row.get(9)?,
                            created_at: row.get(10)?,
                            edited: row.get(11)?,
                            deleted: row.get(12)?,
                        })
                    },
                )
                .map_err(ChatError::storage)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(ChatError::storage)?;

            Ok(rows)
        })
    }

    // -- Reactions --

    /// Toggle a reaction: removes if present, inserts if not. Unique per
    /// (message, user, emoji). Returns (added, owning room id).
    pub fn toggle_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> Result<(bool, Uuid), ChatError> {
        self.with_conn(|conn| {
            let room: String = conn
                .query_row(
                    "SELECT room_id FROM messages WHERE id = ?1",
                    [message_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or(ChatError::MessageNotFound(message_id))?;
            let room_id = parse_uuid(&room)?;

            let existing: Option<String> = conn
                .query_row(
                    "SELECT id FROM reactions
                     WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
                    (message_id.to_string(), user_id.to_string(), emoji),
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(existing_id) = existing {
                conn.execute("DELETE FROM reactions WHERE id = ?1", [existing_id])
                    .map_err(ChatError::storage)?;
                Ok((false, room_id))
            } else {
                conn.execute(
                    "INSERT INTO reactions (id, message_id, user_id, emoji, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    (
                        Uuid::new_v4().to_string(),
                        message_id.to_string(),
                        user_id.to_string(),
                        emoji,
                        fmt_ts(Utc::now()),
                    ),
                )
                .map_err(ChatError::storage)?;
                Ok((true, room_id))
            }
        })
    }

    /// Batch-fetch reactions for a set of message IDs.
    pub fn get_reactions_for_messages(
        &self,
        message_ids: &[String],
    ) -> Result<Vec<ReactionRow>, ChatError> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (1..=message_ids.len()).map(|i| format!("?{i}")).collect();
            let sql = format!(
                "SELECT id, message_id, user_id, emoji FROM reactions
                 WHERE message_id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql).map_err(ChatError::storage)?;
            let params: Vec<&dyn rusqlite::types::ToSql> = message_ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let rows = stmt
                .query_map(params.as_slice(), |row| {
                    Ok(ReactionRow {
                        id: row.get(0)?,
                        message_id: row.get(1)?,
                        user_id: row.get(2)?,
                        emoji: row.get(3)?,
                    })
                })
                .map_err(ChatError::storage)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(ChatError::storage)?;

            Ok(rows)
        })
    }
}

// -- Row mappers --

fn query_room(conn: &Connection, id: Uuid) -> Result<Option<RoomRow>, ChatError> {
    conn.query_row(
        "SELECT id, kind, name, avatar_url, created_at FROM rooms WHERE id = ?1",
        [id.to_string()],
        |row| {
            Ok(RoomRow {
                id: row.get(0)?,
                kind: row.get(1)?,
                name: row.get(2)?,
                avatar_url: row.get(3)?,
                created_at: row.get(4)?,
            })
        },
    )
    .optional()
}

fn query_participant(
    conn: &Connection,
    room_id: Uuid,
    user_id: Uuid,
) -> Result<Option<ParticipantRow>, ChatError> {
    conn.query_row(
        "SELECT room_id, user_id, joined_at, last_read_at, muted, archived, is_admin
         FROM participants WHERE room_id = ?1 AND user_id = ?2",
        (room_id.to_string(), user_id.to_string()),
        |row| {
            Ok(ParticipantRow {
                room_id: row.get(0)?,
                user_id: row.get(1)?,
                joined_at: row.get(2)?,
                last_read_at: row.get(3)?,
                muted: row.get(4)?,
                archived: row.get(5)?,
                is_admin: row.get(6)?,
            })
        },
    )
    .optional()
}

fn query_message(conn: &Connection, id: Uuid) -> Result<Option<MessageRow>, ChatError> {
    conn.query_row(
        "SELECT m.id, m.room_id, m.sender_id, u.display_name,
                m.content, m.kind, m.reply_to_id,
                m.attachment_url, m.attachment_name, m.attachment_size,
                m.created_at, m.edited, m.deleted
         FROM messages m
         LEFT JOIN users u ON m.sender_id = u.id
         WHERE m.id = ?1",
        [id.to_string()],
        |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                room_id: row.get(1)?,
                sender_id: row.get(2)?,
                sender_name: row
                    .get::<_, Option<String>>(3)?
                    .unwrap_or_else(|| "unknown".to_string()),
                content: row.get(4)?,
                kind: row.get(5)?,
                reply_to_id: row.get(6)?,
                attachment_url: row.get(7)?,
                attachment_name: row.get(8)?,
                attachment_size: row.get(9)?,
                created_at: row.get(10)?,
                edited: row.get(11)?,
                deleted: row.get(12)?,
            })
        },
    )
    .optional()
}

pub fn parse_uuid(s: &str) -> Result<Uuid, ChatError> {
    s.parse()
        .map_err(|e| ChatError::storage(format!("corrupt uuid '{s}': {e}")))
}

pub fn room_from_row(row: RoomRow) -> Result<Room, ChatError> {
    Ok(Room {
        id: parse_uuid(&row.id)?,
        kind: RoomKind::from_str(&row.kind)
            .ok_or_else(|| ChatError::storage(format!("corrupt room kind '{}'", row.kind)))?,
        name: row.name,
        avatar_url: row.avatar_url,
        created_at: parse_ts(&row.created_at)?,
    })
}

fn participant_from_row(row: ParticipantRow) -> Result<Participant, ChatError> {
    Ok(Participant {
        room_id: parse_uuid(&row.room_id)?,
        user_id: parse_uuid(&row.user_id)?,
        joined_at: parse_ts(&row.joined_at)?,
        last_read_at: row.last_read_at.as_deref().map(parse_ts).transpose()?,
        muted: row.muted,
        archived: row.archived,
        is_admin: row.is_admin,
    })
}

pub fn message_from_row(row: MessageRow) -> Result<Message, ChatError> {
    Ok(Message {
        id: parse_uuid(&row.id)?,
        room_id: parse_uuid(&row.room_id)?,
        sender_id: parse_uuid(&row.sender_id)?,
        content: row.content,
        kind: MessageKind::from_str(&row.kind)
            .ok_or_else(|| ChatError::storage(format!("corrupt message kind '{}'", row.kind)))?,
        reply_to_id: row.reply_to_id.as_deref().map(parse_uuid).transpose()?,
        attachment: row.attachment_url.map(|url| Attachment {
            url,
            name: row.attachment_name,
            size: row.attachment_size,
        }),
        created_at: parse_ts(&row.created_at)?,
        edited: row.edited,
        deleted: row.deleted,
    })
}

/// A persisted row joined with its sender identity, as delivered to clients.
pub fn view_from_row(row: MessageRow) -> Result<MessageView, ChatError> {
    let sender_name = row.sender_name.clone();
    let message = message_from_row(row)?;
    let sender = Sender {
        id: message.sender_id,
        display_name: sender_name,
    };
    Ok(MessageView::from_message(message, sender))
}

/// Extension trait for optional query results.
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>, ChatError>;
}

impl<T> OptionalExt<T> for Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>, ChatError> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(ChatError::storage(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn db_with_room() -> (Database, Uuid, Uuid, Uuid) {
        let db = Database::open_in_memory().unwrap();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        db.create_user(alice, "alice").unwrap();
        db.create_user(bob, "bob").unwrap();
        let room = db
            .create_room(Uuid::new_v4(), RoomKind::Group, Some("general"), None, alice, &[bob])
            .unwrap();
        (db, room.id, alice, bob)
    }

    fn text_message(room_id: Uuid, sender_id: Uuid, content: &str) -> NewMessage {
        NewMessage {
            id: Uuid::new_v4(),
            room_id,
            sender_id,
            content: content.to_string(),
            kind: MessageKind::Text,
            reply_to_id: None,
            attachment: None,
        }
    }

    #[test]
    fn create_message_requires_membership() {
        let (db, room, _alice, _bob) = db_with_room();
        let outsider = Uuid::new_v4();
        db.create_user(outsider, "mallory").unwrap();

        let err = db
            .create_message(&text_message(room, outsider, "hi"))
            .unwrap_err();
        assert!(matches!(err, ChatError::NotAParticipant(r) if r == room));

        // No row persisted
        let rows = db.get_messages(room, 10, None).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn reply_must_stay_in_the_same_room() {
        let (db, room_a, alice, bob) = db_with_room();
        let room_b = db
            .create_room(Uuid::new_v4(), RoomKind::Direct, None, None, alice, &[bob])
            .unwrap()
            .id;

        let original = db
            .create_message(&text_message(room_b, alice, "in room b"))
            .unwrap();

        let mut cross = text_message(room_a, alice, "cross-room reply");
        cross.reply_to_id = Some(original.id);
        let err = db.create_message(&cross).unwrap_err();
        assert!(matches!(err, ChatError::InvalidReply));
        assert!(db.get_messages(room_a, 10, None).unwrap().is_empty());

        // Dangling reply target is rejected the same way
        let mut dangling = text_message(room_a, alice, "reply to nothing");
        dangling.reply_to_id = Some(Uuid::new_v4());
        assert!(matches!(
            db.create_message(&dangling).unwrap_err(),
            ChatError::InvalidReply
        ));

        // Same-room reply is fine
        let ok = db
            .create_message(&text_message(room_b, bob, "first"))
            .and_then(|first| {
                let mut reply = text_message(room_b, alice, "second");
                reply.reply_to_id = Some(first.id);
                db.create_message(&reply)
            })
            .unwrap();
        assert!(ok.reply_to_id.is_some());
    }

    #[test]
    fn read_cursor_never_moves_backward() {
        let (db, room, alice, _bob) = db_with_room();
        let t = Utc::now();

        let first = db.mark_read(room, alice, t).unwrap();
        assert_eq!(first, t.trunc_subsecs(6));

        // Out-of-order arrival: T-1 after T leaves the cursor at T
        let stale = db.mark_read(room, alice, t - Duration::seconds(1)).unwrap();
        assert_eq!(stale, first);

        // Equal timestamp is idempotent
        let again = db.mark_read(room, alice, t).unwrap();
        assert_eq!(again, first);

        let newer = t + Duration::seconds(5);
        assert_eq!(db.mark_read(room, alice, newer).unwrap(), newer.trunc_subsecs(6));
    }

    #[test]
    fn mark_read_requires_membership() {
        let (db, room, _alice, _bob) = db_with_room();
        let outsider = Uuid::new_v4();
        let err = db.mark_read(room, outsider, Utc::now()).unwrap_err();
        assert!(matches!(err, ChatError::NotAParticipant(_)));
    }

    #[test]
    fn reaction_toggle_is_unique_per_triple() {
        let (db, room, alice, bob) = db_with_room();
        let msg = db.create_message(&text_message(room, alice, "react to me")).unwrap();

        let (added, room_id) = db.toggle_reaction(msg.id, bob, "👍").unwrap();
        assert!(added);
        assert_eq!(room_id, room);

        // Same triple toggles off
        let (added, _) = db.toggle_reaction(msg.id, bob, "👍").unwrap();
        assert!(!added);

        // Distinct emoji from the same user coexists
        db.toggle_reaction(msg.id, bob, "👍").unwrap();
        db.toggle_reaction(msg.id, bob, "🎉").unwrap();
        let reactions = db
            .get_reactions_for_messages(&[msg.id.to_string()])
            .unwrap();
        assert_eq!(reactions.len(), 2);
    }

    #[test]
    fn edit_and_delete_are_author_only() {
        let (db, room, alice, bob) = db_with_room();
        let msg = db.create_message(&text_message(room, alice, "draft")).unwrap();

        assert!(matches!(
            db.edit_message(msg.id, bob, "hijacked").unwrap_err(),
            ChatError::Forbidden
        ));
        assert!(matches!(
            db.soft_delete_message(msg.id, bob).unwrap_err(),
            ChatError::Forbidden
        ));

        let edited = db.edit_message(msg.id, alice, "final").unwrap();
        assert!(edited.edited);
        assert_eq!(edited.content, "final");
        assert_eq!(edited.created_at, msg.created_at.trunc_subsecs(6));

        let deleted = db.soft_delete_message(msg.id, alice).unwrap();
        assert!(deleted.deleted);
        // Soft delete: the row survives
        assert!(db.get_message(msg.id).unwrap().is_some());
    }

    #[test]
    fn duplicate_membership_is_rejected() {
        let (db, room, _alice, bob) = db_with_room();
        let joined = fmt_ts(Utc::now());
        let err = db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO participants (room_id, user_id, joined_at)
                 VALUES (?1, ?2, ?3)",
                (room.to_string(), bob.to_string(), &joined),
            )
            .map_err(ChatError::storage)?;
            Ok(())
        });
        assert!(err.is_err());
    }

    #[test]
    fn room_deletion_cascades_to_messages_and_reactions() {
        let (db, room, alice, bob) = db_with_room();
        let msg = db.create_message(&text_message(room, alice, "doomed")).unwrap();
        db.toggle_reaction(msg.id, bob, "👍").unwrap();

        db.with_conn(|conn| {
            conn.execute("DELETE FROM rooms WHERE id = ?1", [room.to_string()])
                .map_err(ChatError::storage)?;
            Ok(())
        })
        .unwrap();

        // The room owns its messages; reactions follow their message
        assert!(db.get_message(msg.id).unwrap().is_none());
        assert!(
            db.get_reactions_for_messages(&[msg.id.to_string()])
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn history_pagination_uses_created_at_cursor() {
        let (db, room, alice, _bob) = db_with_room();
        for i in 0..5 {
            db.create_message(&text_message(room, alice, &format!("m{i}")))
                .unwrap();
            // Distinct created_at values
            std::thread::sleep(std::time::Duration::from_millis(2));
        }

        let page = db.get_messages(room, 2, None).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].content, "m4");

        let cursor = parse_ts(&page[1].created_at).unwrap();
        let older = db.get_messages(room, 10, Some(cursor)).unwrap();
        assert_eq!(older.len(), 3);
        assert_eq!(older[0].content, "m2");
    }

    trait TruncSubsecs {
        fn trunc_subsecs(self, digits: u16) -> Self;
    }

    impl TruncSubsecs for DateTime<Utc> {
        /// Storage keeps microsecond precision; truncate for comparisons.
        fn trunc_subsecs(self, _digits: u16) -> Self {
            parse_ts(&fmt_ts(self)).unwrap()
        }
    }
}
