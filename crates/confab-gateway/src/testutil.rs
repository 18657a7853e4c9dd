//! Shared helpers for gateway component tests.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

use confab_db::Database;
use confab_db::queries::NewMessage;
use confab_types::error::ChatError;
use confab_types::events::ServerEvent;
use confab_types::models::{Message, MessageView, Participant, RoomKind, Sender};

use crate::store::MessageStore;

/// In-memory SQLite store seeded with two users sharing one group room.
pub(crate) fn db_store() -> (Arc<Database>, Uuid, Uuid, Uuid) {
    let db = Database::open_in_memory().unwrap();
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    db.create_user(alice, "alice").unwrap();
    db.create_user(bob, "bob").unwrap();
    let room = db
        .create_room(Uuid::new_v4(), RoomKind::Group, Some("general"), None, alice, &[bob])
        .unwrap();
    (Arc::new(db), room.id, alice, bob)
}

/// Drain everything currently queued on a session channel.
pub(crate) fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub(crate) fn message_events(events: Vec<ServerEvent>) -> Vec<MessageView> {
    events
        .into_iter()
        .filter_map(|event| match event {
            ServerEvent::Message { message } => Some(message),
            _ => None,
        })
        .collect()
}

/// Canned store for failure injection: authorization always succeeds, the
/// configured operations fail with `StorageUnavailable`.
#[derive(Default)]
pub(crate) struct StubStore {
    pub fail_create: bool,
    pub fail_mark_read: bool,
}

impl MessageStore for StubStore {
    fn get_participant(
        &self,
        room_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Participant>, ChatError> {
        Ok(Some(Participant {
            room_id,
            user_id,
            joined_at: Utc::now(),
            last_read_at: None,
            muted: false,
            archived: false,
            is_admin: false,
        }))
    }

    fn create_message(&self, new: &NewMessage) -> Result<Message, ChatError> {
        if self.fail_create {
            return Err(ChatError::storage("injected create failure"));
        }
        Ok(Message {
            id: new.id,
            room_id: new.room_id,
            sender_id: new.sender_id,
            content: new.content.clone(),
            kind: new.kind,
            reply_to_id: new.reply_to_id,
            attachment: new.attachment.clone(),
            created_at: Utc::now(),
            edited: false,
            deleted: false,
        })
    }

    fn mark_read(
        &self,
        _room_id: Uuid,
        _user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, ChatError> {
        if self.fail_mark_read {
            return Err(ChatError::storage("injected mark_read failure"));
        }
        Ok(at)
    }

    fn list_memberships(&self, _user_id: Uuid) -> Result<Vec<Uuid>, ChatError> {
        Ok(vec![])
    }

    fn sender_identity(&self, user_id: Uuid) -> Result<Option<Sender>, ChatError> {
        Ok(Some(Sender {
            id: user_id,
            display_name: "stub".into(),
        }))
    }

    fn set_last_status(&self, _user_id: Uuid, _online: bool) -> Result<(), ChatError> {
        Ok(())
    }

    fn edit_message(&self, id: Uuid, _editor: Uuid, _content: &str) -> Result<Message, ChatError> {
        Err(ChatError::MessageNotFound(id))
    }

    fn soft_delete_message(&self, id: Uuid, _user_id: Uuid) -> Result<Message, ChatError> {
        Err(ChatError::MessageNotFound(id))
    }

    fn toggle_reaction(
        &self,
        message_id: Uuid,
        _user_id: Uuid,
        _emoji: &str,
    ) -> Result<(bool, Uuid), ChatError> {
        Err(ChatError::MessageNotFound(message_id))
    }
}
