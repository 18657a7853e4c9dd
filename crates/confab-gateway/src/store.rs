use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use confab_db::Database;
use confab_db::queries::NewMessage;
use confab_types::error::ChatError;
use confab_types::models::{Message, Participant, Sender};

/// The persistence gateway as the live core consumes it. Methods are
/// synchronous (they sit on SQLite); async callers go through
/// [`blocking`]. Tests inject failing or canned implementations to
/// exercise the storage-failure paths without a database.
pub trait MessageStore: Send + Sync + 'static {
    fn get_participant(&self, room_id: Uuid, user_id: Uuid)
    -> Result<Option<Participant>, ChatError>;

    fn create_message(&self, new: &NewMessage) -> Result<Message, ChatError>;

    fn mark_read(
        &self,
        room_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, ChatError>;

    fn list_memberships(&self, user_id: Uuid) -> Result<Vec<Uuid>, ChatError>;

    fn sender_identity(&self, user_id: Uuid) -> Result<Option<Sender>, ChatError>;

    fn set_last_status(&self, user_id: Uuid, online: bool) -> Result<(), ChatError>;

    fn edit_message(&self, id: Uuid, editor: Uuid, content: &str) -> Result<Message, ChatError>;

    fn soft_delete_message(&self, id: Uuid, user_id: Uuid) -> Result<Message, ChatError>;

    fn toggle_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> Result<(bool, Uuid), ChatError>;
}

impl MessageStore for Database {
    fn get_participant(
        &self,
        room_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Participant>, ChatError> {
        Database::get_participant(self, room_id, user_id)
    }

    fn create_message(&self, new: &NewMessage) -> Result<Message, ChatError> {
        Database::create_message(self, new)
    }

    fn mark_read(
        &self,
        room_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, ChatError> {
        Database::mark_read(self, room_id, user_id, at)
    }

    fn list_memberships(&self, user_id: Uuid) -> Result<Vec<Uuid>, ChatError> {
        Database::list_memberships(self, user_id)
    }

    fn sender_identity(&self, user_id: Uuid) -> Result<Option<Sender>, ChatError> {
        Database::sender_identity(self, user_id)
    }

    fn set_last_status(&self, user_id: Uuid, online: bool) -> Result<(), ChatError> {
        Database::set_last_status(self, user_id, online)
    }

    fn edit_message(&self, id: Uuid, editor: Uuid, content: &str) -> Result<Message, ChatError> {
        Database::edit_message(self, id, editor, content)
    }

    fn soft_delete_message(&self, id: Uuid, user_id: Uuid) -> Result<Message, ChatError> {
        Database::soft_delete_message(self, id, user_id)
    }

    fn toggle_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> Result<(bool, Uuid), ChatError> {
        Database::toggle_reaction(self, message_id, user_id, emoji)
    }
}

/// Run a blocking store call off the async runtime.
pub async fn blocking<T, F>(f: F) -> Result<T, ChatError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ChatError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ChatError::storage(format!("task join: {e}")))?
}

/// Bounded retry for read paths: `StorageUnavailable` is the only
/// retryable class, everything else fails immediately. The message-create
/// path must never come through here.
pub async fn with_retry<T, Fut, F>(attempts: u32, mut call: F) -> Result<T, ChatError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ChatError>>,
{
    let mut delay = std::time::Duration::from_millis(100);
    let mut last = ChatError::storage("retry budget exhausted");
    for attempt in 0..attempts {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt + 1 < attempts => {
                tracing::debug!(error = %err, attempt, "retrying storage read");
                last = err;
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(err) => return Err(err),
        }
    }
    Err(last)
}

/// Convenience alias used across the gateway.
pub type SharedStore = Arc<dyn MessageStore>;
