use uuid::Uuid;

use confab_db::queries::NewMessage;
use confab_types::error::ChatError;
use confab_types::events::ServerEvent;
use confab_types::models::{Attachment, MessageKind, MessageView, Sender};

use crate::dispatcher::Dispatcher;
use crate::store::{SharedStore, blocking};

/// A message as submitted by a client, before the core stamps an id.
#[derive(Debug, Clone)]
pub struct MessageDraft {
    pub content: String,
    pub kind: MessageKind,
    pub reply_to_id: Option<Uuid>,
    pub attachment: Option<Attachment>,
}

/// Single entry point for everything that persists chat state and then
/// fans it out. Both the WebSocket path and the HTTP fallback call into
/// this, so the two transports cannot grow divergent business logic.
#[derive(Clone)]
pub struct BroadcastEngine {
    store: SharedStore,
    dispatcher: Dispatcher,
}

impl BroadcastEngine {
    pub fn new(store: SharedStore, dispatcher: Dispatcher) -> Self {
        Self { store, dispatcher }
    }

    /// Submission pipeline: authorize → persist → broadcast. The message id
    /// is minted here, before storage is called, and the broadcast only
    /// happens once `create_message` has returned; an unpersisted message
    /// is never visible to any subscriber.
    pub async fn submit_message(
        &self,
        sender: Sender,
        room_id: Uuid,
        draft: MessageDraft,
    ) -> Result<MessageView, ChatError> {
        // Authorizing
        let store = self.store.clone();
        let sender_id = sender.id;
        let participant = blocking(move || store.get_participant(room_id, sender_id)).await?;
        if participant.is_none() {
            return Err(ChatError::NotAParticipant(room_id));
        }

        // Persisting; fails closed on StorageUnavailable
        let new = NewMessage {
            id: Uuid::new_v4(),
            room_id,
            sender_id,
            content: draft.content,
            kind: draft.kind,
            reply_to_id: draft.reply_to_id,
            attachment: draft.attachment,
        };
        let store = self.store.clone();
        let record = new.clone();
        let message = blocking(move || store.create_message(&record)).await?;

        // Broadcasting: every subscriber, including the sender's own
        // sessions, sees the same durable record
        let view = MessageView::from_message(message, sender);
        self.dispatcher
            .fan_out_room(
                room_id,
                ServerEvent::Message {
                    message: view.clone(),
                },
            )
            .await;

        Ok(view)
    }

    pub async fn edit_message(
        &self,
        editor: Sender,
        message_id: Uuid,
        content: String,
    ) -> Result<MessageView, ChatError> {
        let store = self.store.clone();
        let editor_id = editor.id;
        let message =
            blocking(move || store.edit_message(message_id, editor_id, &content)).await?;

        let room_id = message.room_id;
        let view = MessageView::from_message(message, editor);
        self.dispatcher
            .fan_out_room(
                room_id,
                ServerEvent::MessageUpdate {
                    message: view.clone(),
                },
            )
            .await;
        Ok(view)
    }

    pub async fn delete_message(&self, user_id: Uuid, message_id: Uuid) -> Result<(), ChatError> {
        let store = self.store.clone();
        let message = blocking(move || store.soft_delete_message(message_id, user_id)).await?;

        self.dispatcher
            .fan_out_room(
                message.room_id,
                ServerEvent::MessageDelete {
                    room_id: message.room_id,
                    message_id,
                },
            )
            .await;
        Ok(())
    }

    pub async fn toggle_reaction(
        &self,
        user_id: Uuid,
        message_id: Uuid,
        emoji: String,
    ) -> Result<bool, ChatError> {
        let store = self.store.clone();
        let stored_emoji = emoji.clone();
        let (added, room_id) =
            blocking(move || store.toggle_reaction(message_id, user_id, &stored_emoji)).await?;

        let event = if added {
            ServerEvent::ReactionAdd {
                room_id,
                message_id,
                user_id,
                emoji,
            }
        } else {
            ServerEvent::ReactionRemove {
                room_id,
                message_id,
                user_id,
                emoji,
            }
        };
        self.dispatcher.fan_out_room(room_id, event).await;
        Ok(added)
    }
}
