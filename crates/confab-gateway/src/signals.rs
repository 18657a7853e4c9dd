use chrono::{DateTime, Utc};
use uuid::Uuid;

use confab_types::error::ChatError;
use confab_types::events::ServerEvent;

use crate::dispatcher::Dispatcher;
use crate::store::{SharedStore, blocking};

/// Routes non-persisted signals between live connections. Typing
/// indicators never touch storage; read receipts touch it exactly once,
/// for the participant's read-cursor update.
#[derive(Clone)]
pub struct SignalRouter {
    store: SharedStore,
    dispatcher: Dispatcher,
}

impl SignalRouter {
    pub fn new(store: SharedStore, dispatcher: Dispatcher) -> Self {
        Self { store, dispatcher }
    }

    /// Fire-and-forget: a dropped typing signal is not an error, so this
    /// returns nothing. The sender's own sessions are excluded.
    pub async fn typing(&self, user_id: Uuid, room_id: Uuid, started: bool) {
        let event = if started {
            ServerEvent::TypingStart { room_id, user_id }
        } else {
            ServerEvent::TypingStop { room_id, user_id }
        };
        self.dispatcher
            .fan_out_room_excluding(room_id, user_id, event)
            .await;
    }

    /// Persist the read cursor, then notify the room's other subscribers.
    /// When the cursor update fails nothing is broadcast; no phantom
    /// receipts.
    pub async fn mark_read(
        &self,
        user_id: Uuid,
        room_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, ChatError> {
        let store = self.store.clone();
        let effective = blocking(move || store.mark_read(room_id, user_id, at)).await?;

        self.dispatcher
            .fan_out_room_excluding(
                room_id,
                user_id,
                ServerEvent::MessageRead {
                    room_id,
                    user_id,
                    timestamp: effective,
                },
            )
            .await;
        Ok(effective)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{StubStore, db_store, drain};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn typing_events(events: Vec<ServerEvent>) -> Vec<ServerEvent> {
        events
            .into_iter()
            .filter(|e| matches!(e, ServerEvent::TypingStart { .. } | ServerEvent::TypingStop { .. }))
            .collect()
    }

    fn read_events(events: Vec<ServerEvent>) -> Vec<ServerEvent> {
        events
            .into_iter()
            .filter(|e| matches!(e, ServerEvent::MessageRead { .. }))
            .collect()
    }

    #[tokio::test]
    async fn typing_skips_every_sender_session() {
        let (store, room, alice, bob) = db_store();
        let dispatcher = Dispatcher::new(store.clone());
        let router = SignalRouter::new(store, dispatcher.clone());

        let (tx_a1, mut a1) = mpsc::channel(32);
        let (tx_a2, mut a2) = mpsc::channel(32);
        let (tx_b, mut b) = mpsc::channel(32);
        dispatcher.connect(alice, Uuid::new_v4(), tx_a1, &[room]).await;
        dispatcher.connect(alice, Uuid::new_v4(), tx_a2, &[room]).await;
        dispatcher.connect(bob, Uuid::new_v4(), tx_b, &[room]).await;
        for rx in [&mut a1, &mut a2, &mut b] {
            drain(rx);
        }

        router.typing(alice, room, true).await;

        assert!(typing_events(drain(&mut a1)).is_empty());
        assert!(typing_events(drain(&mut a2)).is_empty());
        let got = typing_events(drain(&mut b));
        assert_eq!(got.len(), 1);
        assert!(
            matches!(got[0], ServerEvent::TypingStart { room_id, user_id }
                if room_id == room && user_id == alice)
        );
    }

    #[tokio::test]
    async fn typing_is_room_isolated() {
        // A signal in room A never reaches a connection subscribed
        // only to room B
        let (store, room_a, alice, bob) = db_store();
        let room_b = Uuid::new_v4();
        let dispatcher = Dispatcher::new(store.clone());
        let router = SignalRouter::new(store, dispatcher.clone());

        let (tx_b_only, mut b_only) = mpsc::channel(32);
        dispatcher.connect(bob, Uuid::new_v4(), tx_b_only, &[room_b]).await;
        drain(&mut b_only);

        router.typing(alice, room_a, true).await;
        assert!(typing_events(drain(&mut b_only)).is_empty());
    }

    #[tokio::test]
    async fn failed_cursor_update_sends_no_receipt() {
        let store = Arc::new(StubStore {
            fail_mark_read: true,
            ..StubStore::default()
        });
        let dispatcher = Dispatcher::new(store.clone());
        let router = SignalRouter::new(store, dispatcher.clone());

        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let room = Uuid::new_v4();
        let (tx, mut rx) = mpsc::channel(32);
        dispatcher.connect(bob, Uuid::new_v4(), tx, &[room]).await;
        drain(&mut rx);

        let err = router.mark_read(alice, room, Utc::now()).await.unwrap_err();
        assert!(matches!(err, ChatError::StorageUnavailable(_)));
        assert!(read_events(drain(&mut rx)).is_empty());
    }

    #[tokio::test]
    async fn receipt_reaches_other_subscribers_only() {
        let (store, room, alice, bob) = db_store();
        let dispatcher = Dispatcher::new(store.clone());
        let router = SignalRouter::new(store, dispatcher.clone());

        let (tx_a, mut a) = mpsc::channel(32);
        let (tx_b, mut b) = mpsc::channel(32);
        dispatcher.connect(alice, Uuid::new_v4(), tx_a, &[room]).await;
        dispatcher.connect(bob, Uuid::new_v4(), tx_b, &[room]).await;
        drain(&mut a);
        drain(&mut b);

        let at = Utc::now();
        let effective = router.mark_read(alice, room, at).await.unwrap();

        assert!(read_events(drain(&mut a)).is_empty());
        let got = read_events(drain(&mut b));
        assert_eq!(got.len(), 1);
        assert!(
            matches!(got[0], ServerEvent::MessageRead { room_id, user_id, timestamp }
                if room_id == room && user_id == alice && timestamp == effective)
        );
    }
}
