use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use confab_types::events::ServerEvent;

use crate::presence::PresenceTracker;
use crate::registry::{ConnectionRegistry, EventSender};
use crate::rooms::RoomIndex;
use crate::store::SharedStore;

/// Fan-out hub: composes the connection registry, the room membership
/// index, and the presence tracker behind one cheaply clonable handle.
/// Constructed once at process start and injected everywhere; there is no
/// ambient global connection map.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    registry: ConnectionRegistry,
    rooms: RoomIndex,
    presence: PresenceTracker,
}

impl Dispatcher {
    pub fn new(store: SharedStore) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                registry: ConnectionRegistry::new(),
                rooms: RoomIndex::new(),
                presence: PresenceTracker::new(store),
            }),
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.inner.registry
    }

    pub fn rooms(&self) -> &RoomIndex {
        &self.inner.rooms
    }

    /// Register a session and subscribe it to its rooms. Broadcasts
    /// `user_status: online` iff this is the user's first live session.
    pub async fn connect(&self, user_id: Uuid, conn_id: Uuid, tx: EventSender, rooms: &[Uuid]) {
        let came_online = self.inner.registry.register(user_id, conn_id, tx).await;
        for room_id in rooms {
            self.inner.rooms.subscribe(conn_id, *room_id).await;
        }
        if came_online {
            let event = self.inner.presence.transition(user_id, true);
            self.broadcast_all(event).await;
        }
    }

    /// Tear down a session: registry removal, index cleanup, and the
    /// offline transition if this was the user's last session. Idempotent:
    /// a connection kicked during fan-out and later torn down by its own
    /// task produces exactly one offline event.
    pub async fn disconnect(&self, conn_id: Uuid) {
        self.inner.rooms.remove_connection(conn_id).await;
        if let Some(removed) = self.inner.registry.remove(conn_id).await {
            if removed.went_offline {
                let event = self.inner.presence.transition(removed.user_id, false);
                self.broadcast_all(event).await;
            }
        }
    }

    /// Deliver an event to one connection (error replies, snapshots).
    pub async fn send_to(&self, conn_id: Uuid, event: ServerEvent) {
        self.deliver(vec![conn_id], event).await;
    }

    /// Deliver to every live connection. Presence changes are global, not
    /// scoped to shared rooms.
    pub async fn broadcast_all(&self, event: ServerEvent) {
        let targets = self.inner.registry.all_connections().await;
        self.deliver(targets, event).await;
    }

    /// Deliver to every subscriber of a room.
    pub async fn fan_out_room(&self, room_id: Uuid, event: ServerEvent) {
        let targets = self.inner.rooms.subscribers_of(room_id).await;
        self.deliver(targets, event).await;
    }

    /// Deliver to a room's subscribers minus every session of one user
    /// (typing indicators, read receipts).
    pub async fn fan_out_room_excluding(
        &self,
        room_id: Uuid,
        excluded_user: Uuid,
        event: ServerEvent,
    ) {
        let mut targets = self.inner.rooms.subscribers_of(room_id).await;
        let own = self.inner.registry.sessions_of(excluded_user).await;
        targets.retain(|conn| !own.contains(conn));
        self.deliver(targets, event).await;
    }

    pub async fn online_users(&self) -> Vec<Uuid> {
        self.inner.registry.online_users().await
    }

    /// Core delivery loop. Per-connection failures are isolated: a full
    /// queue or dead receiver gets that connection kicked, and any offline
    /// transition that causes is queued as further work rather than
    /// recursing.
    async fn deliver(&self, targets: Vec<Uuid>, event: ServerEvent) {
        let mut pending = vec![(targets, event)];

        while let Some((targets, event)) = pending.pop() {
            let failed = self.inner.registry.try_send_many(&targets, &event).await;

            for conn_id in failed {
                warn!(%conn_id, "outbound queue overflowed, dropping connection");
                self.inner.rooms.remove_connection(conn_id).await;
                if let Some(removed) = self.inner.registry.remove(conn_id).await {
                    debug!(user_id = %removed.user_id, %conn_id, "connection kicked");
                    if removed.went_offline {
                        let offline = self.inner.presence.transition(removed.user_id, false);
                        let all = self.inner.registry.all_connections().await;
                        pending.push((all, offline));
                    }
                }
            }
        }
    }
}
