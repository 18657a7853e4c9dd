use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

/// In-memory mapping of rooms to subscribed connections, populated once per
/// session from the persistence gateway at join time. The reverse map makes
/// disconnect teardown a pure in-memory operation; membership is never
/// recomputed from storage mid-session, so a room change that lands after
/// join cannot race the teardown.
#[derive(Clone)]
pub struct RoomIndex {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Default)]
struct Inner {
    by_room: HashMap<Uuid, HashSet<Uuid>>,
    by_conn: HashMap<Uuid, HashSet<Uuid>>,
}

impl RoomIndex {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
        }
    }

    pub async fn subscribe(&self, conn_id: Uuid, room_id: Uuid) {
        let mut inner = self.inner.write().await;
        inner.by_room.entry(room_id).or_default().insert(conn_id);
        inner.by_conn.entry(conn_id).or_default().insert(room_id);
    }

    pub async fn unsubscribe(&self, conn_id: Uuid, room_id: Uuid) {
        let mut inner = self.inner.write().await;
        if let Some(set) = inner.by_room.get_mut(&room_id) {
            set.remove(&conn_id);
            if set.is_empty() {
                inner.by_room.remove(&room_id);
            }
        }
        if let Some(set) = inner.by_conn.get_mut(&conn_id) {
            set.remove(&room_id);
            if set.is_empty() {
                inner.by_conn.remove(&conn_id);
            }
        }
    }

    pub async fn subscribers_of(&self, room_id: Uuid) -> Vec<Uuid> {
        let inner = self.inner.read().await;
        inner
            .by_room
            .get(&room_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Drop every subscription a connection holds. Returns the rooms it was
    /// subscribed to. Idempotent.
    pub async fn remove_connection(&self, conn_id: Uuid) -> Vec<Uuid> {
        let mut inner = self.inner.write().await;
        let Some(rooms) = inner.by_conn.remove(&conn_id) else {
            return vec![];
        };
        for room_id in &rooms {
            if let Some(set) = inner.by_room.get_mut(room_id) {
                set.remove(&conn_id);
                if set.is_empty() {
                    inner.by_room.remove(room_id);
                }
            }
        }
        rooms.into_iter().collect()
    }
}

impl Default for RoomIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriptions_are_room_scoped() {
        let index = RoomIndex::new();
        let (room_a, room_b) = (Uuid::new_v4(), Uuid::new_v4());
        let (conn_a, conn_b) = (Uuid::new_v4(), Uuid::new_v4());

        index.subscribe(conn_a, room_a).await;
        index.subscribe(conn_b, room_b).await;

        assert_eq!(index.subscribers_of(room_a).await, vec![conn_a]);
        assert_eq!(index.subscribers_of(room_b).await, vec![conn_b]);
    }

    #[tokio::test]
    async fn remove_connection_clears_every_subscription() {
        let index = RoomIndex::new();
        let conn = Uuid::new_v4();
        let rooms: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for room in &rooms {
            index.subscribe(conn, *room).await;
        }

        let mut removed = index.remove_connection(conn).await;
        removed.sort();
        let mut expected = rooms.clone();
        expected.sort();
        assert_eq!(removed, expected);

        for room in &rooms {
            assert!(index.subscribers_of(*room).await.is_empty());
        }
        // Second teardown is a no-op
        assert!(index.remove_connection(conn).await.is_empty());
    }
}
