use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::debug;
use uuid::Uuid;

use confab_types::events::ServerEvent;

/// Per-connection outbound queue bound. A subscriber that cannot drain this
/// many pending events is dropped rather than allowed to stall fan-out.
pub const OUTBOUND_QUEUE: usize = 256;

pub type EventSender = mpsc::Sender<ServerEvent>;

/// Result of removing a connection: who owned it, and whether that user now
/// has zero live sessions.
#[derive(Debug, Clone, Copy)]
pub struct Removed {
    pub user_id: Uuid,
    pub went_offline: bool,
}

/// In-memory mapping of users to their live sessions, supporting multiple
/// concurrent sessions per user. The single write lock makes per-user
/// register/remove linearizable, so the 0↔1 transition flags returned here
/// are exact; presence debouncing is structural, not timing-based.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<Uuid, SessionEntry>,
    by_user: HashMap<Uuid, HashSet<Uuid>>,
}

struct SessionEntry {
    user_id: Uuid,
    tx: EventSender,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
        }
    }

    /// Add a session under a user. Returns true iff this took the user from
    /// zero to one live sessions. Re-registering an already-known
    /// connection id is a no-op and never counts as a transition.
    pub async fn register(&self, user_id: Uuid, conn_id: Uuid, tx: EventSender) -> bool {
        let mut inner = self.inner.write().await;
        if inner.sessions.contains_key(&conn_id) {
            return false;
        }

        inner.sessions.insert(conn_id, SessionEntry { user_id, tx });
        let sessions = inner.by_user.entry(user_id).or_default();
        sessions.insert(conn_id);
        let came_online = sessions.len() == 1;

        debug!(%user_id, %conn_id, sessions = sessions.len(), "connection registered");
        came_online
    }

    /// Remove a session. Idempotent: a second removal of the same
    /// connection returns None, so exactly one caller observes the
    /// `went_offline` transition.
    pub async fn remove(&self, conn_id: Uuid) -> Option<Removed> {
        let mut inner = self.inner.write().await;
        let entry = inner.sessions.remove(&conn_id)?;
        let user_id = entry.user_id;

        let went_offline = match inner.by_user.get_mut(&user_id) {
            Some(set) => {
                set.remove(&conn_id);
                if set.is_empty() {
                    inner.by_user.remove(&user_id);
                    true
                } else {
                    false
                }
            }
            None => true,
        };

        debug!(%user_id, %conn_id, went_offline, "connection unregistered");
        Some(Removed {
            user_id,
            went_offline,
        })
    }

    /// Snapshot of a user's live session ids.
    pub async fn sessions_of(&self, user_id: Uuid) -> Vec<Uuid> {
        let inner = self.inner.read().await;
        inner
            .by_user
            .get(&user_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.inner.read().await.by_user.contains_key(&user_id)
    }

    pub async fn online_users(&self) -> Vec<Uuid> {
        self.inner.read().await.by_user.keys().copied().collect()
    }

    pub async fn all_connections(&self) -> Vec<Uuid> {
        self.inner.read().await.sessions.keys().copied().collect()
    }

    /// Non-blocking delivery to a set of connections. Returns the ids whose
    /// queue was full or whose receiver is gone; callers kick those. A slow
    /// connection never delays delivery to the others.
    pub async fn try_send_many(&self, targets: &[Uuid], event: &ServerEvent) -> Vec<Uuid> {
        let inner = self.inner.read().await;
        let mut failed = Vec::new();
        for conn_id in targets {
            let Some(entry) = inner.sessions.get(conn_id) else {
                continue;
            };
            if entry.tx.try_send(event.clone()).is_err() {
                failed.push(*conn_id);
            }
        }
        failed
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender(capacity: usize) -> (EventSender, mpsc::Receiver<ServerEvent>) {
        mpsc::channel(capacity)
    }

    #[tokio::test]
    async fn first_session_is_the_only_online_transition() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let (tx1, _rx1) = sender(4);
        let (tx2, _rx2) = sender(4);

        assert!(registry.register(user, Uuid::new_v4(), tx1).await);
        assert!(!registry.register(user, Uuid::new_v4(), tx2).await);
        assert!(registry.is_online(user).await);
        assert_eq!(registry.sessions_of(user).await.len(), 2);
    }

    #[tokio::test]
    async fn duplicate_registration_does_not_count() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let conn = Uuid::new_v4();
        let (tx, _rx) = sender(4);

        assert!(registry.register(user, conn, tx.clone()).await);
        assert!(!registry.register(user, conn, tx).await);
        assert_eq!(registry.sessions_of(user).await.len(), 1);

        // The one real session still yields exactly one offline transition
        let removed = registry.remove(conn).await.unwrap();
        assert!(removed.went_offline);
        assert!(registry.remove(conn).await.is_none());
    }

    #[tokio::test]
    async fn concurrent_churn_yields_exact_transition_counts() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();

        // 32 sessions racing to register, then racing to unregister: exactly
        // one online and one offline transition regardless of interleaving.
        let conns: Vec<Uuid> = (0..32).map(|_| Uuid::new_v4()).collect();

        let mut handles = Vec::new();
        for conn in &conns {
            let registry = registry.clone();
            let conn = *conn;
            let (tx, rx) = sender(4);
            std::mem::forget(rx);
            handles.push(tokio::spawn(
                async move { registry.register(user, conn, tx).await },
            ));
        }
        let mut online_events = 0;
        for h in handles {
            if h.await.unwrap() {
                online_events += 1;
            }
        }
        assert_eq!(online_events, 1);

        let mut handles = Vec::new();
        for conn in &conns {
            let registry = registry.clone();
            let conn = *conn;
            handles.push(tokio::spawn(async move { registry.remove(conn).await }));
        }
        let mut offline_events = 0;
        for h in handles {
            if let Some(removed) = h.await.unwrap() {
                if removed.went_offline {
                    offline_events += 1;
                }
            }
        }
        assert_eq!(offline_events, 1);
        assert!(!registry.is_online(user).await);
    }

    #[tokio::test]
    async fn full_queue_is_reported_not_awaited() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let conn = Uuid::new_v4();
        let (tx, _rx) = sender(1);
        registry.register(user, conn, tx).await;

        let event = ServerEvent::Error {
            reason: "x".into(),
        };
        assert!(registry.try_send_many(&[conn], &event).await.is_empty());
        // Queue of one is now full
        assert_eq!(registry.try_send_many(&[conn], &event).await, vec![conn]);
    }
}
