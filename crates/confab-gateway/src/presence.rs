use tracing::debug;
use uuid::Uuid;

use confab_types::events::{PresenceStatus, ServerEvent};

use crate::store::SharedStore;

/// Turns session-count transitions into presence events. The transition
/// itself (0↔1) is decided inside the connection registry's lock, so this
/// component only shapes the event and maintains the advisory
/// `last_status` mirror on the user record. The mirror is best effort and
/// never consulted for online/offline decisions.
#[derive(Clone)]
pub struct PresenceTracker {
    store: SharedStore,
}

impl PresenceTracker {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub fn transition(&self, user_id: Uuid, online: bool) -> ServerEvent {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = store.set_last_status(user_id, online) {
                debug!(%user_id, error = %e, "presence mirror update failed");
            }
        });

        ServerEvent::UserStatus {
            user_id,
            status: if online {
                PresenceStatus::Online
            } else {
                PresenceStatus::Offline
            },
        }
    }
}
