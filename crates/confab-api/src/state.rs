use std::sync::Arc;

use confab_db::Database;
use confab_gateway::engine::BroadcastEngine;
use confab_gateway::signals::SignalRouter;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub engine: BroadcastEngine,
    pub signals: SignalRouter,
    pub jwt_secret: String,
}
