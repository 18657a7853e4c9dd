use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{get, patch, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use confab_api::middleware::require_auth;
use confab_api::state::{AppState, AppStateInner};
use confab_api::{messages, reactions, rooms};
use confab_db::Database;
use confab_gateway::store::SharedStore;
use confab_gateway::{
    BroadcastEngine, Dispatcher, GatewayContext, JwtResolver, SignalRouter, connection,
};

/// Wire the full application: one dispatcher, one engine, one signal
/// router, shared by the WebSocket gateway and the HTTP surface.
pub fn build_router(db: Arc<Database>, jwt_secret: impl Into<String>) -> Router {
    let jwt_secret = jwt_secret.into();

    let store: SharedStore = db.clone();
    let dispatcher = Dispatcher::new(store.clone());
    let engine = BroadcastEngine::new(store.clone(), dispatcher.clone());
    let signals = SignalRouter::new(store.clone(), dispatcher.clone());

    let ctx = GatewayContext {
        dispatcher,
        engine: engine.clone(),
        signals: signals.clone(),
        store,
        identity: Arc::new(JwtResolver::new(jwt_secret.clone())),
    };

    let app_state: AppState = Arc::new(AppStateInner {
        db,
        engine,
        signals,
        jwt_secret,
    });

    let protected_routes = Router::new()
        .route("/rooms", post(rooms::create_room).get(rooms::list_rooms))
        .route("/rooms/{room_id}", patch(rooms::update_room))
        .route(
            "/rooms/{room_id}/participant",
            patch(rooms::update_participant),
        )
        .route("/rooms/{room_id}/read", post(rooms::mark_read))
        .route(
            "/rooms/{room_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route(
            "/rooms/{room_id}/messages/{message_id}",
            patch(messages::edit_message).delete(messages::delete_message),
        )
        .route(
            "/rooms/{room_id}/messages/{message_id}/reactions",
            post(reactions::toggle_reaction),
        )
        .layer(middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ))
        .with_state(app_state);

    let ws_route = Router::new().route("/gateway", get(ws_upgrade)).with_state(ctx);

    Router::new()
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn ws_upgrade(State(ctx): State<GatewayContext>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_connection(socket, ctx))
}
