pub mod auth;
pub mod connection;
pub mod dispatcher;
pub mod engine;
pub mod presence;
pub mod registry;
pub mod rooms;
pub mod signals;
pub mod store;

#[cfg(test)]
mod testutil;

pub use auth::{Identity, IdentityResolver, JwtResolver};
pub use connection::GatewayContext;
pub use dispatcher::Dispatcher;
pub use engine::BroadcastEngine;
pub use signals::SignalRouter;
pub use store::MessageStore;
