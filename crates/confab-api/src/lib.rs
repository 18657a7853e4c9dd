//! HTTP fallback surface. Every handler routes through the same engine and
//! signal router as the WebSocket gateway, so a message sent over HTTP is
//! persisted, fanned out, and receipted identically to one sent over the
//! socket.

pub mod error;
pub mod messages;
pub mod middleware;
pub mod reactions;
pub mod rooms;
pub mod state;
