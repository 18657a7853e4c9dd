use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use confab_types::error::ChatError;
use confab_types::events::{ClientCommand, PresenceStatus, ServerEvent};
use confab_types::models::{Attachment, Sender};

use crate::auth::{Identity, IdentityResolver};
use crate::dispatcher::Dispatcher;
use crate::engine::{BroadcastEngine, MessageDraft};
use crate::registry::OUTBOUND_QUEUE;
use crate::signals::SignalRouter;
use crate::store::{SharedStore, blocking, with_retry};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long a fresh connection gets to present its `auth` frame.
const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Attempts for the session-establishment membership fetch; only
/// `StorageUnavailable` is retried.
const MEMBERSHIP_FETCH_ATTEMPTS: u32 = 3;

/// Everything a live connection needs, wired once at process start.
#[derive(Clone)]
pub struct GatewayContext {
    pub dispatcher: Dispatcher,
    pub engine: BroadcastEngine,
    pub signals: SignalRouter,
    pub store: SharedStore,
    pub identity: Arc<dyn IdentityResolver>,
}

/// Handle one WebSocket connection end to end: auth handshake, session
/// registration, command dispatch, and single-shot teardown.
pub async fn handle_connection(socket: WebSocket, ctx: GatewayContext) {
    let (mut sender, mut receiver) = socket.split();

    // Step 1: the first frame must be `auth`
    let identity = match wait_for_auth(&mut receiver, &*ctx.identity).await {
        Some(identity) => identity,
        None => {
            let _ = send_event(
                &mut sender,
                &ServerEvent::AuthError {
                    reason: "authentication required".into(),
                },
            )
            .await;
            return;
        }
    };
    let user_id = identity.user_id;

    // Step 2: fetch memberships once, with backoff on transient storage
    // failures. Cached pre-disconnect state is never reused; every new
    // session re-reads storage.
    let rooms = {
        let store = ctx.store.clone();
        let fetched = with_retry(MEMBERSHIP_FETCH_ATTEMPTS, || {
            let store = store.clone();
            blocking(move || store.list_memberships(user_id))
        })
        .await;
        match fetched {
            Ok(rooms) => rooms,
            Err(e) => {
                warn!(%user_id, error = %e, "membership fetch failed, rejecting session");
                let _ = send_event(
                    &mut sender,
                    &ServerEvent::AuthError {
                        reason: "storage unavailable".into(),
                    },
                )
                .await;
                return;
            }
        }
    };

    if send_event(
        &mut sender,
        &ServerEvent::AuthSuccess {
            user_id,
            display_name: identity.display_name.clone(),
            rooms: rooms.clone(),
        },
    )
    .await
    .is_err()
    {
        return;
    }

    // Step 3: current presence snapshot, so the client sees who is already
    // online before live events start flowing
    for online_user in ctx.dispatcher.online_users().await {
        if send_event(
            &mut sender,
            &ServerEvent::UserStatus {
                user_id: online_user,
                status: PresenceStatus::Online,
            },
        )
        .await
        .is_err()
        {
            return;
        }
    }

    // Step 4: register the session and subscribe it to its rooms
    let conn_id = Uuid::new_v4();
    let (tx, mut rx) = mpsc::channel(OUTBOUND_QUEUE);
    ctx.dispatcher.connect(user_id, conn_id, tx, &rooms).await;

    info!(%user_id, %conn_id, rooms = rooms.len(), "gateway session started");

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Writer: forwards queued events to the socket, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                maybe = rx.recv() => {
                    let Some(event) = maybe else { break };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!(%conn_id, "heartbeat timeout, dropping connection");
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Reader: dispatches typed commands from the client
    let reader_ctx = ctx.clone();
    let reader_identity = identity.clone();
    let session_rooms: HashSet<Uuid> = rooms.iter().copied().collect();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&reader_ctx, &reader_identity, conn_id, &session_rooms, cmd)
                            .await;
                    }
                    Err(e) => {
                        // Unknown tags and malformed frames are rejected
                        // explicitly, never ignored
                        warn!(
                            user_id = %reader_identity.user_id,
                            error = %e,
                            "bad command frame"
                        );
                        reader_ctx
                            .dispatcher
                            .send_to(
                                conn_id,
                                ServerEvent::Error {
                                    reason: "unrecognized command".into(),
                                },
                            )
                            .await;
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Whichever half finishes first ends the session
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    // Teardown within one scheduling step: unregister, unsubscribe from
    // every room (from the in-memory index, not storage), presence
    // re-evaluation
    ctx.dispatcher.disconnect(conn_id).await;
    info!(%user_id, %conn_id, "gateway session ended");
}

async fn send_event(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<(), ()> {
    match serde_json::to_string(event) {
        Ok(text) => sender.send(Message::Text(text.into())).await.map_err(|_| ()),
        Err(e) => {
            warn!(error = %e, "failed to serialize event");
            Ok(())
        }
    }
}

async fn wait_for_auth(
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
    resolver: &dyn IdentityResolver,
) -> Option<Identity> {
    let deadline = tokio::time::timeout(AUTH_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(ClientCommand::Auth { token }) =
                    serde_json::from_str::<ClientCommand>(&text)
                {
                    return resolver.resolve(&token).ok();
                }
                // Anything before a valid auth frame fails the handshake
                return None;
            }
        }
        None
    });

    deadline.await.ok().flatten()
}

async fn handle_command(
    ctx: &GatewayContext,
    identity: &Identity,
    conn_id: Uuid,
    session_rooms: &HashSet<Uuid>,
    cmd: ClientCommand,
) {
    let user_id = identity.user_id;
    match cmd {
        ClientCommand::Auth { .. } => {} // Already authenticated

        ClientCommand::Message {
            room_id,
            content,
            kind,
            reply_to_id,
            attachment_url,
            attachment_name,
            attachment_size,
        } => {
            let sender = Sender {
                id: user_id,
                display_name: identity.display_name.clone(),
            };
            let draft = MessageDraft {
                content,
                kind,
                reply_to_id,
                attachment: attachment_url.map(|url| Attachment {
                    url,
                    name: attachment_name,
                    size: attachment_size,
                }),
            };
            if let Err(e) = ctx.engine.submit_message(sender, room_id, draft).await {
                reject(ctx, conn_id, user_id, &e).await;
            }
        }

        ClientCommand::TypingStart { room_id } => {
            if session_rooms.contains(&room_id) {
                ctx.signals.typing(user_id, room_id, true).await;
            } else {
                reject(ctx, conn_id, user_id, &ChatError::NotAParticipant(room_id)).await;
            }
        }

        ClientCommand::TypingStop { room_id } => {
            if session_rooms.contains(&room_id) {
                ctx.signals.typing(user_id, room_id, false).await;
            } else {
                reject(ctx, conn_id, user_id, &ChatError::NotAParticipant(room_id)).await;
            }
        }

        ClientCommand::MarkRead { room_id } => {
            if let Err(e) = ctx.signals.mark_read(user_id, room_id, Utc::now()).await {
                reject(ctx, conn_id, user_id, &e).await;
            }
        }
    }
}

/// Rejections go to the originating connection only; other participants
/// never observe them.
async fn reject(ctx: &GatewayContext, conn_id: Uuid, user_id: Uuid, err: &ChatError) {
    info!(%user_id, %conn_id, error = %err, "command rejected");
    ctx.dispatcher
        .send_to(
            conn_id,
            ServerEvent::Error {
                reason: err.to_string(),
            },
        )
        .await;
}
