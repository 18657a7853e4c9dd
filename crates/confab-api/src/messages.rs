use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use confab_db::queries::{parse_uuid, view_from_row};
use confab_gateway::engine::MessageDraft;
use confab_gateway::store::blocking;
use confab_types::api::{Claims, EditMessageRequest, SendMessageRequest};
use confab_types::error::ChatError;
use confab_types::models::{Attachment, MessageView, ReactionGroup, Sender};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor-based pagination: pass the `created_at` of the oldest message
    /// from the previous page to fetch older messages.
    pub before: Option<DateTime<Utc>>,
}

fn default_limit() -> u32 {
    50
}

/// HTTP send path. Routes through the same engine as the gateway, so the
/// message is durable before any subscriber sees it and the sender's own
/// connected sessions receive the broadcast too.
pub async fn send_message(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let sender = Sender {
        id: claims.sub,
        display_name: claims.display_name,
    };
    let draft = MessageDraft {
        content: req.content,
        kind: req.kind,
        reply_to_id: req.reply_to_id,
        attachment: req.attachment_url.map(|url| Attachment {
            url,
            name: req.attachment_name,
            size: req.attachment_size,
        }),
    };

    let view = state.engine.submit_message(sender, room_id, draft).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn get_messages(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.min(200);
    let before = query.before;
    let user_id = claims.sub;

    let db = state.db.clone();
    let (rows, reaction_rows) = blocking(move || {
        // History is participant-only, unlike the live fan-out which relies
        // on subscriptions established at session start
        if db.get_participant(room_id, user_id)?.is_none() {
            return Err(ChatError::NotAParticipant(room_id));
        }

        let rows = db.get_messages(room_id, limit, before)?;
        let message_ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let reaction_rows = db.get_reactions_for_messages(&message_ids)?;
        Ok((rows, reaction_rows))
    })
    .await?;

    // Group reactions by message_id -> emoji -> user_ids
    let mut reaction_map: HashMap<String, HashMap<String, Vec<Uuid>>> = HashMap::new();
    for r in &reaction_rows {
        let emoji_map = reaction_map.entry(r.message_id.clone()).or_default();
        let user_ids = emoji_map.entry(r.emoji.clone()).or_default();
        user_ids.push(parse_uuid(&r.user_id)?);
    }

    let messages = rows
        .into_iter()
        .map(|row| {
            let reactions = reaction_map
                .get(&row.id)
                .map(|emoji_map| {
                    emoji_map
                        .iter()
                        .map(|(emoji, user_ids)| ReactionGroup {
                            emoji: emoji.clone(),
                            count: user_ids.len(),
                            user_ids: user_ids.clone(),
                        })
                        .collect()
                })
                .unwrap_or_default();

            let mut view = view_from_row(row)?;
            view.reactions = reactions;
            Ok(view)
        })
        .collect::<Result<Vec<MessageView>, ChatError>>()?;

    Ok(Json(messages))
}

pub async fn edit_message(
    State(state): State<AppState>,
    Path((_room_id, message_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<EditMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let editor = Sender {
        id: claims.sub,
        display_name: claims.display_name,
    };
    let view = state
        .engine
        .edit_message(editor, message_id, req.content)
        .await?;
    Ok(Json(view))
}

pub async fn delete_message(
    State(state): State<AppState>,
    Path((_room_id, message_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    state.engine.delete_message(claims.sub, message_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
