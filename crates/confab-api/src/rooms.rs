use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use confab_db::queries::room_from_row;
use confab_db::parse_ts;
use confab_gateway::store::blocking;
use confab_types::api::{
    Claims, CreateRoomRequest, RoomResponse, UpdateParticipantRequest, UpdateRoomRequest,
};
use confab_types::error::ChatError;
use confab_types::models::RoomKind;

use crate::error::ApiError;
use crate::state::AppState;

pub async fn create_room(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateRoomRequest>,
) -> Result<impl IntoResponse, ApiError> {
    match req.kind {
        RoomKind::Direct => {
            let others: Vec<Uuid> = req
                .member_ids
                .iter()
                .copied()
                .filter(|id| *id != claims.sub)
                .collect();
            if others.len() != 1 {
                return Err(ApiError::bad_request(
                    "a direct room has exactly two participants",
                ));
            }
            if req.name.is_some() {
                return Err(ApiError::bad_request("direct rooms are unnamed"));
            }
        }
        RoomKind::Group => {
            if req.name.as_deref().is_none_or(str::is_empty) {
                return Err(ApiError::bad_request("group rooms require a name"));
            }
        }
    }

    let db = state.db.clone();
    let creator = claims.sub;
    let kind = req.kind;
    let room = blocking(move || {
        db.create_room(
            Uuid::new_v4(),
            kind,
            req.name.as_deref(),
            req.avatar_url.as_deref(),
            creator,
            &req.member_ids,
        )
    })
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(RoomResponse {
            room,
            last_read_at: None,
            muted: false,
            archived: false,
            is_admin: matches!(kind, RoomKind::Group),
        }),
    ))
}

pub async fn list_rooms(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let user_id = claims.sub;
    let memberships = blocking(move || db.list_rooms(user_id)).await?;

    let rooms = memberships
        .into_iter()
        .map(|m| {
            Ok(RoomResponse {
                room: room_from_row(m.room)?,
                last_read_at: m.last_read_at.as_deref().map(parse_ts).transpose()?,
                muted: m.muted,
                archived: m.archived,
                is_admin: m.is_admin,
            })
        })
        .collect::<Result<Vec<_>, ChatError>>()?;

    Ok(Json(rooms))
}

/// Metadata updates are admin-only in group rooms; direct rooms carry no
/// mutable metadata.
pub async fn update_room(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateRoomRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let user_id = claims.sub;
    let participant = blocking(move || db.get_participant(room_id, user_id))
        .await?
        .ok_or(ChatError::NotAParticipant(room_id))?;
    if !participant.is_admin {
        return Err(ChatError::Forbidden.into());
    }

    let db = state.db.clone();
    let room = blocking(move || {
        db.update_room(room_id, req.name.as_deref(), req.avatar_url.as_deref())
    })
    .await?;

    Ok(Json(RoomResponse {
        room,
        last_read_at: participant.last_read_at,
        muted: participant.muted,
        archived: participant.archived,
        is_admin: participant.is_admin,
    }))
}

/// Per-user room flags (mute, archive). These never affect fan-out; a muted
/// room still receives every event.
pub async fn update_participant(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateParticipantRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let user_id = claims.sub;
    let participant =
        blocking(move || db.update_participant_flags(room_id, user_id, req.muted, req.archived))
            .await?;
    Ok(Json(participant))
}

/// HTTP read-cursor update. Shares the signal router with the gateway, so
/// the receipt fan-out and monotonic clamp behave identically on both
/// transports.
pub async fn mark_read(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let effective = state
        .signals
        .mark_read(claims.sub, room_id, Utc::now())
        .await?;
    Ok(Json(json!({ "last_read_at": effective })))
}
