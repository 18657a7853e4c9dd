use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use uuid::Uuid;

use confab_types::api::{Claims, ToggleReactionRequest, ToggleReactionResponse};

use crate::error::ApiError;
use crate::state::AppState;

/// Toggle semantics: same (message, user, emoji) triple removes, anything
/// else adds. The engine broadcasts the matching `reaction_add` or
/// `reaction_remove` to the owning room.
pub async fn toggle_reaction(
    State(state): State<AppState>,
    Path((_room_id, message_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ToggleReactionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let added = state
        .engine
        .toggle_reaction(claims.sub, message_id, req.emoji)
        .await?;
    Ok(Json(ToggleReactionResponse { added }))
}
