use axum::{Json, http::StatusCode, response::IntoResponse, response::Response};
use serde_json::json;
use tracing::error;

use confab_types::error::ChatError;

/// Maps the shared error taxonomy onto HTTP statuses. Both transports
/// surface the same `ChatError`; only the envelope differs.
pub enum ApiError {
    Chat(ChatError),
    BadRequest(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        Self::Chat(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Chat(err) => {
                let status = match &err {
                    ChatError::Unauthenticated => StatusCode::UNAUTHORIZED,
                    ChatError::NotAParticipant(_) | ChatError::Forbidden => StatusCode::FORBIDDEN,
                    ChatError::RoomNotFound(_) | ChatError::MessageNotFound(_) => {
                        StatusCode::NOT_FOUND
                    }
                    ChatError::InvalidReply => StatusCode::BAD_REQUEST,
                    ChatError::StorageUnavailable(_) => {
                        error!(error = %err, "storage failure surfaced to HTTP client");
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                    ChatError::ConnectionOverloaded => StatusCode::SERVICE_UNAVAILABLE,
                };
                (status, err.to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
