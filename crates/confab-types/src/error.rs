use thiserror::Error;
use uuid::Uuid;

/// Core error taxonomy. Validation errors are recovered locally and
/// surfaced only to the originating connection; `StorageUnavailable`
/// aborts the in-flight operation before any broadcast.
#[derive(Debug, Clone, Error)]
pub enum ChatError {
    #[error("not authenticated")]
    Unauthenticated,

    #[error("not a participant of room {0}")]
    NotAParticipant(Uuid),

    #[error("reply target is not in the same room")]
    InvalidReply,

    #[error("room {0} not found")]
    RoomNotFound(Uuid),

    #[error("message {0} not found")]
    MessageNotFound(Uuid),

    #[error("operation not permitted")]
    Forbidden,

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("connection outbound queue overflowed")]
    ConnectionOverloaded,
}

impl ChatError {
    /// Transient storage failures are the only retryable class; callers on
    /// read paths may retry with backoff, the message-create path fails
    /// closed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_))
    }

    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::StorageUnavailable(err.to_string())
    }
}
