use thiserror::Error;

/// Error types for the idea board server
#[derive(Debug, Error)]
pub enum BoardError {
    /// Room and membership errors
    #[error("Room {0} not found")]
    RoomNotFound(String),

    #[error("Already in room {0}")]
    AlreadyInRoom(String),

    #[error("Not in a room")]
    NotInRoom,

    /// Opinion errors
    #[error("Opinion {0} not found")]
    OpinionNotFound(String),

    #[error("Only the author can delete opinion {0}")]
    NotOpinionCreator(String),

    /// Protocol errors
    #[error("Malformed message: {0}")]
    MalformedMessage(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Generic errors
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Convenience type alias for Results using BoardError
pub type Result<T> = std::result::Result<T, BoardError>;

impl BoardError {
    /// Helper to create Internal errors with context
    pub fn internal(msg: impl Into<String>) -> Self {
        BoardError::Internal(msg.into())
    }

    /// Whether the offending sender should be told about this error.
    ///
    /// Stale opinion ids and messages sent before attaching are expected
    /// races and are dropped without a reply.
    pub fn is_client_facing(&self) -> bool {
        matches!(
            self,
            BoardError::RoomNotFound(_)
                | BoardError::AlreadyInRoom(_)
                | BoardError::NotOpinionCreator(_)
                | BoardError::MalformedMessage(_)
        )
    }
}
