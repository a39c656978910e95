use thiserror::Error;

/// Failure taxonomy of the call engine. Transport and media failures end
/// the session; protocol anomalies are logged and dropped where they occur;
/// state conflicts are rejected synchronously without touching state.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("media acquisition failed: {0}")]
    Media(#[from] media::MediaError),

    #[error("peer connection failure: {0}")]
    Peer(#[from] media::PeerError),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("invalid operation: {0}")]
    StateConflict(String),

    #[error("call engine is not running")]
    NotRunning,
}

impl CallError {
    pub fn transport(message: impl Into<String>) -> Self {
        CallError::Transport(message.into())
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        CallError::Protocol(message.into())
    }

    pub fn state_conflict(message: impl Into<String>) -> Self {
        CallError::StateConflict(message.into())
    }
}
