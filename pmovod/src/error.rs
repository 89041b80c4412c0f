//! Error types for the VOD streaming controller

/// Result type alias for pmovod operations
pub type Result<T> = std::result::Result<T, VodError>;

/// Errors surfaced by the controller, its codec and its transports
#[derive(Debug, thiserror::Error)]
pub enum VodError {
    /// Malformed frame or message on the duplex channel
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// JSON encoding/decoding failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The channel has been torn down
    #[error("Channel closed")]
    ChannelClosed,

    /// Playback rate must be finite and strictly positive
    #[error("Invalid playback rate: {0}")]
    InvalidRate(f64),

    /// Seek target is not a number
    #[error("Invalid position: {0}")]
    InvalidPosition(f64),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// `play()` called before any source was set
    #[error("No source set")]
    NoSource,

    /// The player task is gone
    #[error("Player stopped")]
    PlayerStopped,
}

impl VodError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }
}

/// Rejections reported by a buffer sink.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SinkError {
    /// The sink cannot take more data right now
    #[error("sink quota exceeded")]
    QuotaExceeded,

    /// The sink is not in a state accepting this call (closed, ended, updating)
    #[error("sink in invalid state: {0}")]
    InvalidState(String),

    #[error("{0}")]
    Other(String),
}

impl SinkError {
    /// Rejections that are recovered by re-queuing and retrying later.
    pub fn is_transient(&self) -> bool {
        matches!(self, SinkError::QuotaExceeded | SinkError::InvalidState(_))
    }
}
