//! Error types for NewsCast

use thiserror::Error;

/// Result type alias for NewsCast operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in NewsCast
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Microphone permission or hardware failure
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Audio error
    #[error("audio error: {0}")]
    Audio(String),

    /// Remote voice endpoint rejected or could not establish the session
    #[error("channel open failed: {0}")]
    ChannelOpen(String),

    /// Mid-session failure reported by the transport
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed inbound audio fragment
    #[error("decode error: {0}")]
    Decode(String),

    /// One-shot generative API error
    #[error("genai error: {0}")]
    GenAi(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket error
    #[error("websocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// WAV encoding error
    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(e))
    }
}
