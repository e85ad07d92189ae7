//! Error types for the live session orchestrator

use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving a live session
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Capability token issuance or validation failed
    #[error("auth error: {0}")]
    Auth(String),

    /// Camera or microphone unavailable
    #[error("device error: {0}")]
    Device(String),

    /// Audio encode/decode or stream error
    #[error("audio error: {0}")]
    Audio(String),

    /// Streaming channel closed or failed
    #[error("channel error: {0}")]
    Channel(String),

    /// Streaming channel delivered something we could not interpret
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Auxiliary endpoint rate limited the request
    #[error("rate limited: {0}")]
    RateLimit(String),

    /// Auxiliary endpoint quota exhausted
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Auxiliary service returned unparseable content
    #[error("parse error: {0}")]
    Parse(String),

    /// Auxiliary service returned an explicit error
    #[error("service error: {0}")]
    Service(String),

    /// Frame capture or compression error
    #[error("vision error: {0}")]
    Vision(String),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Image decode/encode error
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Coarse failure classes surfaced to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Token issuance/validation failed; a fresh token is required
    Auth,
    /// Camera or microphone unavailable; session continues with less
    Device,
    /// Channel closed or failed; the user may reconnect
    Channel,
    /// Auxiliary endpoint throttled the request
    RateLimit,
    /// Auxiliary endpoint quota exhausted
    QuotaExceeded,
    /// Auxiliary response could not be parsed
    Parse,
    /// Anything else
    Other,
}

impl Error {
    /// Classify this error
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Auth(_) => ErrorKind::Auth,
            Self::Device(_) | Self::Audio(_) => ErrorKind::Device,
            Self::Channel(_) | Self::Protocol(_) => ErrorKind::Channel,
            Self::RateLimit(_) => ErrorKind::RateLimit,
            Self::QuotaExceeded(_) => ErrorKind::QuotaExceeded,
            Self::Parse(_) | Self::Serialization(_) => ErrorKind::Parse,
            _ => ErrorKind::Other,
        }
    }

    /// Whether reconnecting without changing anything could succeed
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::Config(_))
    }

    /// Short actionable message for the user
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Auth(msg) => format!("Could not authorize the live session ({msg}). Try connecting again."),
            Self::Device(msg) | Self::Audio(msg) => {
                format!("A camera or microphone is unavailable ({msg}). Check device permissions.")
            }
            Self::Channel(msg) | Self::Protocol(msg) => {
                format!("The live session ended ({msg}). Reconnect to continue.")
            }
            Self::RateLimit(msg) => format!("Too many requests: {msg}. Wait a moment and retry."),
            Self::QuotaExceeded(msg) => format!("Quota exceeded: {msg}."),
            other => other.to_string(),
        }
    }
}
