//! Error types shared across the connection, client, and config-store layers.
//!
//! Module-level errors use [`thiserror`] so callers can match on variants;
//! the binary entry point and other orchestration code use [`anyhow`]
//! instead (see `main.rs`).

use thiserror::Error;

/// Errors raised by the [`crate::connection`] layer.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("not connected")]
    NotConnected,
    #[error("websocket handshake failed: {0}")]
    Handshake(#[source] Box<tokio_tungstenite::tungstenite::Error>),
    #[error("connection closed: {0}")]
    Closed(String),
    #[error("serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),
    #[error("invalid websocket url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl From<tokio_tungstenite::tungstenite::Error> for ConnectionError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        ConnectionError::Handshake(Box::new(e))
    }
}

/// Errors raised while validating or dispatching a wire message.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("malformed message: {0}")]
    Malformed(#[source] serde_json::Error),
}

/// Errors raised by [`crate::config::ConfigStore`] implementations.
#[derive(Debug, Error)]
pub enum ConfigStoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("no config found for the given key")]
    NotFound,
}
