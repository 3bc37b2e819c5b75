//! Typed failures for network, browser, favorites and player operations

use thiserror::Error;

/// Network-level failure of a single HTTP attempt
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("host not found: {0}")]
    Dns(String),
    #[error("HTTP error: {0}")]
    Status(u16),
    #[error("read failed: {0}")]
    Io(String),
    #[error("request failed: {0}")]
    Other(String),
    /// Another fetch of the same catalog has not finished yet
    #[error("a catalog fetch is already in progress")]
    InProgress,
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout)
    }
}

impl From<ureq::Error> for TransportError {
    fn from(err: ureq::Error) -> Self {
        let text = err.to_string();
        match err {
            ureq::Error::Timeout(_) => TransportError::Timeout,
            ureq::Error::StatusCode(code) => TransportError::Status(code),
            ureq::Error::HostNotFound => TransportError::Dns(text),
            ureq::Error::ConnectionFailed => TransportError::Connect(text),
            ureq::Error::Io(io) => match io.kind() {
                std::io::ErrorKind::TimedOut => TransportError::Timeout,
                std::io::ErrorKind::ConnectionRefused => TransportError::Connect(text),
                _ => TransportError::Io(text),
            },
            _ => TransportError::Other(text),
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::TimedOut {
            TransportError::Timeout
        } else {
            TransportError::Io(err.to_string())
        }
    }
}

/// Browser automation failure; ends the current sniffing session only
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SniffError {
    #[error("browser launch failed: {0}")]
    Launch(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("navigation timed out")]
    Timeout,
    #[error("browser runtime error: {0}")]
    Runtime(String),
}

#[derive(Debug, Error)]
pub enum FavoritesError {
    #[error("favorites file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("favorites encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("failed to launch player '{player}': {source}")]
    Spawn {
        player: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no stream loaded")]
    NotLoaded,
    #[error("'{0}' is not supported by an external player")]
    Unsupported(&'static str),
}
