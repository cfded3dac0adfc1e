use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Unauthorized: invalid session token")]
    Unauthorized,
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),
    #[error("Missing key")]
    MissingToken,
    #[error("Upstream link failed: {0}")]
    Upstream(String),
    #[error("Not connected to the hub")]
    NotConnected,
    #[error("Session loop is gone")]
    ChannelClosed,
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RelayError>;
