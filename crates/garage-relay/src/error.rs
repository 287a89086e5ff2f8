use crate::registry::ClientId;
use thiserror::Error;

/// Errors raised by the relay
#[derive(Error, Debug)]
pub enum RelayError {
    /// The client's outbound channel is gone
    #[error("client {0} closed")]
    Closed(ClientId),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RelayError>;
