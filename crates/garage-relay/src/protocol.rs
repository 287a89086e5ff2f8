//! Wire format for the index endpoint and websocket clients

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Server → Client: the value served at `/` and pushed to websocket clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSnapshot {
    pub timestamp: DateTime<Utc>,
}

impl TimeSnapshot {
    pub fn now() -> Self {
        Self { timestamp: Utc::now() }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Client → Server envelope
#[derive(Debug, Clone, Deserialize)]
struct ClientRequest {
    #[serde(default)]
    cmd: Option<String>,
}

/// Commands a websocket client can send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// Reply with the current snapshot
    Get,
    /// Anything else, including a missing `cmd`
    Unknown(Option<String>),
}

impl ClientCommand {
    /// Decode a text frame. Malformed JSON is an error.
    pub fn decode(text: &str) -> Result<Self> {
        let request: ClientRequest = serde_json::from_str(text)?;
        Ok(match request.cmd.as_deref() {
            Some("get") => ClientCommand::Get,
            _ => ClientCommand::Unknown(request.cmd),
        })
    }
}

/// The reply owed for a text frame, if any
pub fn reply_for(text: &str) -> Result<Option<String>> {
    match ClientCommand::decode(text)? {
        ClientCommand::Get => Ok(Some(TimeSnapshot::now().to_json()?)),
        ClientCommand::Unknown(_) => Ok(None),
    }
}
