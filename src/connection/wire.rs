use serde::Deserialize;
use serde_json::Value;

use crate::error::{ClientError, ClientResult};

/// A pushed server event
#[derive(Debug, Clone, PartialEq)]
pub struct ServerEvent {
    pub topic: String,
    pub payload: Value,
}

impl ServerEvent {
    pub fn new(topic: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }
}

/// Frame layout sent by the server. Other keys such as `status` are ignored.
#[derive(Debug, Deserialize)]
struct WireMessage {
    event: String,
    #[serde(default)]
    data: Value,
}

/// Decode one websocket text frame
pub fn decode_frame(text: &str) -> ClientResult<ServerEvent> {
    let message: WireMessage =
        serde_json::from_str(text).map_err(|e| ClientError::invalid_payload("frame", e))?;
    Ok(ServerEvent {
        topic: message.event,
        payload: message.data,
    })
}
