//! Websocket framing

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::Message;

/// Frame sent over a websocket.
///
/// `key` lets several logical channels share one socket. A frame carries either
/// a message (`msg`) or a heartbeat (`ping: true` asks, `ping: false` answers).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ping: Option<bool>,
}

impl Envelope {
    /// Wrap a message
    pub fn message(key: impl Into<String>, message: &Message) -> serde_json::Result<Self> {
        Ok(Self {
            key: key.into(),
            msg: Some(serde_json::to_value(message)?),
            ping: None,
        })
    }

    /// Heartbeat request
    pub fn ping(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            msg: None,
            ping: Some(true),
        }
    }

    /// Heartbeat answer
    pub fn pong(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            msg: None,
            ping: Some(false),
        }
    }

    pub fn is_ping(&self) -> bool {
        self.ping == Some(true)
    }

    pub fn is_pong(&self) -> bool {
        self.ping == Some(false)
    }

    /// The carried message, if present and well-formed
    pub fn into_message(self) -> Option<Message> {
        self.msg.and_then(Message::from_value)
    }
}
