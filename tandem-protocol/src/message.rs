//! RPC message types

use serde::de::{Error as _, Unexpected};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Identifier tying every message to one outstanding call or subscription.
///
/// Chosen by the client, monotonically increasing.
pub type CallId = u64;

/// A protocol message.
///
/// The set is closed. Payloads that match none of the variants are rejected by
/// deserialization and must be treated as inert by the receiver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    /// Invoke `method`. `subscribe = true` opens a stream.
    Call {
        id: CallId,
        method: String,
        #[serde(default)]
        arg: Value,
        #[serde(default)]
        subscribe: bool,
    },
    /// One unary result or one emitted stream value.
    Result { id: CallId, result: Value },
    /// Failure text. Terminal for unary calls only.
    Error { id: CallId, error: String },
    /// Stream completed (server to client) or cancel request (client to server).
    ///
    /// The flag is always `true`; `"dispose": false` matches no variant.
    Dispose {
        id: CallId,
        #[serde(deserialize_with = "dispose_flag")]
        dispose: bool,
    },
}

fn dispose_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    if bool::deserialize(deserializer)? {
        Ok(true)
    } else {
        Err(D::Error::invalid_value(Unexpected::Bool(false), &"true"))
    }
}

impl Message {
    /// Create a call message
    pub fn call(id: CallId, method: impl Into<String>, arg: Value, subscribe: bool) -> Self {
        Self::Call {
            id,
            method: method.into(),
            arg,
            subscribe,
        }
    }

    /// Create a result message
    pub fn result(id: CallId, result: Value) -> Self {
        Self::Result { id, result }
    }

    /// Create an error message
    pub fn error(id: CallId, error: impl Into<String>) -> Self {
        Self::Error {
            id,
            error: error.into(),
        }
    }

    /// Create a dispose message
    pub fn dispose(id: CallId) -> Self {
        Self::Dispose { id, dispose: true }
    }

    /// The call this message belongs to
    pub fn id(&self) -> CallId {
        match self {
            Self::Call { id, .. }
            | Self::Result { id, .. }
            | Self::Error { id, .. }
            | Self::Dispose { id, .. } => *id,
        }
    }

    /// Short variant label, for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Call { subscribe: true, .. } => "subscribe",
            Self::Call { .. } => "call",
            Self::Result { .. } => "result",
            Self::Error { .. } => "error",
            Self::Dispose { .. } => "dispose",
        }
    }

    /// Parse a message from a JSON value, `None` if it matches no variant
    pub fn from_value(value: Value) -> Option<Self> {
        serde_json::from_value(value).ok()
    }
}
