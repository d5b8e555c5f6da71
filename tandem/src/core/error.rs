use tandem_protocol::CallId;
use thiserror::Error;

/// Errors surfaced by the RPC client, server and stream sources.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// Empty call on a method whose input does not accept `null`. Never sent.
    #[error("No argument passed for non-null input of RPC function {method}")]
    MissingArgument { method: String },

    #[error("Failed to encode argument for RPC function {method}: {reason}")]
    InputEncoding { method: String, reason: String },

    /// The peer answered with a value that does not fit the declared output.
    #[error("Failed to validate return type of call id {id}, method {method}")]
    OutputValidation {
        id: CallId,
        method: String,
        reason: String,
    },

    /// Error text sent by the peer.
    #[error("{0}")]
    Remote(String),

    /// Error signalled by a local stream producer.
    #[error("{0}")]
    Producer(String),

    #[error("registry already has handler registered for {0}")]
    AlreadyRegistered(String),

    /// The client was disposed while the call was still waiting.
    #[error("call id {id} on method {method} was dropped: client disposed")]
    Disconnected { id: CallId, method: String },
}

impl RpcError {
    /// Producer-side error from any displayable value
    pub fn producer(message: impl std::fmt::Display) -> Self {
        Self::Producer(message.to_string())
    }
}

pub type Result<T, E = RpcError> = std::result::Result<T, E>;
