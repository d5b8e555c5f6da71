// Convenience re-exports: use tandem::prelude::*;
pub use crate::core::sources;
pub use crate::core::{
    Any, Declaration, Disposable, Empty, Json, Observer, RpcClient, RpcError, RpcServer, Shape,
    StreamSource, Transport, Validated,
};
pub use crate::transport::MemoryTransport;
#[cfg(feature = "websocket")]
pub use crate::transport::WebSocketTransport;

pub use tandem_protocol::{CallId, Message};
