//! Tandem Wire Protocol
//!
//! This crate defines the messages exchanged between a tandem client and a
//! tandem server over any duplex channel.
//!
//! # Protocol Overview
//!
//! Every message is a JSON object carrying the `id` of the call it belongs to.
//! The variant is recognised by which other fields are present:
//!
//! - `Call` - `{ "id", "method", "arg", "subscribe" }`, client to server
//! - `Result` - `{ "id", "result" }`, one unary result or one stream value
//! - `Error` - `{ "id", "error" }`, a failure for that call
//! - `Dispose` - `{ "id", "dispose": true }`, stream completion (server to
//!   client) or cancellation (client to server)
//!
//! Websocket transports wrap messages in an [`Envelope`] that also carries the
//! multiplexing key and heartbeat pings.

mod envelope;
mod message;

pub use envelope::*;
pub use message::*;

/// Protocol version
pub const PROTOCOL_VERSION: &str = "1.0.0";
