//! Tandem
//!
//! Call functions on the other end of a duplex channel as if they were local.
//! One side registers unary and streaming methods against shared
//! [`Declaration`]s; the other side connects typed stubs to the same
//! declarations. Values are checked against the declared shapes at the
//! boundary, and many calls and subscriptions share one [`Transport`].

#![forbid(unsafe_code)]

pub mod core;
pub mod prelude;
pub mod transport;

pub use tandem_protocol as protocol;

pub use crate::core::{
    Declaration, Disposable, RpcClient, RpcError, RpcServer, Shape, StreamSource, Transport,
};
