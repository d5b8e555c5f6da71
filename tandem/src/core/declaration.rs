use std::borrow::Cow;

use crate::core::shape::{Json, Shape};

/// Contract of one remote method: its name plus input and output shapes.
///
/// Declare it once and hand the same value to [`RpcServer::register`] and
/// [`RpcClient::connect`] so both sides agree on name and shapes.
///
/// ```ignore
/// const ADD: Declaration<Json<AddArgs>, Json<i64>> = Declaration::json("add");
/// ```
///
/// [`RpcServer::register`]: crate::core::server::RpcServer::register
/// [`RpcClient::connect`]: crate::core::client::RpcClient::connect
#[derive(Debug, Clone)]
pub struct Declaration<I, O> {
    name: Cow<'static, str>,
    input: I,
    output: O,
}

impl<I: Shape, O: Shape> Declaration<I, O> {
    /// Declaration with explicit shapes
    pub fn new(name: impl Into<Cow<'static, str>>, input: I, output: O) -> Self {
        Self {
            name: name.into(),
            input,
            output,
        }
    }

    /// Method name shared by both sides
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shape of the argument
    pub fn input(&self) -> &I {
        &self.input
    }

    /// Shape of each result value
    pub fn output(&self) -> &O {
        &self.output
    }
}

impl<I, O> Declaration<Json<I>, Json<O>> {
    /// Serde-typed declaration, usable in `const` items
    pub const fn json(name: &'static str) -> Self {
        Self {
            name: Cow::Borrowed(name),
            input: Json::new(),
            output: Json::new(),
        }
    }
}
