//! Demo methods served by the runner.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tandem::core::sources;
use tandem::prelude::*;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddArgs {
    pub a: i64,
    pub b: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TickerArgs {
    #[validate(length(min = 1, max = 256))]
    pub text: String,
    #[validate(range(min = 1, max = 60000))]
    pub period_ms: u64,
}

pub const ECHO: Declaration<Any, Any> = Declaration::json("echo");
pub const ADD: Declaration<Json<AddArgs>, Json<i64>> = Declaration::json("add");

/// Streams the characters of `text`, one per `period_ms`.
pub fn ticker() -> Declaration<Validated<TickerArgs>, Json<char>> {
    Declaration::new("ticker", Validated::new(), Json::new())
}

/// Register every demo method; dispose the handles to unregister them.
pub fn register_all(server: &RpcServer) -> Result<Vec<Disposable>, RpcError> {
    Ok(vec![
        server.register(&ECHO, |value| async move { Ok(value) })?,
        server.register(&ADD, |args: AddArgs| async move {
            args.a
                .checked_add(args.b)
                .ok_or_else(|| anyhow::anyhow!("{} + {} overflows", args.a, args.b))
        })?,
        server.register_stream(&ticker(), |args: TickerArgs| {
            sources::interval(
                args.text.chars().collect::<Vec<_>>(),
                Duration::from_millis(args.period_ms),
            )
        })?,
    ])
}
