pub mod client;
pub mod config;
pub mod declaration;
pub mod disposable;
pub mod error;
pub mod lifecycle;
pub mod server;
pub mod shape;
pub mod sources;
pub mod stream;
pub mod transport;

pub use client::{Method, RemoteStream, RemoteSubscription, RpcClient, StreamMethod};
pub use config::{ConfigStore, Configurable, WebSocketConfig};
pub use declaration::Declaration;
pub use disposable::Disposable;
pub use error::RpcError;
pub use lifecycle::{Lifecycle, SubscriptionState};
pub use server::RpcServer;
pub use shape::{Any, Empty, Json, Rejection, Shape, Validated};
pub use stream::{Observer, StreamSource};
pub use transport::{MessageListener, Transport};
