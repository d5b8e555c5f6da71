//! Tandem Runner - websocket server for the demo methods
//!
//! This binary:
//! - Loads configuration from `config.toml` when present
//! - Accepts websocket connections on `[runner] listen`
//! - Serves the methods in [`methods`] to every connected peer

mod config;
mod methods;

use std::net::SocketAddr;
use std::path::Path;

use anyhow::{Context, Result};
use tandem::core::{ConfigStore, WebSocketConfig};
use tandem::prelude::*;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_async;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{LogConfig, RunnerConfig};

const CONFIG_FILE: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<()> {
    let store = if Path::new(CONFIG_FILE).exists() {
        ConfigStore::from_file(CONFIG_FILE)?
    } else {
        ConfigStore::empty()
    };

    let log: LogConfig = store.get()?;
    let filter = EnvFilter::try_new(&log.level)
        .with_context(|| format!("invalid [log] level '{}'", log.level))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Some(path) = store.path() {
        info!("Loaded configuration from {}", path.display());
    }

    let runner: RunnerConfig = store.get()?;
    let websocket: WebSocketConfig = store.get()?;

    let listener = TcpListener::bind(&runner.listen)
        .await
        .with_context(|| format!("failed to bind {}", runner.listen))?;
    info!(
        "Tandem runner listening on ws://{} (protocol {})",
        runner.listen,
        tandem::protocol::PROTOCOL_VERSION
    );

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        tokio::spawn(serve(stream, peer, websocket.clone()));
                    }
                    Err(e) => warn!("Accept failed: {}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                return Ok(());
            }
        }
    }
}

/// One peer: handshake, serve until the socket closes, then clean up.
async fn serve(stream: TcpStream, peer: SocketAddr, config: WebSocketConfig) {
    let socket = match accept_async(stream).await {
        Ok(socket) => socket,
        Err(e) => {
            warn!(%peer, "WebSocket handshake failed: {}", e);
            return;
        }
    };

    let transport = WebSocketTransport::new(socket, &config);
    let server = RpcServer::new(transport.clone());
    let registrations = match methods::register_all(&server) {
        Ok(registrations) => registrations,
        Err(e) => {
            warn!(%peer, "Failed to register methods: {}", e);
            transport.dispose();
            return;
        }
    };
    info!(%peer, methods = ?server.registered_methods(), "Peer connected");

    transport.closed().await;

    server.dispose();
    for registration in registrations {
        registration.dispose();
    }
    info!(%peer, "Peer disconnected");
}
