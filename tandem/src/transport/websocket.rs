//! Websocket transport.
//!
//! Every frame is a JSON [`Envelope`] tagged with the channel key. Frames for
//! other keys are ignored, heartbeats are answered in place, and messages sent
//! before the socket is open wait in the outbound queue. There is no reconnect:
//! once the socket closes, later sends are dropped. A zero ping interval turns
//! the heartbeat off.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tandem_protocol::{Envelope, Message};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Notify, mpsc, watch};
use tokio::time::{Instant, Interval, interval_at};
use tokio_tungstenite::tungstenite::Message as Frame;
use tokio_tungstenite::{WebSocketStream, connect_async};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::core::config::WebSocketConfig;
use crate::core::disposable::Disposable;
use crate::core::transport::{MessageListener, Transport};
use crate::transport::ListenerSet;

#[derive(Clone)]
pub struct WebSocketTransport {
    key: Arc<str>,
    outbound: mpsc::UnboundedSender<String>,
    listeners: ListenerSet,
    shutdown: Arc<Notify>,
    closed: watch::Receiver<bool>,
}

impl WebSocketTransport {
    /// Wrap an already established socket (client or server side).
    pub fn new<S>(socket: WebSocketStream<S>, config: &WebSocketConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        Self::start(config, async move { Ok(socket) })
    }

    /// Dial `url` in the background.
    ///
    /// Returns immediately; messages sent before the handshake finishes are
    /// queued and flushed once it does. Fails only on a malformed url.
    pub fn connect(url: &str, config: &WebSocketConfig) -> Result<Self> {
        let url = Url::parse(url).with_context(|| format!("invalid websocket url '{url}'"))?;

        Ok(Self::start(config, async move {
            let (socket, _) = connect_async(url.as_str())
                .await
                .with_context(|| format!("failed to connect to {url}"))?;
            info!("WebSocket connected to {}", url);
            Ok(socket)
        }))
    }

    fn start<S, F>(config: &WebSocketConfig, socket: F) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        F: Future<Output = Result<WebSocketStream<S>>> + Send + 'static,
    {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(false);

        let transport = Self {
            key: Arc::from(config.key.as_str()),
            outbound: outbound_tx,
            listeners: ListenerSet::default(),
            shutdown: Arc::new(Notify::new()),
            closed: closed_rx,
        };

        let pump = Pump {
            key: transport.key.clone(),
            listeners: transport.listeners.clone(),
            outbound: outbound_rx,
            shutdown: transport.shutdown.clone(),
            ping_interval: config.ping_interval(),
        };

        tokio::spawn(async move {
            let _closed = ClosedSignal(closed_tx);
            match socket.await {
                Ok(socket) => {
                    if let Err(e) = pump.run(socket).await {
                        warn!("WebSocket error: {:#}", e);
                    }
                }
                Err(e) => warn!("{:#}", e),
            }
            debug!("WebSocket transport closed");
        });

        transport
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once the socket is gone, whichever side closed it.
    pub async fn closed(&self) {
        let mut closed = self.closed.clone();
        let _ = closed.wait_for(|closed| *closed).await;
    }

    /// Close the socket. Queued messages not yet written are dropped.
    pub fn dispose(&self) {
        self.shutdown.notify_one();
    }
}

impl Transport for WebSocketTransport {
    fn send(&self, message: Message) {
        let frame = match Envelope::message(&*self.key, &message)
            .and_then(|envelope| serde_json::to_string(&envelope))
        {
            Ok(frame) => frame,
            Err(e) => {
                warn!(id = message.id(), "failed to encode outbound message: {}", e);
                return;
            }
        };
        if self.outbound.send(frame).is_err() {
            debug!(id = message.id(), "WebSocket closed, message dropped");
        }
    }

    fn on_message(&self, listener: MessageListener) -> Disposable {
        self.listeners.add(listener)
    }
}

/// Marks the transport closed when the IO task ends, even by panic.
struct ClosedSignal(watch::Sender<bool>);

impl Drop for ClosedSignal {
    fn drop(&mut self) {
        let _ = self.0.send(true);
    }
}

/// Socket side of the transport, owned by the IO task.
struct Pump {
    key: Arc<str>,
    listeners: ListenerSet,
    outbound: mpsc::UnboundedReceiver<String>,
    shutdown: Arc<Notify>,
    ping_interval: Option<Duration>,
}

impl Pump {
    async fn run<S>(mut self, socket: WebSocketStream<S>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut sink, mut stream) = socket.split();
        let mut heartbeat = self
            .ping_interval
            .map(|period| interval_at(Instant::now() + period, period));

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    let _ = sink.send(Frame::Close(None)).await;
                    return Ok(());
                }
                frame = stream.next() => {
                    match frame {
                        Some(Ok(Frame::Text(text))) => {
                            if let Some(reply) = self.receive(&text) {
                                sink.send(Frame::Text(reply.into())).await?;
                            }
                        }
                        Some(Ok(Frame::Close(_))) | None => return Ok(()),
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => return Err(e.into()),
                    }
                }
                outgoing = self.outbound.recv() => {
                    match outgoing {
                        Some(frame) => sink.send(Frame::Text(frame.into())).await?,
                        None => return Ok(()),
                    }
                }
                _ = next_heartbeat(&mut heartbeat) => {
                    let ping = serde_json::to_string(&Envelope::ping(&*self.key))?;
                    sink.send(Frame::Text(ping.into())).await?;
                }
            }
        }
    }

    /// Handle one text frame; returns a frame to answer with, if any.
    fn receive(&self, text: &str) -> Option<String> {
        let envelope: Envelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!("malformed WebSocket frame dropped: {}", e);
                return None;
            }
        };

        if envelope.key != *self.key {
            trace!(key = %envelope.key, "frame for another channel ignored");
            return None;
        }
        if envelope.is_ping() {
            return serde_json::to_string(&Envelope::pong(&*self.key)).ok();
        }
        if envelope.is_pong() {
            trace!("heartbeat answered");
            return None;
        }

        match envelope.into_message() {
            Some(message) => self.listeners.emit(message),
            None => debug!("frame without a valid message dropped"),
        }
        None
    }
}

/// Next heartbeat tick; never resolves when the heartbeat is off.
async fn next_heartbeat(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
