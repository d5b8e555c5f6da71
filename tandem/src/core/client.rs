//! Client side: typed stubs and reply correlation.
//!
//! Every outbound call or subscription gets a fresh id and one entry in the
//! outstanding table. Inbound messages are matched against that table only;
//! anything that does not correlate is dropped.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use dashmap::DashMap;
use futures::Stream;
use serde_json::Value;
use tandem_protocol::{CallId, Message};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use crate::core::declaration::Declaration;
use crate::core::disposable::Disposable;
use crate::core::error::{Result, RpcError};
use crate::core::lifecycle::Lifecycle;
use crate::core::shape::{Rejection, Shape};
use crate::core::stream::{Observer, StreamSource};
use crate::core::transport::Transport;

enum Reply {
    Value(Value),
    Failure(String),
}

enum Outstanding {
    Pending(oneshot::Sender<Reply>),
    Subscription(Arc<ClientSubscription>),
}

struct ClientSubscription {
    method: String,
    lifecycle: Lifecycle,
    /// Set after an output validation failure; later values are dropped
    halted: AtomicBool,
    deliver: Box<dyn Fn(&Value) -> Result<(), Rejection> + Send + Sync>,
    on_error: Box<dyn Fn(RpcError) + Send + Sync>,
    on_complete: Box<dyn Fn() + Send + Sync>,
}

impl ClientSubscription {
    fn new<O: Shape>(method: String, output: O, observer: Observer<O::Value>) -> Self {
        let errors = observer.clone();
        let completion = observer.clone();
        Self {
            method,
            lifecycle: Lifecycle::new(),
            halted: AtomicBool::new(false),
            deliver: Box::new(move |value: &Value| -> Result<(), Rejection> {
                observer.next(output.decode(value)?);
                Ok(())
            }),
            on_error: Box::new(move |err| errors.error(err)),
            on_complete: Box::new(move || completion.complete()),
        }
    }
}

struct ClientInner {
    transport: Arc<dyn Transport>,
    next_id: AtomicU64,
    outstanding: DashMap<CallId, Outstanding>,
    disposed: AtomicBool,
}

/// Calls methods served by the peer on the other end of a transport.
pub struct RpcClient {
    inner: Arc<ClientInner>,
    listener: Disposable,
}

impl RpcClient {
    pub fn new(transport: impl Transport) -> Self {
        let inner = Arc::new(ClientInner {
            transport: Arc::new(transport),
            next_id: AtomicU64::new(1),
            outstanding: DashMap::new(),
            disposed: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&inner);
        let listener = inner.transport.on_message(Arc::new(move |message| {
            if let Some(inner) = weak.upgrade() {
                inner.handle(message);
            }
        }));

        Self { inner, listener }
    }

    /// Stub for a unary method.
    pub fn connect<I: Shape, O: Shape>(&self, declaration: &Declaration<I, O>) -> Method<I, O> {
        Method {
            client: self.inner.clone(),
            declaration: declaration.clone(),
        }
    }

    /// Stub for a stream method.
    pub fn connect_stream<I: Shape, O: Shape>(
        &self,
        declaration: &Declaration<I, O>,
    ) -> StreamMethod<I, O> {
        StreamMethod {
            client: self.inner.clone(),
            declaration: declaration.clone(),
        }
    }

    /// Calls and subscriptions still waiting on the peer
    pub fn in_flight(&self) -> usize {
        self.inner.outstanding.len()
    }

    /// Stop listening and forget every outstanding call and subscription.
    ///
    /// Nothing is sent. Awaiting calls fail with [`RpcError::Disconnected`];
    /// subscriptions go quiet without callbacks.
    pub fn dispose(&self) {
        self.inner.disposed.store(true, Ordering::SeqCst);
        self.listener.dispose();

        let ids: Vec<CallId> = self
            .inner
            .outstanding
            .iter()
            .map(|entry| *entry.key())
            .collect();
        for id in ids {
            if let Some((_, Outstanding::Subscription(sub))) = self.inner.outstanding.remove(&id) {
                sub.lifecycle.dispose();
            }
        }
    }
}

impl ClientInner {
    fn next_id(&self) -> CallId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn handle(&self, message: Message) {
        match message {
            Message::Result { id, result } => {
                if let Some(reply) = self.take_pending(id) {
                    let _ = reply.send(Reply::Value(result));
                } else if let Some(sub) = self.subscription(id) {
                    self.deliver(id, &sub, &result);
                } else {
                    trace!(id, "uncorrelated result dropped");
                }
            }
            Message::Error { id, error } => {
                if let Some(reply) = self.take_pending(id) {
                    let _ = reply.send(Reply::Failure(error));
                } else if let Some(sub) = self.subscription(id) {
                    sub.lifecycle
                        .deliver_error(|| (sub.on_error)(RpcError::Remote(error)));
                } else {
                    trace!(id, "uncorrelated error dropped");
                }
            }
            Message::Dispose { id, .. } => match self.subscription(id) {
                Some(sub) => {
                    if sub.lifecycle.complete() {
                        debug!(id, method = %sub.method, "stream completed by peer");
                        self.remove_subscription(id, &sub);
                        (sub.on_complete)();
                    }
                }
                None => trace!(id, "uncorrelated dispose dropped"),
            },
            Message::Call { id, .. } => trace!(id, "client ignoring inbound call"),
        }
    }

    fn deliver(&self, id: CallId, sub: &ClientSubscription, value: &Value) {
        sub.lifecycle.deliver_value(|| {
            if sub.halted.load(Ordering::SeqCst) {
                return;
            }
            if let Err(rejection) = (sub.deliver)(value) {
                sub.halted.store(true, Ordering::SeqCst);
                debug!(id, method = %sub.method, reason = %rejection, "stream value rejected");
                sub.lifecycle.deliver_error(|| {
                    (sub.on_error)(RpcError::OutputValidation {
                        id,
                        method: sub.method.clone(),
                        reason: rejection.to_string(),
                    })
                });
            }
        });
    }

    fn take_pending(&self, id: CallId) -> Option<oneshot::Sender<Reply>> {
        match self
            .outstanding
            .remove_if(&id, |_, entry| matches!(entry, Outstanding::Pending(_)))
        {
            Some((_, Outstanding::Pending(reply))) => Some(reply),
            _ => None,
        }
    }

    /// Cloned out so no map guard outlives the lookup.
    fn subscription(&self, id: CallId) -> Option<Arc<ClientSubscription>> {
        self.outstanding
            .get(&id)
            .and_then(|entry| match entry.value() {
                Outstanding::Subscription(sub) => Some(sub.clone()),
                Outstanding::Pending(_) => None,
            })
    }

    fn remove_subscription(&self, id: CallId, sub: &Arc<ClientSubscription>) {
        self.outstanding.remove_if(&id, |_, entry| {
            matches!(entry, Outstanding::Subscription(s) if Arc::ptr_eq(s, sub))
        });
    }
}

/// Removes the pending entry when the awaiting future goes away early.
struct PendingGuard<'a> {
    client: &'a ClientInner,
    id: CallId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.client.take_pending(self.id);
    }
}

/// Callable stub for one unary method.
#[derive(Clone)]
pub struct Method<I, O> {
    client: Arc<ClientInner>,
    declaration: Declaration<I, O>,
}

impl<I: Shape, O: Shape> Method<I, O> {
    pub fn name(&self) -> &str {
        self.declaration.name()
    }

    pub async fn call(&self, input: I::Value) -> Result<O::Value> {
        let arg = self
            .declaration
            .input()
            .encode(&input)
            .map_err(|rejection| RpcError::InputEncoding {
                method: self.name().to_owned(),
                reason: rejection.to_string(),
            })?;
        self.invoke(arg).await
    }

    /// Call without an argument.
    ///
    /// Fails locally with [`RpcError::MissingArgument`], sending nothing, when
    /// the input shape does not accept `null`.
    pub async fn call_empty(&self) -> Result<O::Value> {
        if !self.declaration.input().accepts(&Value::Null) {
            return Err(RpcError::MissingArgument {
                method: self.name().to_owned(),
            });
        }
        self.invoke(Value::Null).await
    }

    async fn invoke(&self, arg: Value) -> Result<O::Value> {
        let client = &self.client;
        let id = client.next_id();
        let method = self.name().to_owned();
        if client.is_disposed() {
            return Err(RpcError::Disconnected { id, method });
        }

        let (tx, rx) = oneshot::channel();
        client.outstanding.insert(id, Outstanding::Pending(tx));
        let guard = PendingGuard { client, id };

        debug!(id, method = %method, "outbound call");
        client
            .transport
            .send(Message::call(id, method.clone(), arg, false));

        let reply = rx.await;
        drop(guard);

        match reply {
            Ok(Reply::Value(value)) => {
                self.declaration
                    .output()
                    .decode(&value)
                    .map_err(|rejection| RpcError::OutputValidation {
                        id,
                        method,
                        reason: rejection.to_string(),
                    })
            }
            Ok(Reply::Failure(text)) => Err(RpcError::Remote(text)),
            Err(_) => Err(RpcError::Disconnected { id, method }),
        }
    }
}

/// Stub for one stream method; hands out lazy [`RemoteStream`]s.
#[derive(Clone)]
pub struct StreamMethod<I, O> {
    client: Arc<ClientInner>,
    declaration: Declaration<I, O>,
}

impl<I: Shape, O: Shape> StreamMethod<I, O> {
    pub fn name(&self) -> &str {
        self.declaration.name()
    }

    /// Nothing is sent until the returned stream is subscribed.
    pub fn open(&self, input: I::Value) -> RemoteStream<O> {
        let arg = self
            .declaration
            .input()
            .encode(&input)
            .map_err(|rejection| RpcError::InputEncoding {
                method: self.name().to_owned(),
                reason: rejection.to_string(),
            });
        self.stream(arg)
    }

    pub fn open_empty(&self) -> RemoteStream<O> {
        let arg = if self.declaration.input().accepts(&Value::Null) {
            Ok(Value::Null)
        } else {
            Err(RpcError::MissingArgument {
                method: self.name().to_owned(),
            })
        };
        self.stream(arg)
    }

    fn stream(&self, arg: Result<Value>) -> RemoteStream<O> {
        RemoteStream {
            client: self.client.clone(),
            method: self.name().to_owned(),
            output: self.declaration.output().clone(),
            arg,
        }
    }
}

/// A stream served by the peer.
///
/// Each `subscribe` opens its own remote subscription under a fresh id.
pub struct RemoteStream<O> {
    client: Arc<ClientInner>,
    method: String,
    output: O,
    arg: Result<Value>,
}

impl<O: Shape> StreamSource<O::Value> for RemoteStream<O> {
    fn subscribe(&self, observer: Observer<O::Value>) -> Disposable {
        let arg = match &self.arg {
            Ok(arg) => arg.clone(),
            Err(err) => {
                observer.error(err.clone());
                return Disposable::noop();
            }
        };

        let client = &self.client;
        let id = client.next_id();
        if client.is_disposed() {
            observer.error(RpcError::Disconnected {
                id,
                method: self.method.clone(),
            });
            return Disposable::noop();
        }

        let sub = Arc::new(ClientSubscription::new(
            self.method.clone(),
            self.output.clone(),
            observer,
        ));
        sub.lifecycle.activate();
        client
            .outstanding
            .insert(id, Outstanding::Subscription(sub.clone()));

        debug!(id, method = %self.method, "outbound subscribe");
        client
            .transport
            .send(Message::call(id, self.method.clone(), arg, true));

        let weak: Weak<ClientInner> = Arc::downgrade(client);
        Disposable::new(move || {
            if !sub.lifecycle.dispose() {
                return;
            }
            if let Some(client) = weak.upgrade() {
                client.remove_subscription(id, &sub);
                client.transport.send(Message::dispose(id));
            }
            (sub.on_complete)();
        })
    }
}

impl<O: Shape> RemoteStream<O> {
    /// Subscribe and expose the values as a [`futures::Stream`].
    ///
    /// The stream ends when the peer completes; dropping it early cancels the
    /// remote subscription.
    pub fn into_stream(self) -> RemoteSubscription<O::Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        let values = tx.clone();
        let errors = tx.clone();

        let observer = Observer::new(move |value| {
            let _ = values.send(Event::Item(Ok(value)));
        })
        .on_error(move |err| {
            let _ = errors.send(Event::Item(Err(err)));
        })
        .on_complete(move || {
            let _ = tx.send(Event::End);
        });

        RemoteSubscription {
            handle: self.subscribe(observer),
            events: rx,
            finished: false,
        }
    }
}

enum Event<T> {
    Item(Result<T>),
    End,
}

/// [`futures::Stream`] view of one remote subscription.
pub struct RemoteSubscription<T> {
    handle: Disposable,
    events: mpsc::UnboundedReceiver<Event<T>>,
    finished: bool,
}

impl<T> RemoteSubscription<T> {
    /// Cancel the remote subscription; the stream then ends.
    pub fn cancel(&self) {
        self.handle.dispose();
    }
}

impl<T> Stream for RemoteSubscription<T> {
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        match this.events.poll_recv(cx) {
            Poll::Ready(Some(Event::Item(item))) => Poll::Ready(Some(item)),
            Poll::Ready(Some(Event::End)) | Poll::Ready(None) => {
                this.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> Drop for RemoteSubscription<T> {
    fn drop(&mut self) {
        self.handle.dispose();
    }
}
