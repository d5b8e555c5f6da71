//! Server side: method registry and inbound dispatch.

use std::any::Any as PanicPayload;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use tandem_protocol::{CallId, Message};
use tokio::runtime::Handle;
use tracing::{debug, trace, warn};

use crate::core::declaration::Declaration;
use crate::core::disposable::Disposable;
use crate::core::error::{Result, RpcError};
use crate::core::lifecycle::Lifecycle;
use crate::core::shape::{Rejection, Shape};
use crate::core::stream::{Observer, StreamSource};
use crate::core::transport::Transport;

type Accepts = Arc<dyn Fn(&Value) -> bool + Send + Sync>;
type UnaryInvoker =
    Arc<dyn Fn(&Value) -> Result<BoxFuture<'static, Result<Value, String>>, Rejection> + Send + Sync>;
type StreamStarter =
    Arc<dyn Fn(&Value, Observer<Value>) -> Result<Disposable, Rejection> + Send + Sync>;

#[derive(Clone)]
enum Handler {
    Unary(UnaryInvoker),
    Stream(StreamStarter),
}

#[derive(Clone)]
struct Registration {
    token: u64,
    accepts: Accepts,
    handler: Handler,
}

struct ServerSubscription {
    lifecycle: Arc<Lifecycle>,
    cancel: Disposable,
}

struct ServerInner {
    transport: Arc<dyn Transport>,
    registry: DashMap<String, Registration>,
    subscriptions: DashMap<CallId, ServerSubscription>,
    next_token: AtomicU64,
    /// Handlers run here, whichever thread the transport delivers on
    runtime: Handle,
}

/// Serves registered methods to the peer on the other end of a transport.
///
/// ```ignore
/// const ADD: Declaration<Json<AddArgs>, Json<i64>> = Declaration::json("add");
///
/// let server = RpcServer::new(transport);
/// let _add = server.register(&ADD, |args| async move { Ok(args.a + args.b) })?;
/// ```
pub struct RpcServer {
    inner: Arc<ServerInner>,
    listener: Disposable,
}

impl RpcServer {
    /// Start listening on `transport`.
    ///
    /// # Panics
    ///
    /// Must be called from within a tokio runtime; handlers are spawned onto
    /// that runtime even when the transport delivers from another thread.
    pub fn new(transport: impl Transport) -> Self {
        let inner = Arc::new(ServerInner {
            transport: Arc::new(transport),
            registry: DashMap::new(),
            subscriptions: DashMap::new(),
            next_token: AtomicU64::new(1),
            runtime: Handle::current(),
        });

        let weak = Arc::downgrade(&inner);
        let listener = inner.transport.on_message(Arc::new(move |message| {
            if let Some(inner) = weak.upgrade() {
                inner.handle(message);
            }
        }));

        Self { inner, listener }
    }

    /// Register a unary handler for `declaration`.
    ///
    /// The handler receives the decoded input. An `Err` or a panic is sent to
    /// the caller as error text. Disposing the returned handle frees the name.
    pub fn register<I, O, F, Fut>(
        &self,
        declaration: &Declaration<I, O>,
        handler: F,
    ) -> Result<Disposable>
    where
        I: Shape,
        O: Shape,
        F: Fn(I::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<O::Value>> + Send + 'static,
    {
        let input = declaration.input().clone();
        let output = declaration.output().clone();
        let handler = Arc::new(handler);

        let invoke: UnaryInvoker = Arc::new(
            move |arg: &Value| -> Result<BoxFuture<'static, Result<Value, String>>, Rejection> {
                let value = input.decode(arg)?;
                let handler = handler.clone();
                let output = output.clone();
                Ok(async move {
                    let produced = handler(value).await.map_err(|e| format!("{e:#}"))?;
                    output.encode(&produced).map_err(|e| e.to_string())
                }
                .boxed())
            },
        );

        self.insert(declaration, Handler::Unary(invoke))
    }

    /// Register a stream handler for `declaration`.
    ///
    /// `starter` only builds the source; the producer starts when the server
    /// subscribes to it for an incoming subscription.
    pub fn register_stream<I, O, F, S>(
        &self,
        declaration: &Declaration<I, O>,
        starter: F,
    ) -> Result<Disposable>
    where
        I: Shape,
        O: Shape,
        F: Fn(I::Value) -> S + Send + Sync + 'static,
        S: StreamSource<O::Value>,
    {
        let input = declaration.input().clone();
        let output = declaration.output().clone();

        let start: StreamStarter = Arc::new(
            move |arg: &Value, sink: Observer<Value>| -> Result<Disposable, Rejection> {
                let value = input.decode(arg)?;
                let source = starter(value);
                Ok(source.subscribe(encoding_observer(output.clone(), sink)))
            },
        );

        self.insert(declaration, Handler::Stream(start))
    }

    fn insert<I: Shape, O: Shape>(
        &self,
        declaration: &Declaration<I, O>,
        handler: Handler,
    ) -> Result<Disposable> {
        let name = declaration.name().to_owned();
        let input = declaration.input().clone();
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);

        match self.inner.registry.entry(name.clone()) {
            Entry::Occupied(_) => return Err(RpcError::AlreadyRegistered(name)),
            Entry::Vacant(slot) => {
                slot.insert(Registration {
                    token,
                    accepts: Arc::new(move |value: &Value| input.accepts(value)),
                    handler,
                });
            }
        }
        debug!(method = %name, "registered handler");

        let weak = Arc::downgrade(&self.inner);
        Ok(Disposable::new(move || {
            if let Some(inner) = weak.upgrade() {
                // A newer registration under the same name is not ours to remove.
                if inner
                    .registry
                    .remove_if(&name, |_, reg| reg.token == token)
                    .is_some()
                {
                    debug!(method = %name, "unregistered handler");
                }
            }
        }))
    }

    pub fn is_registered(&self, method: &str) -> bool {
        self.inner.registry.contains_key(method)
    }

    /// Registered method names, sorted
    pub fn registered_methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .registry
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Number of running stream producers
    pub fn active_subscriptions(&self) -> usize {
        self.inner.subscriptions.len()
    }

    /// Stop listening and end every running subscription.
    ///
    /// Each live subscription gets a `Dispose` message before its producer is
    /// cancelled. Registrations stay; they belong to their handles.
    pub fn dispose(&self) {
        self.listener.dispose();

        let ids: Vec<CallId> = self
            .inner
            .subscriptions
            .iter()
            .map(|entry| *entry.key())
            .collect();
        for id in ids {
            if let Some((_, sub)) = self.inner.subscriptions.remove(&id) {
                if sub.lifecycle.dispose() {
                    self.inner.transport.send(Message::dispose(id));
                }
                sub.cancel.dispose();
            }
        }
    }
}

impl ServerInner {
    fn handle(self: &Arc<Self>, message: Message) {
        // Stream sources may spawn from inside `subscribe`.
        let _runtime = self.runtime.enter();
        match message {
            Message::Call {
                id,
                method,
                arg,
                subscribe,
            } => self.dispatch(id, method, arg, subscribe),
            Message::Dispose { id, .. } => self.cancel(id),
            other => trace!(id = other.id(), kind = other.kind(), "server ignoring message"),
        }
    }

    fn dispatch(self: &Arc<Self>, id: CallId, method: String, arg: Value, subscribe: bool) {
        debug!(id, method = %method, subscribe, "inbound call");

        // Clone out so no map guard is held while the handler runs.
        let Some(registration) = self.registry.get(&method).map(|r| r.value().clone()) else {
            self.reject(
                id,
                format!("Handler implementation not registered for method {method} (id: {id})"),
            );
            return;
        };

        if !(registration.accepts)(&arg) {
            self.reject(id, validation_failure(id, &method));
            return;
        }

        match (registration.handler, subscribe) {
            (Handler::Unary(_), true) => {
                self.reject(id, format!("Can not subscribe to regular function method {method}"))
            }
            (Handler::Stream(_), false) => {
                self.reject(id, format!("Must subscribe to stream method {method}"))
            }
            (Handler::Unary(invoke), false) => self.run_unary(id, &method, &arg, invoke),
            (Handler::Stream(start), true) => self.start_stream(id, &method, &arg, start),
        }
    }

    fn run_unary(&self, id: CallId, method: &str, arg: &Value, invoke: UnaryInvoker) {
        let future = match std::panic::catch_unwind(AssertUnwindSafe(|| invoke(arg))) {
            Ok(Ok(future)) => future,
            Ok(Err(_)) => return self.reject(id, validation_failure(id, method)),
            Err(panic) => return self.reject(id, panic_text(panic)),
        };

        let transport = self.transport.clone();
        let method = method.to_owned();
        self.runtime.spawn(async move {
            let reply = match AssertUnwindSafe(future).catch_unwind().await {
                Ok(Ok(value)) => Message::result(id, value),
                Ok(Err(text)) => {
                    debug!(id, method = %method, error = %text, "handler failed");
                    Message::error(id, text)
                }
                Err(panic) => {
                    let text = panic_text(panic);
                    warn!(id, method = %method, "handler panicked: {}", text);
                    Message::error(id, text)
                }
            };
            transport.send(reply);
        });
    }

    fn start_stream(self: &Arc<Self>, id: CallId, method: &str, arg: &Value, start: StreamStarter) {
        let lifecycle = Arc::new(Lifecycle::new());
        lifecycle.activate();

        let sink = self.stream_sink(id, lifecycle.clone());
        let cancel = match std::panic::catch_unwind(AssertUnwindSafe(|| start(arg, sink))) {
            Ok(Ok(cancel)) => cancel,
            Ok(Err(_)) => return self.reject(id, validation_failure(id, method)),
            Err(panic) => {
                let text = panic_text(panic);
                warn!(id, method = %method, "stream starter panicked: {}", text);
                if lifecycle.dispose() {
                    self.transport.send(Message::error(id, text));
                    self.transport.send(Message::dispose(id));
                }
                return;
            }
        };

        let entry = ServerSubscription {
            lifecycle: lifecycle.clone(),
            cancel: cancel.clone(),
        };
        if let Some(stale) = self.subscriptions.insert(id, entry) {
            stale.lifecycle.dispose();
            stale.cancel.dispose();
        }

        // The producer may have finished during subscribe, before the entry existed.
        if lifecycle.is_terminal() {
            self.remove_subscription(id, &lifecycle);
            cancel.dispose();
        }
    }

    /// Observer that forwards a producer's signals for `id`, gated on `lifecycle`.
    fn stream_sink(self: &Arc<Self>, id: CallId, lifecycle: Arc<Lifecycle>) -> Observer<Value> {
        let on_value = {
            let transport = self.transport.clone();
            let lifecycle = lifecycle.clone();
            move |value| {
                lifecycle.deliver_value(|| transport.send(Message::result(id, value)));
            }
        };
        let on_error = {
            let transport = self.transport.clone();
            let lifecycle = lifecycle.clone();
            move |err: RpcError| {
                lifecycle.deliver_error(|| transport.send(Message::error(id, err.to_string())));
            }
        };
        let on_complete = {
            let transport = self.transport.clone();
            let weak: Weak<ServerInner> = Arc::downgrade(self);
            move || {
                if lifecycle.complete() {
                    transport.send(Message::dispose(id));
                    if let Some(inner) = weak.upgrade() {
                        inner.remove_subscription(id, &lifecycle);
                    }
                }
            }
        };

        Observer::new(on_value)
            .on_error(on_error)
            .on_complete(on_complete)
    }

    fn remove_subscription(&self, id: CallId, lifecycle: &Arc<Lifecycle>) {
        self.subscriptions
            .remove_if(&id, |_, sub| Arc::ptr_eq(&sub.lifecycle, lifecycle));
    }

    fn cancel(&self, id: CallId) {
        match self.subscriptions.remove(&id) {
            Some((_, sub)) => {
                debug!(id, "subscription cancelled by peer");
                sub.lifecycle.dispose();
                sub.cancel.dispose();
            }
            None => trace!(id, "dispose for unknown subscription"),
        }
    }

    fn reject(&self, id: CallId, text: String) {
        debug!(id, error = %text, "call rejected");
        self.transport.send(Message::error(id, text));
    }
}

/// Wraps the untyped sink in an observer of typed values.
fn encoding_observer<O: Shape>(output: O, sink: Observer<Value>) -> Observer<O::Value> {
    let errors = sink.clone();
    let completion = sink.clone();
    Observer::new(move |value: O::Value| match output.encode(&value) {
        Ok(json) => sink.next(json),
        Err(rejection) => sink.error(RpcError::producer(format!(
            "Failed to encode stream value: {rejection}"
        ))),
    })
    .on_error(move |err| errors.error(err))
    .on_complete(move || completion.complete())
}

fn validation_failure(id: CallId, method: &str) -> String {
    format!("Input validation failed for call id {id} on method {method}")
}

fn panic_text(payload: Box<dyn PanicPayload + Send>) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_owned()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "handler panicked".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;
    use crate::core::shape::{Any, Json};
    use crate::core::sources;
    use crate::core::transport::MessageListener;
    use crate::transport::ListenerSet;

    /// Transport stub: records sends, lets the test inject inbound messages.
    #[derive(Clone, Default)]
    struct Loopback {
        sent: Arc<Mutex<Vec<Message>>>,
        listeners: ListenerSet,
    }

    impl Transport for Loopback {
        fn send(&self, message: Message) {
            self.sent.lock().push(message);
        }

        fn on_message(&self, listener: MessageListener) -> Disposable {
            self.listeners.add(listener)
        }
    }

    impl Loopback {
        fn inject(&self, message: Message) {
            self.listeners.emit(message);
        }

        fn sent(&self) -> Vec<Message> {
            self.sent.lock().clone()
        }
    }

    const DOUBLE: Declaration<Json<i64>, Json<i64>> = Declaration::json("double");

    #[tokio::test]
    async fn unary_call_is_answered_with_a_result() {
        let transport = Loopback::default();
        let server = RpcServer::new(transport.clone());
        let _reg = server.register(&DOUBLE, |n| async move { Ok(n * 2) }).unwrap();

        transport.inject(Message::call(4, "double", json!(21), false));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(transport.sent(), vec![Message::result(4, json!(42))]);
    }

    #[tokio::test]
    async fn panicking_handler_becomes_an_error_message() {
        let transport = Loopback::default();
        let server = RpcServer::new(transport.clone());
        let _reg = server
            .register(&DOUBLE, |_| async move {
                if true {
                    panic!("boom");
                }
                Ok(0)
            })
            .unwrap();

        transport.inject(Message::call(1, "double", json!(1), false));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(transport.sent(), vec![Message::error(1, "boom")]);
    }

    #[tokio::test]
    async fn stale_handle_does_not_remove_newer_registration() {
        let server = RpcServer::new(Loopback::default());
        let first = server.register(&DOUBLE, |n| async move { Ok(n) }).unwrap();
        first.dispose();
        let _second = server.register(&DOUBLE, |n| async move { Ok(n) }).unwrap();

        first.dispose();
        assert!(server.is_registered("double"));
        assert_eq!(server.registered_methods(), vec!["double".to_string()]);
    }

    #[tokio::test]
    async fn synchronous_producer_leaves_no_entry_behind() {
        let transport = Loopback::default();
        let server = RpcServer::new(transport.clone());
        let decl: Declaration<Any, Json<u8>> = Declaration::new("burst", Any::new(), Json::new());
        let _reg = server
            .register_stream(&decl, |_| {
                sources::from_fn(|observer: Observer<u8>| {
                    observer.next(1);
                    observer.next(2);
                    observer.complete();
                    Disposable::noop()
                })
            })
            .unwrap();

        transport.inject(Message::call(3, "burst", Value::Null, true));

        assert_eq!(server.active_subscriptions(), 0);
        assert_eq!(
            transport.sent(),
            vec![
                Message::result(3, json!(1)),
                Message::result(3, json!(2)),
                Message::dispose(3),
            ]
        );
    }

    #[tokio::test]
    async fn peer_dispose_cancels_without_reply() {
        let transport = Loopback::default();
        let server = RpcServer::new(transport.clone());
        let cancelled = Arc::new(Mutex::new(false));
        let flag = cancelled.clone();
        let decl: Declaration<Any, Any> = Declaration::new("idle", Any::new(), Any::new());
        let _reg = server
            .register_stream(&decl, move |_| {
                let flag = flag.clone();
                sources::from_fn(move |_: Observer<Value>| {
                    let flag = flag.clone();
                    Disposable::new(move || *flag.lock() = true)
                })
            })
            .unwrap();

        transport.inject(Message::call(8, "idle", Value::Null, true));
        assert_eq!(server.active_subscriptions(), 1);

        transport.inject(Message::dispose(8));
        assert_eq!(server.active_subscriptions(), 0);
        assert!(*cancelled.lock());
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn call_delivered_off_the_runtime_is_answered() {
        let transport = Loopback::default();
        let server = RpcServer::new(transport.clone());
        let _reg = server.register(&DOUBLE, |n| async move { Ok(n * 2) }).unwrap();

        let feeder = transport.clone();
        let delivered =
            thread::spawn(move || feeder.inject(Message::call(6, "double", json!(5), false))).join();
        assert!(delivered.is_ok());
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(transport.sent(), vec![Message::result(6, json!(10))]);
    }

    #[tokio::test]
    async fn stream_started_off_the_runtime_can_spawn() {
        let transport = Loopback::default();
        let server = RpcServer::new(transport.clone());
        let decl: Declaration<Any, Json<u8>> = Declaration::new("ticks", Any::new(), Json::new());
        let _reg = server
            .register_stream(&decl, |_| sources::interval(vec![1u8], Duration::from_millis(5)))
            .unwrap();

        let feeder = transport.clone();
        thread::spawn(move || feeder.inject(Message::call(2, "ticks", Value::Null, true)))
            .join()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(
            transport.sent(),
            vec![Message::result(2, json!(1)), Message::dispose(2)]
        );
    }

    #[tokio::test]
    async fn no_result_follows_dispose_when_producer_races_shutdown() {
        for _ in 0..200 {
            let transport = Loopback::default();
            let server = RpcServer::new(transport.clone());
            let slot: Arc<Mutex<Option<Observer<u8>>>> = Arc::default();
            let decl: Declaration<Any, Json<u8>> =
                Declaration::new("feed", Any::new(), Json::new());
            let captured = slot.clone();
            let _reg = server
                .register_stream(&decl, move |_| {
                    let captured = captured.clone();
                    sources::from_fn(move |observer: Observer<u8>| {
                        *captured.lock() = Some(observer);
                        Disposable::noop()
                    })
                })
                .unwrap();
            transport.inject(Message::call(1, "feed", Value::Null, true));

            let Some(observer) = slot.lock().take() else {
                panic!("producer was not started");
            };
            let emitted = Arc::new(AtomicUsize::new(0));
            let counter = emitted.clone();
            let producer = thread::spawn(move || {
                for _ in 0..50 {
                    observer.next(3);
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            });
            server.dispose();
            producer.join().unwrap();

            let sent = transport.sent();
            assert_eq!(emitted.load(Ordering::SeqCst), 50);
            assert_eq!(sent.last(), Some(&Message::dispose(1)));
            assert_eq!(
                sent.iter().filter(|m| matches!(m, Message::Dispose { .. })).count(),
                1
            );
        }
    }
}
