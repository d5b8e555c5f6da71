pub mod memory;
#[cfg(feature = "websocket")]
pub mod websocket;

pub use memory::MemoryTransport;
#[cfg(feature = "websocket")]
pub use websocket::WebSocketTransport;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tandem_protocol::Message;

use crate::core::disposable::Disposable;
use crate::core::transport::MessageListener;

/// Listener bookkeeping shared by the bundled transports.
#[derive(Clone, Default)]
pub(crate) struct ListenerSet {
    inner: Arc<Listeners>,
}

#[derive(Default)]
struct Listeners {
    next_id: AtomicU64,
    entries: DashMap<u64, MessageListener>,
}

impl ListenerSet {
    pub(crate) fn add(&self, listener: MessageListener) -> Disposable {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.entries.insert(id, listener);

        let weak: Weak<Listeners> = Arc::downgrade(&self.inner);
        Disposable::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.entries.remove(&id);
            }
        })
    }

    /// Deliver to every listener registered at call time.
    pub(crate) fn emit(&self, message: Message) {
        // Snapshot first: listeners may add or remove listeners.
        let listeners: Vec<MessageListener> = self
            .inner
            .entries
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let Some((last, rest)) = listeners.split_last() else {
            tracing::trace!(id = message.id(), "no listener for inbound message");
            return;
        };
        for listener in rest {
            listener(message.clone());
        }
        last(message);
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.entries.len()
    }
}
