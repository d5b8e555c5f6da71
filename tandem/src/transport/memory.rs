use tandem_protocol::Message;
use tokio::sync::mpsc;
use tracing::trace;

use crate::core::disposable::Disposable;
use crate::core::transport::{MessageListener, Transport};
use crate::transport::ListenerSet;

/// One end of an in-process duplex channel.
///
/// Messages sent on one end are delivered, in order, to the listeners of the
/// other end by a pump task. Used by tests and by embedders running the client
/// and the server in the same process.
#[derive(Clone)]
pub struct MemoryTransport {
    peer: mpsc::UnboundedSender<Message>,
    listeners: ListenerSet,
}

impl MemoryTransport {
    /// Two connected endpoints. Must be called inside a tokio runtime.
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();

        let a = Self {
            peer: b_tx,
            listeners: ListenerSet::default(),
        };
        let b = Self {
            peer: a_tx,
            listeners: ListenerSet::default(),
        };

        tokio::spawn(pump(a_rx, a.listeners.clone()));
        tokio::spawn(pump(b_rx, b.listeners.clone()));

        (a, b)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

async fn pump(mut inbound: mpsc::UnboundedReceiver<Message>, listeners: ListenerSet) {
    while let Some(message) = inbound.recv().await {
        listeners.emit(message);
    }
    trace!("memory transport peer dropped");
}

impl Transport for MemoryTransport {
    fn send(&self, message: Message) {
        if self.peer.send(message).is_err() {
            trace!("memory transport peer gone, message dropped");
        }
    }

    fn on_message(&self, listener: MessageListener) -> Disposable {
        self.listeners.add(listener)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn delivers_to_the_other_end_in_order() {
        let (left, right) = MemoryTransport::pair();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _listener = right.on_message(Arc::new(move |m| sink.lock().push(m)));

        left.send(Message::result(1, json!("a")));
        left.send(Message::result(1, json!("b")));
        left.send(Message::dispose(1));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(
            *seen.lock(),
            vec![
                Message::result(1, json!("a")),
                Message::result(1, json!("b")),
                Message::dispose(1),
            ]
        );
    }

    #[tokio::test]
    async fn disposed_listener_stops_receiving() {
        let (left, right) = MemoryTransport::pair();
        let hits = Arc::new(Mutex::new(0));
        let counter = hits.clone();
        let listener = right.on_message(Arc::new(move |_| *counter.lock() += 1));
        assert_eq!(right.listener_count(), 1);
        assert_eq!(left.listener_count(), 0);

        listener.dispose();
        assert_eq!(right.listener_count(), 0);

        left.send(Message::dispose(9));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*hits.lock(), 0);
    }
}
