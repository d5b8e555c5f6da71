use std::sync::Arc;

use tandem_protocol::Message;

use crate::core::disposable::Disposable;

/// Callback invoked for every message a transport receives.
pub type MessageListener = Arc<dyn Fn(Message) + Send + Sync + 'static>;

/// Duplex channel capability.
///
/// The engine only sends single messages and registers listeners; framing,
/// connection management and delivery guarantees belong to the implementor.
/// Messages for one call id must be delivered in the order they were sent.
pub trait Transport: Send + Sync + 'static {
    /// Best-effort send. Failures are the transport's to log.
    fn send(&self, message: Message);

    /// Register a listener; disposing the handle unregisters it.
    fn on_message(&self, listener: MessageListener) -> Disposable;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send(&self, message: Message) {
        (**self).send(message)
    }

    fn on_message(&self, listener: MessageListener) -> Disposable {
        (**self).on_message(listener)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&self, message: Message) {
        (**self).send(message)
    }

    fn on_message(&self, listener: MessageListener) -> Disposable {
        (**self).on_message(listener)
    }
}
