//! Stream source contract.
//!
//! Anything that pushes values over time (a timer, an external feed, a remote
//! subscription, a test double) implements [`StreamSource`]: one `subscribe`
//! method taking an [`Observer`] and returning the [`Disposable`] that stops it.

use std::fmt;
use std::sync::Arc;

use crate::core::disposable::Disposable;
use crate::core::error::RpcError;

type ValueFn<T> = Arc<dyn Fn(T) + Send + Sync + 'static>;
type ErrorFn = Arc<dyn Fn(RpcError) + Send + Sync + 'static>;
type CompleteFn = Arc<dyn Fn() + Send + Sync + 'static>;

/// The three callbacks a source pushes into.
pub struct Observer<T> {
    on_value: ValueFn<T>,
    on_error: Option<ErrorFn>,
    on_complete: Option<CompleteFn>,
}

impl<T> Clone for Observer<T> {
    fn clone(&self) -> Self {
        Self {
            on_value: self.on_value.clone(),
            on_error: self.on_error.clone(),
            on_complete: self.on_complete.clone(),
        }
    }
}

impl<T> fmt::Debug for Observer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("on_error", &self.on_error.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}

impl<T: 'static> Observer<T> {
    pub fn new(on_value: impl Fn(T) + Send + Sync + 'static) -> Self {
        Self {
            on_value: Arc::new(on_value),
            on_error: None,
            on_complete: None,
        }
    }

    pub fn on_error(mut self, on_error: impl Fn(RpcError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(on_error));
        self
    }

    pub fn on_complete(mut self, on_complete: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Arc::new(on_complete));
        self
    }

    /// Push one value
    pub fn next(&self, value: T) {
        (self.on_value)(value)
    }

    /// Report an error; dropped when no error callback was given
    pub fn error(&self, err: RpcError) {
        if let Some(on_error) = &self.on_error {
            on_error(err)
        }
    }

    /// Signal completion
    pub fn complete(&self) {
        if let Some(on_complete) = &self.on_complete {
            on_complete()
        }
    }
}

/// A lazily started producer of values.
///
/// Implementations do no work until `subscribe`, and must stop pushing into the
/// observer once the returned handle is disposed.
pub trait StreamSource<T>: Send + Sync + 'static {
    fn subscribe(&self, observer: Observer<T>) -> Disposable;
}

impl<T, S: StreamSource<T> + ?Sized> StreamSource<T> for Box<S> {
    fn subscribe(&self, observer: Observer<T>) -> Disposable {
        (**self).subscribe(observer)
    }
}

impl<T, S: StreamSource<T> + ?Sized> StreamSource<T> for Arc<S> {
    fn subscribe(&self, observer: Observer<T>) -> Disposable {
        (**self).subscribe(observer)
    }
}
