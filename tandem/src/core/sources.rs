//! Ready-made stream sources.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::{Stream, StreamExt};
use parking_lot::Mutex;

use crate::core::disposable::Disposable;
use crate::core::error::RpcError;
use crate::core::stream::{Observer, StreamSource};

/// Emits `items` one per `period`, then completes.
///
/// The first item goes out immediately on subscribe. Each subscription runs on
/// its own tokio task, so `subscribe` must be called inside a runtime.
pub fn interval<T, I>(items: I, period: Duration) -> Interval<T>
where
    I: IntoIterator<Item = T>,
    T: Clone + Send + Sync + 'static,
{
    Interval {
        items: items.into_iter().collect(),
        period,
    }
}

#[derive(Debug, Clone)]
pub struct Interval<T> {
    items: Arc<[T]>,
    period: Duration,
}

impl<T> StreamSource<T> for Interval<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn subscribe(&self, observer: Observer<T>) -> Disposable {
        let items = self.items.clone();
        let period = self.period;
        let stopped = Arc::new(AtomicBool::new(false));
        let flag = stopped.clone();

        let handle = tokio::spawn(async move {
            for item in items.iter() {
                if flag.load(Ordering::SeqCst) {
                    return;
                }
                observer.next(item.clone());
                tokio::time::sleep(period).await;
            }
            if !flag.load(Ordering::SeqCst) {
                observer.complete();
            }
        });

        Disposable::new(move || {
            stopped.store(true, Ordering::SeqCst);
            handle.abort();
        })
    }
}

/// Forwards an external feed.
///
/// `Ok` items become values, `Err` items become errors, and the end of the
/// stream completes the subscription. The feed can only be consumed once; a
/// second subscriber gets an error.
pub fn from_stream<S>(stream: S) -> FromStream<S> {
    FromStream {
        stream: Mutex::new(Some(stream)),
    }
}

pub struct FromStream<S> {
    stream: Mutex<Option<S>>,
}

impl<T, S> StreamSource<T> for FromStream<S>
where
    T: Send + 'static,
    S: Stream<Item = Result<T, RpcError>> + Send + 'static,
{
    fn subscribe(&self, observer: Observer<T>) -> Disposable {
        let Some(stream) = self.stream.lock().take() else {
            observer.error(RpcError::producer("stream source already consumed"));
            return Disposable::noop();
        };

        let stopped = Arc::new(AtomicBool::new(false));
        let flag = stopped.clone();

        let handle = tokio::spawn(async move {
            let mut stream = Box::pin(stream);
            while let Some(item) = stream.next().await {
                if flag.load(Ordering::SeqCst) {
                    return;
                }
                match item {
                    Ok(value) => observer.next(value),
                    Err(err) => observer.error(err),
                }
            }
            if !flag.load(Ordering::SeqCst) {
                observer.complete();
            }
        });

        Disposable::new(move || {
            stopped.store(true, Ordering::SeqCst);
            handle.abort();
        })
    }
}

/// Source driven by a closure, for custom producers and test doubles.
pub fn from_fn<F>(subscribe: F) -> FromFn<F> {
    FromFn(subscribe)
}

pub struct FromFn<F>(F);

impl<T, F> StreamSource<T> for FromFn<F>
where
    F: Fn(Observer<T>) -> Disposable + Send + Sync + 'static,
{
    fn subscribe(&self, observer: Observer<T>) -> Disposable {
        (self.0)(observer)
    }
}
