use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

type Cleanup = Box<dyn FnOnce() + Send + 'static>;

/// Handle to a releasable resource: a registration, a listener, a subscription.
///
/// Wraps one cleanup action that runs at most once, no matter how many clones of
/// the handle call [`dispose`](Self::dispose). Dropping the handle does not
/// dispose it.
#[derive(Clone)]
pub struct Disposable {
    cleanup: Arc<Mutex<Option<Cleanup>>>,
}

impl Disposable {
    pub fn new(cleanup: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cleanup: Arc::new(Mutex::new(Some(Box::new(cleanup)))),
        }
    }

    /// A handle with nothing to release (already disposed)
    pub fn noop() -> Self {
        Self {
            cleanup: Arc::new(Mutex::new(None)),
        }
    }

    /// Run the cleanup action if it has not run yet
    pub fn dispose(&self) {
        // Take under the lock, run outside it: cleanups may dispose other handles.
        let cleanup = self.cleanup.lock().take();
        if let Some(cleanup) = cleanup {
            cleanup();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.cleanup.lock().is_none()
    }
}

impl fmt::Debug for Disposable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposable")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
