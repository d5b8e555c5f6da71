//! Subscription state machine.
//!
//! Both the server (per running producer) and the client (per subscriber) keep
//! one [`Lifecycle`] per stream id. Every send and every callback for that id
//! runs while holding its gate, so once a stream reaches a terminal state
//! nothing more is delivered, whichever thread or code path got there first.
//! The gate is reentrant: a callback may dispose its own stream.
//!
//! ```text
//! Idle --subscribe--> Active --value--> Active
//!                       |  \--error--> Errored --value/error--> Errored
//!                       |                 |
//!                       +--complete / dispose (terminal)--+
//! ```

use std::cell::Cell;

use parking_lot::ReentrantMutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Created, not yet subscribed
    Idle,
    /// Delivering values
    Active,
    /// An error was reported; values may still follow
    Errored,
    /// Producer finished
    Completed,
    /// Cancelled by either side
    Disposed,
}

impl SubscriptionState {
    pub fn is_live(self) -> bool {
        matches!(self, Self::Active | Self::Errored)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Disposed)
    }
}

/// Guarded transitions for one stream id.
///
/// Each transition method reports whether it took effect. Values and errors
/// are handed over through [`Lifecycle::deliver_value`] and
/// [`Lifecycle::deliver_error`], which run the delivery under the gate; a
/// terminal transition on another thread waits for a delivery in progress.
#[derive(Debug)]
pub struct Lifecycle {
    state: ReentrantMutex<Cell<SubscriptionState>>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: ReentrantMutex::new(Cell::new(SubscriptionState::Idle)),
        }
    }

    pub fn state(&self) -> SubscriptionState {
        self.state.lock().get()
    }

    pub fn is_live(&self) -> bool {
        self.state().is_live()
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// `Idle -> Active`
    pub fn activate(&self) -> bool {
        let state = self.state.lock();
        if state.get() == SubscriptionState::Idle {
            state.set(SubscriptionState::Active);
            true
        } else {
            false
        }
    }

    /// Run `deliver` if the stream is live. Returns whether it ran.
    pub fn deliver_value(&self, deliver: impl FnOnce()) -> bool {
        let state = self.state.lock();
        if !state.get().is_live() {
            return false;
        }
        deliver();
        true
    }

    /// `Active -> Errored`, then run `deliver`. Errors are deliverable while live.
    pub fn deliver_error(&self, deliver: impl FnOnce()) -> bool {
        let state = self.state.lock();
        if !state.get().is_live() {
            return false;
        }
        state.set(SubscriptionState::Errored);
        deliver();
        true
    }

    /// Live -> `Completed`. True only for the call that made the transition.
    pub fn complete(&self) -> bool {
        self.finish(SubscriptionState::Completed)
    }

    /// Idle or live -> `Disposed`. True only for the call that made the transition.
    pub fn dispose(&self) -> bool {
        self.finish(SubscriptionState::Disposed)
    }

    fn finish(&self, terminal: SubscriptionState) -> bool {
        let state = self.state.lock();
        let current = state.get();
        if current.is_terminal() {
            return false;
        }
        if terminal == SubscriptionState::Completed && current == SubscriptionState::Idle {
            return false;
        }
        state.set(terminal);
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn values_flow_only_while_live() {
        let lc = Lifecycle::new();
        assert!(!lc.deliver_value(|| {}));
        assert!(lc.activate());
        assert!(!lc.activate());
        assert!(lc.deliver_value(|| {}));
        assert!(lc.complete());
        assert!(!lc.deliver_value(|| panic!("delivered after completion")));
    }

    #[test]
    fn error_keeps_stream_live() {
        let lc = Lifecycle::new();
        lc.activate();
        assert!(lc.deliver_error(|| {}));
        assert_eq!(lc.state(), SubscriptionState::Errored);
        assert!(lc.deliver_value(|| {}));
        assert!(lc.deliver_error(|| {}));
        assert!(lc.complete());
        assert_eq!(lc.state(), SubscriptionState::Completed);
    }

    #[test]
    fn terminal_transitions_happen_once() {
        let lc = Lifecycle::new();
        lc.activate();
        assert!(lc.dispose());
        assert!(!lc.dispose());
        assert!(!lc.complete());
        assert!(!lc.deliver_error(|| {}));
        assert_eq!(lc.state(), SubscriptionState::Disposed);
    }

    #[test]
    fn delivery_may_dispose_its_own_stream() {
        let lc = Lifecycle::new();
        lc.activate();
        assert!(lc.deliver_value(|| assert!(lc.dispose())));
        assert_eq!(lc.state(), SubscriptionState::Disposed);
    }

    #[test]
    fn dispose_waits_for_delivery_in_progress() {
        let lc = Arc::new(Lifecycle::new());
        lc.activate();
        let delivering = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicUsize::new(0));

        let worker = {
            let lc = lc.clone();
            let delivering = delivering.clone();
            let finished = finished.clone();
            thread::spawn(move || {
                lc.deliver_value(|| {
                    delivering.store(true, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(50));
                    finished.fetch_add(1, Ordering::SeqCst);
                });
            })
        };

        while !delivering.load(Ordering::SeqCst) {
            thread::yield_now();
        }
        assert!(lc.dispose());
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        worker.join().unwrap();
    }

    #[test]
    fn idle_stream_can_be_disposed_but_not_completed() {
        let lc = Lifecycle::new();
        assert!(!lc.complete());
        assert!(lc.dispose());
        assert!(!lc.activate());
    }
}
