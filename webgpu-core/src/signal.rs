//! Single-resolution signals.
//!
//! A [`Signal`] is the completion side of an asynchronous operation; every
//! [`SignalFuture`] created from it observes the same value once it is
//! resolved. A signal resolves exactly once: later resolutions are ignored.

use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::{Arc, Weak},
    task::{Context, Poll, Waker},
};

use parking_lot::Mutex;

/// Something that can make progress on pending signals when polled,
/// usually a device checking its fence.
pub(crate) trait Pump: Send + Sync {
    fn pump(&self);
}

enum State<T> {
    Pending(Vec<Waker>),
    Resolved(T),
}

pub(crate) struct Signal<T> {
    state: Arc<Mutex<State<T>>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

impl<T> Signal<T> {
    pub(crate) fn is_resolved(&self) -> bool {
        match *self.state.lock() {
            State::Resolved(_) => true,
            State::Pending(_) => false,
        }
    }
}

impl<T: Clone> Signal<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::Pending(Vec::new()))),
        }
    }

    pub(crate) fn resolved(value: T) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::Resolved(value))),
        }
    }

    /// Resolve the signal, waking every waiting future.
    ///
    /// Returns `false` if the signal was already resolved.
    pub(crate) fn resolve(&self, value: T) -> bool {
        let wakers = {
            let mut state = self.state.lock();
            match *state {
                State::Resolved(_) => return false,
                State::Pending(ref mut wakers) => {
                    let wakers = std::mem::take(wakers);
                    *state = State::Resolved(value);
                    wakers
                }
            }
        };
        for waker in wakers {
            waker.wake();
        }
        true
    }

    /// A future that only waits to be woken by [`Signal::resolve`].
    pub(crate) fn future(&self) -> SignalFuture<T> {
        SignalFuture {
            state: Arc::clone(&self.state),
            pump: None,
        }
    }

    /// A future that drives `pump` every time it is polled while pending.
    pub(crate) fn future_with_pump(&self, pump: Weak<dyn Pump>) -> SignalFuture<T> {
        SignalFuture {
            state: Arc::clone(&self.state),
            pump: Some(pump),
        }
    }
}

/// Future side of a single-resolution signal.
///
/// Cloning the future gives another observer of the same value. Futures tied
/// to queue work poll their device without blocking, then yield, so any
/// executor makes progress on them.
pub struct SignalFuture<T> {
    state: Arc<Mutex<State<T>>>,
    pump: Option<Weak<dyn Pump>>,
}

impl<T> Clone for SignalFuture<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            pump: self.pump.clone(),
        }
    }
}

impl<T> fmt::Debug for SignalFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let resolved = match *self.state.lock() {
            State::Resolved(_) => true,
            State::Pending(_) => false,
        };
        f.debug_struct("SignalFuture")
            .field("resolved", &resolved)
            .finish()
    }
}

impl<T: Clone> SignalFuture<T> {
    /// The value, if the signal has resolved already.
    pub fn try_get(&self) -> Option<T> {
        match *self.state.lock() {
            State::Resolved(ref value) => Some(value.clone()),
            State::Pending(_) => None,
        }
    }
}

impl<T: Clone> Future for SignalFuture<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        if let Some(value) = self.try_get() {
            return Poll::Ready(value);
        }

        // The pump may resolve this very signal, so no lock is held here.
        let pump = self.pump.as_ref().and_then(Weak::upgrade);
        if let Some(ref pump) = pump {
            pump.pump();
        }

        let mut state = self.state.lock();
        match *state {
            State::Resolved(ref value) => Poll::Ready(value.clone()),
            State::Pending(ref mut wakers) => {
                if !wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    wakers.push(cx.waker().clone());
                }
                drop(state);
                if pump.is_some() {
                    cx.waker().wake_by_ref();
                }
                Poll::Pending
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn resolves_exactly_once() {
        let signal = Signal::new();
        let future = signal.future();
        assert_eq!(future.try_get(), None);
        assert!(signal.resolve(1));
        assert!(!signal.resolve(2));
        assert_eq!(pollster::block_on(future.clone()), 1);
        assert_eq!(pollster::block_on(future), 1);
    }

    #[test]
    fn wakes_waiting_thread() {
        let signal = Signal::<&'static str>::new();
        let future = signal.future();
        let waiter = std::thread::spawn(move || pollster::block_on(future));
        std::thread::sleep(std::time::Duration::from_millis(10));
        signal.resolve("done");
        assert_eq!(waiter.join().unwrap(), "done");
    }

    #[test]
    fn debug_shows_resolution() {
        let signal = Signal::new();
        assert_eq!(format!("{signal:?}"), "Signal { resolved: false }");
        signal.resolve(());
        assert_eq!(format!("{signal:?}"), "Signal { resolved: true }");
        assert_eq!(
            format!("{:?}", signal.future()),
            "SignalFuture { resolved: true }"
        );
    }

    struct CountingPump {
        polls: AtomicUsize,
        signal: Signal<u32>,
    }

    impl Pump for CountingPump {
        fn pump(&self) {
            if self.polls.fetch_add(1, Ordering::SeqCst) == 2 {
                self.signal.resolve(7);
            }
        }
    }

    #[test]
    fn pump_drives_resolution() {
        let signal = Signal::new();
        let pump = Arc::new(CountingPump {
            polls: AtomicUsize::new(0),
            signal: signal.clone(),
        });
        let weak = Arc::downgrade(&pump) as Weak<dyn Pump>;
        let future = signal.future_with_pump(weak);
        assert_eq!(pollster::block_on(future), 7);
        assert_eq!(pump.polls.load(Ordering::SeqCst), 3);
    }
}
