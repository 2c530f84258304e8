//! The shared state backing a future/promise pair.
//!
//! A `State<T>` is a heap cell holding a write-once result slot, the list of
//! continuations to fire on completion, a condition variable for blocking
//! waiters and the promise-count watchdog that turns an abandoned state into
//! a broken promise. Continuations are drained under the lock by swapping
//! the list out, then invoked after the lock is released; user code never
//! runs inside the state's critical section.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::cancellation::CancellationToken;
use crate::error::{Error, Result};

type Continuation = Box<dyn FnOnce() + Send>;

/// What the slot held before it was moved out.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadyKind {
    Value,
    Error,
}

enum Slot<T> {
    Empty,
    Ready(Result<T>),
    Taken(ReadyKind),
}

impl<T> Slot<T> {
    fn kind(&self) -> Option<ReadyKind> {
        match self {
            Slot::Empty => None,
            Slot::Ready(Ok(_)) => Some(ReadyKind::Value),
            Slot::Ready(Err(_)) => Some(ReadyKind::Error),
            Slot::Taken(kind) => Some(*kind),
        }
    }
}

struct StateInner<T> {
    slot: Slot<T>,
    continuations: Vec<Continuation>,
    chain_name: Option<String>,
    /// Dropped on completion to break the state → token cycle; futures and
    /// promises keep their own strong reference.
    token: Option<CancellationToken>,
}

pub(crate) struct State<T> {
    inner: Mutex<StateInner<T>>,
    ready: Condvar,
    promise_count: AtomicUsize,
}

impl<T: Send + 'static> State<T> {
    pub(crate) fn new(token: CancellationToken) -> Arc<Self> {
        Arc::new(State {
            inner: Mutex::new(StateInner {
                slot: Slot::Empty,
                continuations: Vec::new(),
                chain_name: None,
                token: Some(token),
            }),
            ready: Condvar::new(),
            promise_count: AtomicUsize::new(0),
        })
    }

    /// A state born complete; it never had a token of its own.
    pub(crate) fn new_completed(result: Result<T>) -> Arc<Self> {
        Arc::new(State {
            inner: Mutex::new(StateInner {
                slot: Slot::Ready(result),
                continuations: Vec::new(),
                chain_name: None,
                token: None,
            }),
            ready: Condvar::new(),
            promise_count: AtomicUsize::new(0),
        })
    }

    /// Completes the state. Panics if it was already completed.
    pub(crate) fn set_result(&self, result: Result<T>) {
        let continuations = {
            let mut inner = self.inner.lock();
            match inner.slot {
                Slot::Empty => inner.slot = Slot::Ready(result),
                _ => panic!("future state completed twice"),
            }
            inner.token = None;
            std::mem::take(&mut inner.continuations)
        };
        self.ready.notify_all();
        for continuation in continuations {
            continuation();
        }
    }

    /// Completes the state only if it is still empty. Used by the
    /// promise-count watchdog, which may lose the race against a setter.
    fn complete_if_empty(&self, error: Error) {
        let continuations = {
            let mut inner = self.inner.lock();
            match inner.slot {
                Slot::Empty => inner.slot = Slot::Ready(Err(error)),
                _ => return,
            }
            inner.token = None;
            std::mem::take(&mut inner.continuations)
        };
        self.ready.notify_all();
        for continuation in continuations {
            continuation();
        }
    }

    /// Registers `f` to run once the state is ready; runs it before
    /// returning when the state already is.
    pub(crate) fn add_continuation(&self, f: Continuation) {
        let run_now = {
            let mut inner = self.inner.lock();
            match inner.slot {
                Slot::Empty => {
                    inner.continuations.push(f);
                    None
                }
                _ => Some(f),
            }
        };
        if let Some(f) = run_now {
            f();
        }
    }

    pub(crate) fn wait(&self) {
        let mut inner = self.inner.lock();
        while matches!(inner.slot, Slot::Empty) {
            self.ready.wait(&mut inner);
        }
    }

    /// Waits until ready or until `timeout` elapses; true when ready.
    pub(crate) fn wait_for(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        while matches!(inner.slot, Slot::Empty) {
            if self.ready.wait_until(&mut inner, deadline).timed_out() {
                return !matches!(inner.slot, Slot::Empty);
            }
        }
        true
    }

    /// Blocks until ready, then moves the result out.
    pub(crate) fn take_result(&self) -> Result<T> {
        let mut inner = self.inner.lock();
        while matches!(inner.slot, Slot::Empty) {
            self.ready.wait(&mut inner);
        }
        let kind = inner.slot.kind().expect("slot is ready");
        match std::mem::replace(&mut inner.slot, Slot::Taken(kind)) {
            Slot::Ready(result) => result,
            _ => panic!("future value already taken"),
        }
    }

    /// Blocks until ready, then clones the result. Shared futures never
    /// take the slot, so this cannot observe `Taken`.
    pub(crate) fn clone_result(&self) -> Result<T>
    where
        T: Clone,
    {
        let mut inner = self.inner.lock();
        while matches!(inner.slot, Slot::Empty) {
            self.ready.wait(&mut inner);
        }
        match &inner.slot {
            Slot::Ready(result) => result.clone(),
            Slot::Taken(_) => panic!("future value already taken"),
            Slot::Empty => unreachable!(),
        }
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.inner.lock().slot.kind().is_some()
    }

    pub(crate) fn has_value(&self) -> bool {
        self.inner.lock().slot.kind() == Some(ReadyKind::Value)
    }

    pub(crate) fn has_error(&self) -> bool {
        self.inner.lock().slot.kind() == Some(ReadyKind::Error)
    }

    pub(crate) fn token(&self) -> Option<CancellationToken> {
        self.inner.lock().token.clone()
    }

    pub(crate) fn chain_name(&self) -> Option<String> {
        self.inner.lock().chain_name.clone()
    }

    pub(crate) fn set_chain_name(&self, name: Option<String>) {
        self.inner.lock().chain_name = name;
    }

    fn increment_promise(&self) {
        self.promise_count.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement_promise(&self) {
        let previous = self.promise_count.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "promise count underflow");
        if previous == 1 {
            self.complete_if_empty(Error::BrokenPromise);
        }
    }
}

/// RAII share of the right to complete a state.
///
/// Promises and packaged tasks each hold one; when the last ticket is
/// dropped while the slot is still empty, the state resolves to
/// [`Error::BrokenPromise`] so that no future waits forever.
pub(crate) struct Ticket<T: Send + 'static> {
    state: Arc<State<T>>,
}

impl<T: Send + 'static> Ticket<T> {
    pub(crate) fn new(state: Arc<State<T>>) -> Self {
        state.increment_promise();
        Ticket { state }
    }
}

impl<T: Send + 'static> Drop for Ticket<T> {
    fn drop(&mut self) {
        self.state.decrement_promise();
    }
}
