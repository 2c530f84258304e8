//! Promises: the writing half of an asynchronous computation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::cancellation::CancellationToken;
use crate::error::Error;
use crate::future::Future;
use crate::internal::{State, Ticket};

/// Completes the future obtained from [`get_future`](Promise::get_future).
///
/// Clones share the same state; the state resolves to
/// [`Error::BrokenPromise`] when the last clone is dropped without having
/// set a value or an error.
///
/// # Examples
///
/// ```rust
/// use conflux::Promise;
///
/// let promise = Promise::new();
/// let fut = promise.get_future();
/// promise.set_value(7);
/// assert_eq!(fut.get().unwrap(), 7);
/// ```
pub struct Promise<T: Send + 'static> {
    state: Arc<State<T>>,
    token: CancellationToken,
    future_taken: Arc<AtomicBool>,
    _ticket: Ticket<T>,
}

impl<T: Send + 'static> Promise<T> {
    /// A promise with a fresh cancellation token.
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    /// A promise bound to an existing token.
    pub fn with_token(token: CancellationToken) -> Self {
        let state = State::new(token.clone());
        let ticket = Ticket::new(state.clone());
        Promise {
            state,
            token,
            future_taken: Arc::new(AtomicBool::new(false)),
            _ticket: ticket,
        }
    }

    /// A promise sharing `upstream`'s cancellation token.
    ///
    /// This is how cancellation is chained across a boundary the type
    /// system cannot express: a cancel requested on this promise's future
    /// reaches the upstream token.
    pub fn from_future<U: Send + 'static>(upstream: &Future<U>) -> Self {
        Self::with_token(upstream.cancellation_token().clone())
    }

    /// The future completed by this promise.
    ///
    /// May be called once across all clones; a second call panics, since a
    /// future hands its value to exactly one owner.
    pub fn get_future(&self) -> Future<T> {
        if self.future_taken.swap(true, Ordering::SeqCst) {
            panic!("the future was already retrieved from this promise");
        }
        Future::from_parts(self.state.clone(), self.token.clone())
    }

    /// Resolves the future with a value. Panics if the state was already
    /// completed.
    pub fn set_value(&self, value: T) {
        self.state.set_result(Ok(value));
    }

    /// Resolves the future with an error. Panics if the state was already
    /// completed.
    pub fn set_error(&self, error: Error) {
        self.state.set_result(Err(error));
    }

    /// The token cancel requests on the downstream future arrive at.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }
}

impl<T: Send + 'static> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Promise {
            state: self.state.clone(),
            token: self.token.clone(),
            future_taken: self.future_taken.clone(),
            _ticket: Ticket::new(self.state.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropped_promise_breaks_future() {
        let promise = Promise::<u32>::new();
        let fut = promise.get_future();
        drop(promise);
        assert!(fut.get().unwrap_err().is_broken_promise());
    }

    #[test]
    fn clone_keeps_promise_alive() {
        let promise = Promise::<u32>::new();
        let clone = promise.clone();
        let fut = promise.get_future();
        drop(promise);
        assert!(!fut.is_ready());
        clone.set_value(3);
        assert_eq!(fut.get().unwrap(), 3);
    }

    #[test]
    fn from_future_chains_cancellation() {
        let upstream = Promise::<u32>::new();
        let downstream = Promise::<String>::from_future(&upstream.get_future());
        downstream.get_future().request_cancel();
        assert!(upstream.cancellation_token().is_cancel_requested());
    }

    #[test]
    #[should_panic(expected = "already retrieved")]
    fn second_get_future_panics() {
        let promise = Promise::<u32>::new();
        let _first = promise.get_future();
        let _second = promise.get_future();
    }
}
