//! Packaged tasks: callables bound to a shared state.
//!
//! Invoking a packaged task runs the wrapped callable and writes its result
//! (or captured panic) into the state, completing the paired future. A task
//! that is dropped without having run breaks its promise.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::cancellation::CancellationToken;
use crate::error::{Error, Result};
use crate::future::Future;
use crate::internal::{State, Ticket};

/// A callable that completes a future when run.
///
/// Produced by [`package`], [`package_with_token`] and
/// [`package_cancelable`] together with the future observing the call's
/// outcome.
///
/// # Examples
///
/// ```rust
/// use conflux::package;
///
/// let (task, fut) = package(|| 21 * 2);
/// task.run();
/// assert_eq!(fut.get().unwrap(), 42);
/// ```
pub struct PackagedTask {
    invoke: Box<dyn FnOnce() + Send>,
}

impl PackagedTask {
    /// Runs the wrapped callable and completes the paired future.
    pub fn run(self) {
        (self.invoke)();
    }
}

pub(crate) fn package_result<R, F>(
    f: F,
    token: CancellationToken,
    chain_name: Option<String>,
) -> (PackagedTask, Future<R>)
where
    R: Send + 'static,
    F: FnOnce() -> Result<R> + Send + 'static,
{
    let state = State::new(token.clone());
    state.set_chain_name(chain_name);
    let ticket = Ticket::new(state.clone());
    let completing = state.clone();
    let invoke = Box::new(move || {
        let result = catch_unwind(AssertUnwindSafe(f))
            .unwrap_or_else(|payload| Err(Error::from_panic(payload)));
        completing.set_result(result);
        drop(ticket);
    });
    (PackagedTask { invoke }, Future::from_parts(state, token))
}

/// Packages `f` with a fresh cancellation token.
///
/// Returns the task and the future that resolves when the task has run. A
/// panic in `f` resolves the future with [`Error::Panicked`]; dropping the
/// task unrun resolves it with [`Error::BrokenPromise`].
pub fn package<R, F>(f: F) -> (PackagedTask, Future<R>)
where
    R: Send + 'static,
    F: FnOnce() -> R + Send + 'static,
{
    package_result(move || Ok(f()), CancellationToken::new(), None)
}

/// Packages a token-aware callable with a fresh cancellation token.
///
/// The callable always runs when the task does — a cancellation request
/// only flips the token it receives, for cooperative checks inside.
pub fn package_with_token<R, F>(f: F) -> (PackagedTask, Future<R>)
where
    R: Send + 'static,
    F: FnOnce(&CancellationToken) -> R + Send + 'static,
{
    let token = CancellationToken::new();
    let task_token = token.clone();
    package_result(move || Ok(f(&task_token)), token, None)
}

/// Packages a callable whose future cancels *eagerly*.
///
/// A cancellation request before the task has started completes the future
/// with [`Error::Canceled`] immediately — from the canceling thread — and
/// the task, when it eventually runs, is skipped. Once the task has
/// started, a request only flips the token.
pub fn package_cancelable<R, F>(f: F) -> (PackagedTask, Future<R>)
where
    R: Send + 'static,
    F: FnOnce(&CancellationToken) -> R + Send + 'static,
{
    package_cancelable_with_token(f, CancellationToken::new(), None)
}

pub(crate) fn package_cancelable_with_token<R, F>(
    f: F,
    token: CancellationToken,
    chain_name: Option<String>,
) -> (PackagedTask, Future<R>)
where
    R: Send + 'static,
    F: FnOnce(&CancellationToken) -> R + Send + 'static,
{
    let state = State::new(token.clone());
    state.set_chain_name(chain_name);
    let ticket = Ticket::new(state.clone());

    // Started-or-canceled latch. The cancel callback stays at the bottom of
    // the token's stack for the token's lifetime; the latch makes it a
    // no-op once the task has started (or a second cancel fires it again
    // after a pop exposes it).
    let fired = Arc::new(AtomicBool::new(false));

    let cancel_latch = fired.clone();
    let cancel_state = state.clone();
    token.push_cancellation_callback(move || {
        if cancel_latch.swap(true, Ordering::SeqCst) {
            return;
        }
        cancel_state.set_result(Err(Error::Canceled));
    });

    let run_token = token.clone();
    let completing = state.clone();
    let invoke = Box::new(move || {
        if fired.swap(true, Ordering::SeqCst) {
            // Canceled before start; the cancel callback completed the
            // future already.
            drop(ticket);
            return;
        }
        let result = catch_unwind(AssertUnwindSafe(move || f(&run_token)))
            .map_err(Error::from_panic);
        completing.set_result(result);
        drop(ticket);
    });
    (PackagedTask { invoke }, Future::from_parts(state, token))
}
