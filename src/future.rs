//! Futures: the reading half of an asynchronous computation.
//!
//! A [`Future`] owns a shared state and a strong reference to the
//! cancellation token the state was created with. The token reference is
//! retained by the handle because the state drops its own copy on
//! completion to break the reference cycle; continuations attached after
//! completion still need to inspect it.
//!
//! Continuation methods come in pairs: `then` always hands the completed
//! future to the callback, `and_then` short-circuits errors and observes
//! cancellation. Both package the callback against the parent's token, so a
//! cancellation request on the tail of a chain reaches the head unless
//! [`Future::break_cancellation_chain`] sits in between.

use std::sync::Arc;
use std::time::Duration;

use crate::cancellation::CancellationToken;
use crate::error::{Error, Result};
use crate::executor::{get_default_executor, get_synchronous_executor, Executor};
use crate::internal::{State, Ticket};
use crate::package::package_result;

/// Handle to the eventual result of an asynchronous computation.
///
/// Move-only; reading the value through [`get`](Future::get) consumes the
/// handle. Use [`to_shared`](Future::to_shared) for a clonable,
/// non-consuming variant.
///
/// # Examples
///
/// ```rust
/// use conflux::{get_synchronous_executor, make_ready_future};
///
/// let fut = make_ready_future(21)
///     .then_on(get_synchronous_executor(), |done| done.get().unwrap() * 2);
/// assert_eq!(fut.get().unwrap(), 42);
/// ```
pub struct Future<T: Send + 'static> {
    state: Arc<State<T>>,
    token: CancellationToken,
}

impl<T: Send + 'static> Future<T> {
    pub(crate) fn from_parts(state: Arc<State<T>>, token: CancellationToken) -> Self {
        Future { state, token }
    }

    pub(crate) fn state_handle(&self) -> Arc<State<T>> {
        self.state.clone()
    }

    /// The cancellation token shared along this future's chain.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    /// Requests cancellation of the chain this future belongs to.
    ///
    /// Idempotent, and harmless on a completed future.
    pub fn request_cancel(&self) {
        self.token.request_cancel();
    }

    /// True once the future holds a value or an error.
    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    /// True once the future holds a value.
    pub fn has_value(&self) -> bool {
        self.state.has_value()
    }

    /// True once the future holds an error.
    pub fn has_error(&self) -> bool {
        self.state.has_error()
    }

    /// Blocks until the future is ready and moves the result out.
    pub fn get(self) -> Result<T> {
        self.state.take_result()
    }

    /// Blocks until the future is ready.
    pub fn wait(&self) {
        self.state.wait();
    }

    /// Blocks until the future is ready or `timeout` elapses; true when
    /// ready. Never consumes the result.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        self.state.wait_for(timeout)
    }

    /// Attaches a continuation running on the default executor.
    ///
    /// Shorthand for [`then_on`](Future::then_on) with
    /// [`get_default_executor`](crate::executor::get_default_executor).
    pub fn then<R, F>(self, f: F) -> Future<R>
    where
        R: Send + 'static,
        F: FnOnce(Future<T>) -> R + Send + 'static,
    {
        self.then_on(get_default_executor(), f)
    }

    /// Attaches a continuation receiving the completed future.
    ///
    /// The continuation always runs, value or error. It is posted to
    /// `executor` once the parent completes (immediately if it already has).
    /// The returned future shares the parent's cancellation token.
    pub fn then_on<R, F>(self, executor: impl Into<Executor>, f: F) -> Future<R>
    where
        R: Send + 'static,
        F: FnOnce(Future<T>) -> R + Send + 'static,
    {
        let state = self.state.clone();
        let token = self.token.clone();
        self.then_impl(executor.into(), move || {
            Ok(f(Future::from_parts(state, token)))
        })
    }

    /// Like [`then_on`](Future::then_on), with the chain's token passed to
    /// the callback for cooperative checks.
    pub fn then_with_token_on<R, F>(self, executor: impl Into<Executor>, f: F) -> Future<R>
    where
        R: Send + 'static,
        F: FnOnce(&CancellationToken, Future<T>) -> R + Send + 'static,
    {
        let state = self.state.clone();
        let token = self.token.clone();
        self.then_impl(executor.into(), move || {
            let fut = Future::from_parts(state, token.clone());
            Ok(f(&token, fut))
        })
    }

    /// Attaches a value continuation running on the default executor.
    pub fn and_then<R, F>(self, f: F) -> Future<R>
    where
        R: Send + 'static,
        F: FnOnce(T) -> R + Send + 'static,
    {
        self.and_then_on(get_default_executor(), f)
    }

    /// Attaches a continuation receiving the value.
    ///
    /// Errors short-circuit into the returned future without running `f`.
    /// A value whose chain was already canceled becomes [`Error::Canceled`].
    pub fn and_then_on<R, F>(self, executor: impl Into<Executor>, f: F) -> Future<R>
    where
        R: Send + 'static,
        F: FnOnce(T) -> R + Send + 'static,
    {
        let state = self.state.clone();
        let token = self.token.clone();
        self.then_impl(executor.into(), move || match state.take_result() {
            Ok(value) => {
                if token.is_cancel_requested() {
                    Err(Error::Canceled)
                } else {
                    Ok(f(value))
                }
            }
            Err(error) => Err(error),
        })
    }

    /// Discards the value, keeping completion and cancel propagation.
    pub fn to_void(self) -> Future<()> {
        self.and_then_on(get_synchronous_executor(), |_| ())
    }

    /// Returns an equivalent future carrying a *fresh* cancellation token.
    ///
    /// Cancel requested downstream of the split no longer reaches this
    /// chain, and a cancellation of this chain is not observed as canceled
    /// by downstream continuations.
    pub fn break_cancellation_chain(self) -> Future<T> {
        let fresh = CancellationToken::new();
        let child = State::new(fresh.clone());
        child.set_chain_name(self.state.chain_name());
        let ticket = Ticket::new(child.clone());
        let parent = self.state.clone();
        let completing = child.clone();
        self.state.add_continuation(Box::new(move || {
            completing.set_result(parent.take_result());
            drop(ticket);
        }));
        Future::from_parts(child, fresh)
    }

    /// Sets the label continuations of this chain carry into executor task
    /// names.
    pub fn update_chain_name(self, name: impl Into<String>) -> Self {
        self.state.set_chain_name(Some(name.into()));
        self
    }

    /// The label set by [`update_chain_name`](Future::update_chain_name),
    /// if any.
    pub fn get_chain_name(&self) -> Option<String> {
        self.state.chain_name()
    }

    /// Converts into a clonable future. Readers clone the result instead of
    /// consuming it.
    pub fn to_shared(self) -> SharedFuture<T>
    where
        T: Clone,
    {
        SharedFuture {
            state: self.state,
            token: self.token,
        }
    }

    /// A void future completing with this one, used to watch for
    /// termination without consuming the handle. Shares the chain's token.
    pub(crate) fn completion_watcher(&self) -> Future<()> {
        let state = State::<()>::new(self.token.clone());
        let ticket = Ticket::new(state.clone());
        let completing = state.clone();
        self.state.add_continuation(Box::new(move || {
            completing.set_result(Ok(()));
            drop(ticket);
        }));
        Future::from_parts(state, self.token.clone())
    }

    fn then_impl<R, F>(self, executor: Executor, f: F) -> Future<R>
    where
        R: Send + 'static,
        F: FnOnce() -> Result<R> + Send + 'static,
    {
        let name = self.state.chain_name();
        let (task, fut) = package_result(f, self.token.clone(), name.clone());
        let label = name.unwrap_or_default();
        self.state.add_continuation(Box::new(move || {
            executor.post_named(move || task.run(), &label);
        }));
        fut
    }
}

impl<T: Send + 'static> Future<Future<T>> {
    /// Flattens a future of a future.
    ///
    /// The returned future shares the *outer* token. Once the outer future
    /// delivers the inner one, a "last" cancellation callback on the outer
    /// token forwards cancel requests to the inner chain (only when the two
    /// tokens differ — they are the same when the inner future was chained
    /// off the outer one). Errors propagate from either level.
    pub fn unwrap(self) -> Future<T> {
        let token = self.state.token().unwrap_or_else(|| self.token.clone());
        let flat = State::new(token.clone());
        flat.set_chain_name(self.state.chain_name());
        let ticket = Ticket::new(flat.clone());
        let outer = self.state.clone();
        let completing = flat.clone();
        let forward_token = token.clone();
        self.state.add_continuation(Box::new(move || {
            match outer.take_result() {
                Err(error) => {
                    completing.set_result(Err(error));
                    drop(ticket);
                }
                Ok(inner) => {
                    if !CancellationToken::ptr_eq(&forward_token, inner.cancellation_token()) {
                        let inner_token = inner.cancellation_token().clone();
                        forward_token
                            .push_last_cancellation_callback(move || inner_token.request_cancel());
                    }
                    let inner_state = inner.state_handle();
                    let deliver = inner_state.clone();
                    inner_state.add_continuation(Box::new(move || {
                        completing.set_result(deliver.take_result());
                        drop(ticket);
                    }));
                }
            }
        }));
        Future::from_parts(flat, token)
    }
}

/// Clonable future; readers share the result instead of consuming it.
///
/// Requires `T: Clone` because every reader gets its own copy of the value
/// (errors are always clonable).
#[derive(Clone)]
pub struct SharedFuture<T: Clone + Send + 'static> {
    state: Arc<State<T>>,
    token: CancellationToken,
}

impl<T: Clone + Send + 'static> SharedFuture<T> {
    /// The cancellation token shared along this future's chain.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    /// Requests cancellation of the chain this future belongs to.
    pub fn request_cancel(&self) {
        self.token.request_cancel();
    }

    /// Blocks until ready and clones the result out.
    pub fn get(&self) -> Result<T> {
        self.state.clone_result()
    }

    /// Blocks until the future is ready.
    pub fn wait(&self) {
        self.state.wait();
    }

    /// Blocks until ready or `timeout` elapses; true when ready.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        self.state.wait_for(timeout)
    }

    /// True once the future holds a value or an error.
    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    /// True once the future holds a value.
    pub fn has_value(&self) -> bool {
        self.state.has_value()
    }

    /// True once the future holds an error.
    pub fn has_error(&self) -> bool {
        self.state.has_error()
    }

    /// Attaches a continuation receiving a clone of this shared future.
    pub fn then_on<R, F>(&self, executor: impl Into<Executor>, f: F) -> Future<R>
    where
        R: Send + 'static,
        F: FnOnce(SharedFuture<T>) -> R + Send + 'static,
    {
        let this = self.clone();
        let name = self.state.chain_name();
        let (task, fut) = package_result(move || Ok(f(this)), self.token.clone(), name.clone());
        let label = name.unwrap_or_default();
        let executor = executor.into();
        self.state.add_continuation(Box::new(move || {
            executor.post_named(move || task.run(), &label);
        }));
        fut
    }

    /// Discards the value, keeping completion and cancel propagation.
    pub fn to_void(&self) -> Future<()> {
        let state = self.state.clone();
        let token = self.token.clone();
        let name = self.state.chain_name();
        let (task, fut) = package_result(
            move || match state.clone_result() {
                Ok(_) => {
                    if token.is_cancel_requested() {
                        Err(Error::Canceled)
                    } else {
                        Ok(())
                    }
                }
                Err(error) => Err(error),
            },
            self.token.clone(),
            name.clone(),
        );
        let label = name.unwrap_or_default();
        let sync = get_synchronous_executor();
        self.state.add_continuation(Box::new(move || {
            sync.post_named(move || task.run(), &label);
        }));
        fut
    }
}

/// A future already resolved to `value`.
pub fn make_ready_future<T: Send + 'static>(value: T) -> Future<T> {
    Future::from_parts(State::new_completed(Ok(value)), CancellationToken::new())
}

/// A void future already resolved.
pub fn ready_future() -> Future<()> {
    make_ready_future(())
}

/// A future already resolved to `error`.
pub fn make_exceptional_future<T: Send + 'static>(error: Error) -> Future<T> {
    Future::from_parts(State::new_completed(Err(error)), CancellationToken::new())
}
