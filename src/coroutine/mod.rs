//! Stackful coroutines scheduled over executors.
//!
//! [`async_resumable`] runs a body on its own fiber (a dedicated thread
//! with a real stack) whose timeslices are driven by an executor: the
//! executor thread blocks while the fiber runs and the fiber blocks while
//! suspended, so body code enjoys whatever serialization the executor
//! provides. Awaiting a future suspends the fiber until the future
//! completes; every suspension point is also a cancellation point.
//!
//! Cancellation of a suspended coroutine goes through a scoped canceler on
//! the coroutine's token: it cancels the awaited operation, marks the
//! coroutine aborted and resumes the fiber one final time, which makes the
//! pending await return [`Error::Canceled`] so the body unwinds through its
//! `?` operators. Whatever a body swallows, the coroutine's future resolves
//! to [`Error::Canceled`] once the aborted flag is set.

mod fiber;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

use parking_lot::Mutex;

use crate::cancellation::CancellationToken;
use crate::error::{Error, Result};
use crate::executor::{get_default_executor, Executor};
use crate::future::{ready_future, Future};
use crate::internal::{State, Ticket};
use crate::package::package_cancelable_with_token;

use fiber::{Fiber, FiberEvent};

/// Fibers get twice the stack a default Rust thread gets.
const COROUTINE_STACK_SIZE: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResumeStatus {
    Waiting,
    Finished,
    Aborted,
}

struct CoroutineControl {
    name: String,
    executor: Executor,
    token: CancellationToken,
    aborted: AtomicBool,
    fiber: Fiber,
    fiber_thread: Mutex<Option<ThreadId>>,
}

impl CoroutineControl {
    fn is_on_fiber(&self) -> bool {
        self.fiber_thread
            .lock()
            .map_or(false, |id| id == std::thread::current().id())
    }
}

fn run_coroutine(ctrl: &Arc<CoroutineControl>, abort: bool) -> ResumeStatus {
    match ctrl.fiber.resume(abort) {
        FiberEvent::Suspended => ResumeStatus::Waiting,
        FiberEvent::Finished => {
            if ctrl.aborted.load(Ordering::SeqCst) {
                ResumeStatus::Aborted
            } else {
                ResumeStatus::Finished
            }
        }
    }
}

/// Suspension handle passed to a coroutine body.
///
/// All suspension is explicit: the body calls
/// [`await_future`](Awaiter::await_future) or
/// [`yield_now`](Awaiter::yield_now) and propagates their `Result` with
/// `?`, which is what lets cancellation unwind the coroutine.
pub struct Awaiter {
    ctrl: Arc<CoroutineControl>,
}

impl Awaiter {
    /// Suspends the coroutine until `fut` completes and returns its result.
    ///
    /// A ready future is taken without a context switch. This is a
    /// cancellation point: if the coroutine's token is canceled by the time
    /// the call would return — even with a value in hand — it returns
    /// [`Error::Canceled`].
    pub fn await_future<T: Send + 'static>(&self, fut: Future<T>) -> Result<T> {
        self.await_impl(fut, true)
    }

    /// Reschedules the coroutine behind whatever else its executor has
    /// queued. A cancellation point on both sides of the suspension.
    pub fn yield_now(&self) -> Result<()> {
        if self.ctrl.token.is_cancel_requested() {
            return Err(Error::Canceled);
        }
        self.await_impl(ready_future(), false)
    }

    /// The coroutine's cancellation token.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.ctrl.token
    }

    fn await_impl<T: Send + 'static>(&self, fut: Future<T>, early_return: bool) -> Result<T> {
        if std::thread::panicking() {
            tracing::error!("cannot suspend a coroutine while the fiber is panicking");
            std::process::abort();
        }
        let ctrl = &self.ctrl;
        let finished: Future<T> = if early_return && fut.is_ready() {
            fut
        } else {
            if ctrl.aborted.load(Ordering::SeqCst) {
                return Err(Error::Canceled);
            }
            let fut = fut.update_chain_name(ctrl.name.clone());
            let fut_token = fut.cancellation_token().clone();
            let slot: Arc<Mutex<Option<Future<T>>>> = Arc::new(Mutex::new(None));

            let cancel_ctrl = self.ctrl.clone();
            let canceler = ctrl.token.make_scope_canceler(move || {
                // Flag first: a completion racing with the abort must not
                // deliver and resume once the coroutine is condemned.
                cancel_ctrl.aborted.store(true, Ordering::SeqCst);
                fut_token.request_cancel();
                if cancel_ctrl.is_on_fiber() {
                    // Fired synchronously from the fiber itself (token was
                    // already canceled, or the body canceled its own
                    // token); the pending await sees the flag instead of
                    // suspending.
                    return;
                }
                let status = run_coroutine(&cancel_ctrl, true);
                debug_assert!(
                    status != ResumeStatus::Waiting,
                    "a condemned coroutine must not suspend again"
                );
            });
            if ctrl.aborted.load(Ordering::SeqCst) {
                drop(canceler);
                return Err(Error::Canceled);
            }

            let hook_ctrl = self.ctrl.clone();
            let hook_slot = slot.clone();
            let hook = Box::new(move || {
                let state = fut.state_handle();
                let executor = hook_ctrl.executor.clone();
                let name = hook_ctrl.name.clone();
                let deliver = move || {
                    if hook_ctrl.aborted.load(Ordering::SeqCst) {
                        return;
                    }
                    *hook_slot.lock() = Some(fut);
                    run_coroutine(&hook_ctrl, false);
                };
                state.add_continuation(Box::new(move || {
                    executor.post_named(deliver, &name);
                }));
            });

            let abort = ctrl.fiber.suspend(hook);
            drop(canceler);
            if abort || ctrl.aborted.load(Ordering::SeqCst) {
                return Err(Error::Canceled);
            }
            if ctrl.token.is_cancel_requested() {
                return Err(Error::Canceled);
            }
            let delivered = slot
                .lock()
                .take()
                .expect("completed future was not delivered to the coroutine");
            delivered
        };
        if ctrl.token.is_cancel_requested() {
            return Err(Error::Canceled);
        }
        finished.get()
    }
}

/// Runs `body` as a coroutine on the default executor.
///
/// See [`async_resumable_on`].
///
/// # Examples
///
/// ```rust
/// use conflux::{async_resumable, make_ready_future, shutdown};
///
/// let fut = async_resumable(|awaiter| {
///     let a = awaiter.await_future(make_ready_future(40))?;
///     let b = awaiter.await_future(make_ready_future(2))?;
///     Ok(a + b)
/// });
/// assert_eq!(fut.get().unwrap(), 42);
/// shutdown();
/// ```
pub fn async_resumable<R, F>(body: F) -> Future<R>
where
    R: Send + 'static,
    F: FnOnce(&Awaiter) -> Result<R> + Send + 'static,
{
    async_resumable_on("", get_default_executor(), body)
}

/// Runs `body` as a coroutine on `executor`, labeled `name` for tracing.
///
/// The body runs on a dedicated fiber resumed by `executor`; it receives an
/// [`Awaiter`] for suspension and must propagate awaited errors for
/// cancellation to unwind it. The returned future resolves with the body's
/// result, or with [`Error::Canceled`] when the coroutine is canceled
/// before or during its run.
pub fn async_resumable_on<R, F>(name: &str, executor: impl Into<Executor>, body: F) -> Future<R>
where
    R: Send + 'static,
    F: FnOnce(&Awaiter) -> Result<R> + Send + 'static,
{
    let executor = executor.into();
    let full_name = if name.is_empty() {
        format!("coroutine ({})", std::any::type_name::<F>())
    } else {
        format!("{} ({})", name, std::any::type_name::<F>())
    };

    let token = CancellationToken::new();
    let setup_executor = executor.clone();
    let setup_name = full_name.clone();
    let setup_token = token.clone();
    let (setup_task, setup_fut) = package_cancelable_with_token(
        move |_: &CancellationToken| -> Future<R> {
            let inner_state = State::<R>::new(setup_token.clone());
            inner_state.set_chain_name(Some(setup_name.clone()));
            let inner_fut = Future::from_parts(inner_state.clone(), setup_token.clone());
            let ticket = Ticket::new(inner_state.clone());

            let ctrl = Arc::new(CoroutineControl {
                name: setup_name,
                executor: setup_executor,
                token: setup_token,
                aborted: AtomicBool::new(false),
                fiber: Fiber::new(),
                fiber_thread: Mutex::new(None),
            });

            let fiber_ctrl = ctrl.clone();
            std::thread::Builder::new()
                .name("conflux-coro".to_string())
                .stack_size(COROUTINE_STACK_SIZE)
                .spawn(move || {
                    *fiber_ctrl.fiber_thread.lock() = Some(std::thread::current().id());
                    let aborted_before_start = fiber_ctrl.fiber.first_wait();
                    let result = if aborted_before_start {
                        Err(Error::Canceled)
                    } else {
                        let awaiter = Awaiter {
                            ctrl: fiber_ctrl.clone(),
                        };
                        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| body(&awaiter)))
                            .unwrap_or_else(|payload| Err(Error::from_panic(payload)))
                    };
                    let result = if fiber_ctrl.aborted.load(Ordering::SeqCst) {
                        Err(Error::Canceled)
                    } else {
                        result
                    };
                    inner_state.set_result(result);
                    drop(ticket);
                    fiber_ctrl.fiber.finish();
                })
                .expect("failed to spawn coroutine fiber");

            run_coroutine(&ctrl, false);
            inner_fut
        },
        token,
        Some(full_name.clone()),
    );

    executor.post_named(move || setup_task.run(), &full_name);
    setup_fut.update_chain_name(full_name).unwrap()
}
