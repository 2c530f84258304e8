//! Periodically rescheduled tasks.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::delay::async_wait_on;
use crate::error::Error;
use crate::executor::{get_default_pool, get_synchronous_executor};
use crate::future::{ready_future, Future, SharedFuture};
use crate::package::package;
use crate::thread_pool::ThreadPool;

/// When the first callback invocation happens after [`PeriodicTask::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartOption {
    /// First invocation after one period has elapsed.
    #[default]
    AfterPeriod,
    /// First invocation is posted immediately.
    Immediately,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Stopped,
    Running,
    Stopping,
}

type Callback = Arc<dyn Fn() -> Future<()> + Send + Sync>;

struct PeriodicState {
    phase: Phase,
    period: Duration,
    callback: Option<Callback>,
    executor: Option<ThreadPool>,
    /// The in-flight wait-call-reschedule chain while Running or Stopping.
    chain: Option<SharedFuture<()>>,
}

struct PeriodicInner {
    state: Mutex<PeriodicState>,
}

/// Calls a callback every period until stopped.
///
/// At most one invocation is in flight at any time: the next wait is only
/// scheduled once the previous call's future has resolved.
/// [`stop`](PeriodicTask::stop) cancels the pending wait, lets an in-flight
/// call finish, and resolves its future once the task is fully stopped.
/// A callback that fails (panics) has the payload routed to the executor's
/// error handler and stops the task.
///
/// # Examples
///
/// ```rust
/// use conflux::{PeriodicTask, StartOption, shutdown};
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let task = PeriodicTask::new();
/// let calls = Arc::new(AtomicUsize::new(0));
/// let seen = calls.clone();
/// task.set_callback(move || {
///     seen.fetch_add(1, Ordering::SeqCst);
/// });
/// task.set_period(Duration::from_millis(10));
/// task.start(StartOption::Immediately);
/// task.stop().wait();
/// assert!(calls.load(Ordering::SeqCst) >= 1);
/// shutdown();
/// ```
pub struct PeriodicTask {
    inner: Arc<PeriodicInner>,
}

impl PeriodicTask {
    pub fn new() -> Self {
        PeriodicTask {
            inner: Arc::new(PeriodicInner {
                state: Mutex::new(PeriodicState {
                    phase: Phase::Stopped,
                    period: Duration::ZERO,
                    callback: None,
                    executor: None,
                    chain: None,
                }),
            }),
        }
    }

    /// Sets a plain callback; it is lifted to return a ready future.
    pub fn set_callback<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.set_future_callback(move || {
            callback();
            ready_future()
        });
    }

    /// Sets a callback returning the future of its asynchronous work; the
    /// next period starts when that future resolves.
    pub fn set_future_callback<F>(&self, callback: F)
    where
        F: Fn() -> Future<()> + Send + Sync + 'static,
    {
        self.inner.state.lock().callback = Some(Arc::new(callback));
    }

    /// Sets the rescheduling period.
    pub fn set_period(&self, period: Duration) {
        self.inner.state.lock().period = period;
    }

    /// Sets the pool running the callback and its timer. Defaults to the
    /// process-wide default pool.
    pub fn set_executor(&self, executor: ThreadPool) {
        self.inner.state.lock().executor = Some(executor);
    }

    /// True while the task is running (not stopped or stopping).
    pub fn is_running(&self) -> bool {
        self.inner.state.lock().phase == Phase::Running
    }

    /// Starts the task.
    ///
    /// Idempotent while Running. Panics when no callback is set or when the
    /// task is still stopping.
    pub fn start(&self, option: StartOption) {
        let mut state = self.inner.state.lock();
        if state.callback.is_none() {
            panic!("a callback must be set before the periodic task is started");
        }
        match state.phase {
            Phase::Stopping => panic!("can't start a periodic task that is not fully stopped"),
            Phase::Running => return,
            Phase::Stopped => {}
        }
        state.phase = Phase::Running;
        let pool = resolve_pool(&mut state);

        match option {
            StartOption::AfterPeriod => {
                reschedule(&mut state, &self.inner, &pool);
            }
            StartOption::Immediately => {
                let inner = self.inner.clone();
                let call_pool = pool.clone();
                let (task, fut) = package(move || do_call(&inner, &call_pool));
                state.chain = Some(fut.unwrap().to_shared());
                drop(state);
                pool.post(move || task.run());
            }
        }
    }

    /// Stops the task.
    ///
    /// Requests cancellation of the pending wait, then resolves the
    /// returned future once the in-flight call (if any) has finished and
    /// the task is back in the stopped state. Idempotent; on an already
    /// stopped task the returned future is ready.
    pub fn stop(&self) -> Future<()> {
        enum Transition {
            WasStopping(SharedFuture<()>),
            WasRunning(SharedFuture<()>),
        }

        let transition = {
            let mut state = self.inner.state.lock();
            match state.phase {
                Phase::Stopped => return ready_future(),
                Phase::Stopping => {
                    Transition::WasStopping(state.chain.clone().expect("stopping task has a chain"))
                }
                Phase::Running => {
                    state.phase = Phase::Stopping;
                    Transition::WasRunning(state.chain.clone().expect("running task has a chain"))
                }
            }
        };

        match transition {
            Transition::WasStopping(chain) => chain.then_on(get_synchronous_executor(), |_| ()),
            Transition::WasRunning(chain) => {
                chain.request_cancel();
                let inner = self.inner.clone();
                chain.then_on(get_synchronous_executor(), move |_| {
                    let mut state = inner.state.lock();
                    debug_assert!(state.phase != Phase::Running);
                    state.phase = Phase::Stopped;
                    state.chain = None;
                })
            }
        }
    }
}

impl Default for PeriodicTask {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.stop().wait();
    }
}

fn resolve_pool(state: &mut PeriodicState) -> ThreadPool {
    state
        .executor
        .get_or_insert_with(get_default_pool)
        .clone()
}

/// Chains wait-then-call onto the pool. The state lock is held by the
/// caller; nothing in here runs user code inline (the call hop goes through
/// the pool), so holding it is safe.
fn reschedule(state: &mut PeriodicState, inner: &Arc<PeriodicInner>, pool: &ThreadPool) {
    debug_assert!(state.phase != Phase::Stopped);
    if state.phase == Phase::Stopping {
        return;
    }
    let inner = inner.clone();
    let call_pool = pool.clone();
    let chain = async_wait_on(pool, state.period)
        .and_then_on(pool, move |_| do_call(&inner, &call_pool))
        .unwrap()
        .then_on(get_synchronous_executor(), |_| ());
    state.chain = Some(chain.to_shared());
}

/// Runs the callback once and hooks the outcome: reschedule on success,
/// stop on error, let the stop flow finish on cancellation.
fn do_call(inner: &Arc<PeriodicInner>, pool: &ThreadPool) -> Future<()> {
    let callback = {
        let state = inner.state.lock();
        state.callback.clone().expect("periodic task has a callback")
    };

    match catch_unwind(AssertUnwindSafe(|| callback())) {
        Err(payload) => {
            pool.signal_error(Error::from_panic(payload));
            inner.state.lock().phase = Phase::Stopped;
            ready_future()
        }
        Ok(fut) => {
            let inner = inner.clone();
            let pool = pool.clone();
            fut.then_on(get_synchronous_executor(), move |done: Future<()>| {
                let outcome = done.get();
                let mut state = inner.state.lock();
                match outcome {
                    Ok(()) => {
                        if state.phase == Phase::Running {
                            reschedule(&mut state, &inner, &pool);
                        }
                    }
                    Err(Error::Canceled) => {}
                    Err(error) => {
                        state.phase = Phase::Stopped;
                        drop(state);
                        pool.signal_error(error);
                    }
                }
            })
        }
    }
}
