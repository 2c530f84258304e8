//! Type-erased executors and the process-wide pools.
//!
//! An [`Executor`] is a cheap-to-clone sink for `(work, name)` pairs; the
//! [`ExecutorBackend`] trait is the seam integrations implement. Two
//! process-wide pools exist lazily: the *default* executor is single
//! threaded so chains of continuations get race-free access to captured
//! state, and the *background* executor is sized to the hardware for
//! compute. [`shutdown`] tears both down in reverse creation order; it must
//! be called explicitly because there is no portable destructor ordering to
//! rely on at process exit.

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::error::Error;
use crate::thread_pool::ThreadPool;

/// The seam between the future machinery and whatever runs its work.
pub trait ExecutorBackend: Send + Sync + 'static {
    /// Schedules `work` for execution. `name` is a tracing label and may be
    /// empty.
    fn post_boxed(&self, work: Box<dyn FnOnce() + Send>, name: &str);

    /// True when the calling thread belongs to this executor.
    fn is_in_this_context(&self) -> bool {
        false
    }

    /// True when posted work is never run concurrently.
    fn is_single_threaded(&self) -> bool {
        false
    }

    /// Receives errors that escape work posted to this executor.
    fn signal_error(&self, error: Error) {
        tracing::error!(%error, "unhandled executor error");
    }
}

/// Type-erased handle to something that can run work.
///
/// # Examples
///
/// ```rust
/// use conflux::{get_synchronous_executor, make_ready_future};
///
/// let fut = make_ready_future(20)
///     .and_then_on(get_synchronous_executor(), |n| n + 1)
///     .and_then_on(get_synchronous_executor(), |n| n * 2);
/// assert_eq!(fut.get().unwrap(), 42);
/// ```
#[derive(Clone)]
pub struct Executor {
    backend: Arc<dyn ExecutorBackend>,
}

impl Executor {
    /// Wraps a backend.
    pub fn new(backend: Arc<dyn ExecutorBackend>) -> Self {
        Executor { backend }
    }

    /// Schedules `f` for execution.
    pub fn post<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.backend.post_boxed(Box::new(f), "");
    }

    /// Schedules `f` under a tracing label.
    pub fn post_named<F>(&self, f: F, name: &str)
    where
        F: FnOnce() + Send + 'static,
    {
        self.backend.post_boxed(Box::new(f), name);
    }

    /// True when the calling thread belongs to this executor.
    pub fn is_in_this_context(&self) -> bool {
        self.backend.is_in_this_context()
    }

    /// True when posted work is never run concurrently.
    pub fn is_single_threaded(&self) -> bool {
        self.backend.is_single_threaded()
    }

    /// Routes an error to the executor's error handler.
    pub fn signal_error(&self, error: Error) {
        self.backend.signal_error(error);
    }
}

/// Executor that runs its work in place, on the posting thread.
pub struct SynchronousExecutor;

impl ExecutorBackend for SynchronousExecutor {
    fn post_boxed(&self, work: Box<dyn FnOnce() + Send>, _name: &str) {
        work();
    }

    fn is_in_this_context(&self) -> bool {
        true
    }

    fn is_single_threaded(&self) -> bool {
        true
    }
}

impl From<SynchronousExecutor> for Executor {
    fn from(executor: SynchronousExecutor) -> Self {
        Executor::new(Arc::new(executor))
    }
}

/// The inline executor. Continuations posted to it run on whichever thread
/// completes the upstream future.
pub fn get_synchronous_executor() -> Executor {
    static SYNC: Lazy<Executor> = Lazy::new(|| Executor::new(Arc::new(SynchronousExecutor)));
    SYNC.clone()
}

#[derive(Default)]
struct GlobalPools {
    /// In creation order; torn down in reverse.
    created: Vec<ThreadPool>,
    default_pool: Option<ThreadPool>,
    background_pool: Option<ThreadPool>,
}

static GLOBALS: Lazy<Mutex<GlobalPools>> = Lazy::new(|| Mutex::new(GlobalPools::default()));

/// The process-wide single-threaded pool backing [`get_default_executor`].
/// Created and started on first use.
pub fn get_default_pool() -> ThreadPool {
    let mut globals = GLOBALS.lock();
    if globals.default_pool.is_none() {
        let pool = ThreadPool::new("conflux-default");
        pool.start(1);
        globals.created.push(pool.clone());
        globals.default_pool = Some(pool);
    }
    globals.default_pool.as_ref().expect("just created").clone()
}

/// The process-wide compute pool backing [`get_background_executor`], sized
/// to `available_parallelism`. Created and started on first use.
pub fn get_background_pool() -> ThreadPool {
    let mut globals = GLOBALS.lock();
    if globals.background_pool.is_none() {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let pool = ThreadPool::new("conflux-background");
        pool.start(threads);
        globals.created.push(pool.clone());
        globals.background_pool = Some(pool);
    }
    globals
        .background_pool
        .as_ref()
        .expect("just created")
        .clone()
}

/// The single-threaded executor used by continuation methods when no
/// executor is given, and by timers.
pub fn get_default_executor() -> Executor {
    Executor::from(get_default_pool())
}

/// The hardware-sized executor for compute-heavy work.
pub fn get_background_executor() -> Executor {
    Executor::from(get_background_pool())
}

/// Stops the process-wide pools in reverse creation order.
///
/// Must be called explicitly before process exit if the globals were used;
/// there is no implicit teardown. Pools are re-created lazily if used again
/// afterwards.
pub fn shutdown() {
    let pools = {
        let mut globals = GLOBALS.lock();
        globals.default_pool = None;
        globals.background_pool = None;
        std::mem::take(&mut globals.created)
    };
    for pool in pools.into_iter().rev() {
        pool.stop();
    }
}
