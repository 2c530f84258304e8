//! Worker thread pool with error and task-trace hooks.

use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use crate::error::Error;
use crate::executor::{Executor, ExecutorBackend};
use crate::reactor::{NamedTask, Reactor};

type ErrorHandler = Arc<dyn Fn(Error) + Send + Sync>;
type TraceHandler = Arc<dyn Fn(&str, Duration) + Send + Sync>;

thread_local! {
    static CURRENT_POOL: Cell<usize> = const { Cell::new(0) };
}

fn default_error_handler(error: Error) {
    tracing::error!(%error, "uncaught error in thread pool task");
    debug_assert!(
        false,
        "uncaught error in thread pool task and no error handler installed: {error}"
    );
}

struct PoolInner {
    name: String,
    reactor: Arc<Reactor>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
    thread_count: AtomicUsize,
    error_handler: RwLock<ErrorHandler>,
    trace_handler: RwLock<Option<TraceHandler>>,
}

/// A pool of worker threads dispatching work from a [`Reactor`].
///
/// The handle is cheap to clone; every clone drives the same pool. Posted
/// tasks run on exactly one worker each; a task that panics has its payload
/// routed to the error handler and does not contaminate other tasks.
///
/// # Examples
///
/// ```rust
/// use conflux::ThreadPool;
///
/// let pool = ThreadPool::new("example");
/// pool.start(2);
/// pool.post(|| println!("hello from a worker"));
/// pool.stop();
/// ```
#[derive(Clone)]
pub struct ThreadPool {
    inner: Arc<PoolInner>,
}

impl ThreadPool {
    /// Creates a stopped pool. `name` prefixes worker thread names and
    /// tracing output.
    pub fn new(name: impl Into<String>) -> Self {
        ThreadPool {
            inner: Arc::new(PoolInner {
                name: name.into(),
                reactor: Reactor::new(),
                threads: Mutex::new(Vec::new()),
                running: AtomicBool::new(false),
                thread_count: AtomicUsize::new(0),
                error_handler: RwLock::new(Arc::new(default_error_handler)),
                trace_handler: RwLock::new(None),
            }),
        }
    }

    /// Launches `thread_count` workers. Panics if the pool is already
    /// running.
    pub fn start(&self, thread_count: usize) {
        assert!(thread_count > 0, "a thread pool needs at least one thread");
        if self.inner.running.swap(true, Ordering::SeqCst) {
            panic!("the thread pool is already running");
        }
        self.inner
            .thread_count
            .store(thread_count, Ordering::SeqCst);
        self.inner.reactor.add_work_guard();
        let mut threads = self.inner.threads.lock();
        for index in 0..thread_count {
            let pool = self.clone();
            let handle = std::thread::Builder::new()
                .name(format!("{}-{}", self.inner.name, index))
                .spawn(move || pool.run_thread())
                .expect("failed to spawn pool worker");
            threads.push(handle);
        }
        tracing::debug!(pool = %self.inner.name, threads = thread_count, "thread pool started");
    }

    /// True between [`start`](Self::start) and [`stop`](Self::stop).
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Releases the keep-alive guard, drains queued tasks and joins the
    /// workers. Pending timers are abandoned. Idempotent.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.reactor.release_work_guard();
        let threads = std::mem::take(&mut *self.inner.threads.lock());
        for handle in threads {
            let _ = handle.join();
        }
        tracing::debug!(pool = %self.inner.name, "thread pool stopped");
    }

    /// Becomes a worker of this pool; returns when the pool runs out of
    /// work after [`stop`](Self::stop).
    pub fn run_thread(&self) {
        let marker = Arc::as_ptr(&self.inner) as usize;
        CURRENT_POOL.with(|current| current.set(marker));
        while let Some(task) = self.inner.reactor.dequeue() {
            self.run_task(task);
        }
        CURRENT_POOL.with(|current| current.set(0));
    }

    /// True when called from one of this pool's worker threads.
    pub fn is_in_this_context(&self) -> bool {
        CURRENT_POOL.with(|current| current.get()) == Arc::as_ptr(&self.inner) as usize
    }

    /// True when the pool was started with a single worker.
    pub fn is_single_threaded(&self) -> bool {
        self.inner.thread_count.load(Ordering::SeqCst) == 1
    }

    /// Enqueues `f` on the pool.
    pub fn post<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.reactor.post(f);
    }

    /// Enqueues `f` under a tracing label.
    pub fn post_named<F>(&self, f: F, name: &str)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.reactor.post_named(f, name);
    }

    /// The pool's reactor, for timer integrations.
    pub fn reactor(&self) -> Arc<Reactor> {
        self.inner.reactor.clone()
    }

    /// Routes an error to the installed error handler.
    ///
    /// The default handler logs the error and asserts in debug builds. If
    /// the handler itself panics the process aborts.
    pub fn signal_error(&self, error: Error) {
        let handler = self.inner.error_handler.read().clone();
        if catch_unwind(AssertUnwindSafe(|| handler(error))).is_err() {
            tracing::error!(pool = %self.inner.name, "error handler panicked, aborting");
            std::process::abort();
        }
    }

    /// Installs the handler that receives errors escaping posted tasks.
    pub fn set_error_handler<F>(&self, handler: F)
    where
        F: Fn(Error) + Send + Sync + 'static,
    {
        *self.inner.error_handler.write() = Arc::new(handler);
    }

    /// Installs a hook timing every dispatched task end-to-end.
    ///
    /// The hook receives the task's name and its wall-clock duration after
    /// the task completes.
    pub fn set_task_trace_handler<F>(&self, handler: F)
    where
        F: Fn(&str, Duration) + Send + Sync + 'static,
    {
        *self.inner.trace_handler.write() = Some(Arc::new(handler));
    }

    fn run_task(&self, task: NamedTask) {
        let trace = self.inner.trace_handler.read().clone();
        let started = trace.as_ref().map(|_| Instant::now());
        tracing::trace!(pool = %self.inner.name, task = %task.name, "dispatching task");
        if let Err(payload) = catch_unwind(AssertUnwindSafe(task.run)) {
            self.signal_error(Error::from_panic(payload));
        }
        if let (Some(trace), Some(started)) = (trace, started) {
            trace(&task.name, started.elapsed());
        }
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        if self.running.swap(false, Ordering::SeqCst) {
            self.reactor.release_work_guard();
            for handle in self.threads.get_mut().drain(..) {
                let _ = handle.join();
            }
        }
    }
}

impl ExecutorBackend for ThreadPool {
    fn post_boxed(&self, work: Box<dyn FnOnce() + Send>, name: &str) {
        self.inner.reactor.post_named(work, name);
    }

    fn is_in_this_context(&self) -> bool {
        ThreadPool::is_in_this_context(self)
    }

    fn is_single_threaded(&self) -> bool {
        ThreadPool::is_single_threaded(self)
    }

    fn signal_error(&self, error: Error) {
        ThreadPool::signal_error(self, error);
    }
}

impl From<ThreadPool> for Executor {
    fn from(pool: ThreadPool) -> Self {
        Executor::new(Arc::new(pool))
    }
}

impl From<&ThreadPool> for Executor {
    fn from(pool: &ThreadPool) -> Self {
        Executor::new(Arc::new(pool.clone()))
    }
}
