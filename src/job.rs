//! A coalescing, re-triggerable background job.
//!
//! A [`Job`] wraps an asynchronous callback that should run "soon, once"
//! no matter how many times it is poked: triggers while a run is merely
//! scheduled coalesce into that run, and triggers while a run is already
//! executing schedule exactly one more. Rescheduling hops through the
//! default executor, so the internal mutex is only ever taken briefly and
//! never re-entered.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::executor::{get_default_executor, get_synchronous_executor};
use crate::future::{ready_future, Future, SharedFuture};
use crate::promise::Promise;
use crate::spawn::spawn;

type JobCallback = Box<dyn Fn() -> Future<()> + Send + Sync>;

struct JobState {
    scheduled: bool,
    stopping: bool,
    running: bool,
    chain: SharedFuture<()>,
    success_promises: Vec<Promise<()>>,
}

struct JobInner {
    state: Mutex<JobState>,
    callback: JobCallback,
}

/// Coalescing re-triggerable task around an asynchronous callback.
///
/// # Examples
///
/// ```rust
/// use conflux::{Job, shutdown};
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// let runs = Arc::new(AtomicUsize::new(0));
/// let seen = runs.clone();
/// let job = Job::new(move || {
///     seen.fetch_add(1, Ordering::SeqCst);
///     conflux::ready_future()
/// });
/// job.trigger().wait();
/// assert!(runs.load(Ordering::SeqCst) >= 1);
/// drop(job);
/// shutdown();
/// ```
pub struct Job {
    inner: Arc<JobInner>,
}

impl Job {
    /// Wraps `callback`; nothing runs until the first trigger.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn() -> Future<()> + Send + Sync + 'static,
    {
        Job {
            inner: Arc::new(JobInner {
                state: Mutex::new(JobState {
                    scheduled: false,
                    stopping: false,
                    running: false,
                    chain: ready_future().to_shared(),
                    success_promises: Vec::new(),
                }),
                callback: Box::new(callback),
            }),
        }
    }

    /// Pokes the job.
    ///
    /// If a run is scheduled but not started, this coalesces into it. If a
    /// run is executing, one more run is scheduled after it. The returned
    /// future resolves when the job has run from start to finish at least
    /// once after this call.
    pub fn trigger(&self) -> SharedFuture<()> {
        let mut state = self.inner.state.lock();
        self.trigger_locked(&mut state);
        state.chain.clone()
    }

    /// Like [`trigger`](Self::trigger), but the returned future resolves
    /// only when a run completes without error. A failed run does not
    /// retry by itself; trigger again.
    pub fn trigger_success(&self) -> SharedFuture<()> {
        let mut state = self.inner.state.lock();
        let promise = Promise::new();
        let success = promise.get_future().to_shared();
        state.success_promises.push(promise);
        self.trigger_locked(&mut state);
        success
    }

    fn trigger_locked(&self, state: &mut JobState) {
        if state.scheduled {
            return;
        }
        state.scheduled = true;
        let inner = self.inner.clone();
        // Chain after whatever run is in flight; the hop through the
        // default executor keeps this lock out of the continuation's path.
        state.chain = state
            .chain
            .then_on(get_default_executor(), move |_| run_gate(&inner))
            .unwrap()
            .to_shared();
    }
}

impl Drop for Job {
    fn drop(&mut self) {
        let chain = {
            let mut state = self.inner.state.lock();
            state.stopping = true;
            state.chain.clone()
        };
        chain.request_cancel();
        chain.wait();
    }
}

fn run_gate(inner: &Arc<JobInner>) -> Future<()> {
    {
        let state = inner.state.lock();
        debug_assert!(state.scheduled);
        if state.stopping {
            return ready_future();
        }
    }
    let inner = inner.clone();
    spawn(move || {
        let pending = {
            let mut state = inner.state.lock();
            state.scheduled = false;
            if state.stopping {
                return ready_future();
            }
            debug_assert!(!state.running);
            state.running = true;
            state.success_promises.len()
        };
        let fut = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            (inner.callback)()
        })) {
            Ok(fut) => fut,
            Err(_) => {
                inner.state.lock().running = false;
                return ready_future();
            }
        };
        let inner = inner.clone();
        fut.then_on(get_synchronous_executor(), move |done: Future<()>| {
            let succeeded = done.get().is_ok();
            let resolved = {
                let mut state = inner.state.lock();
                // running may already be false if the run was canceled
                // before it started
                state.running = false;
                if succeeded {
                    state
                        .success_promises
                        .drain(..pending)
                        .collect::<Vec<_>>()
                } else {
                    Vec::new()
                }
            };
            for promise in resolved {
                promise.set_value(());
            }
        })
    })
    .unwrap()
}

