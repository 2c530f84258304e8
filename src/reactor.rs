//! The dispatch core owned by every thread pool.
//!
//! A [`Reactor`] is a task queue plus a deadline-ordered timer table behind
//! one lock and one condition variable. Worker threads call
//! [`Reactor::dequeue`] in a loop; producers post tasks and schedule timers
//! from any thread. The reactor is exposed through
//! [`ThreadPool::reactor`](crate::thread_pool::ThreadPool::reactor) so
//! integrations can plug their own timer-driven work into the pool; the
//! crate's own timer, [`async_wait`](crate::delay::async_wait), is built on
//! nothing else.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// A unit of work with a tracing label.
pub(crate) struct NamedTask {
    pub(crate) name: String,
    pub(crate) run: Box<dyn FnOnce() + Send>,
}

type TimerCallback = Box<dyn FnOnce(bool) + Send>;

/// Identifies a scheduled timer for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerKey(u64);

struct ReactorInner {
    queue: VecDeque<NamedTask>,
    timers: BTreeMap<(Instant, u64), TimerCallback>,
    deadlines: HashMap<u64, Instant>,
    next_timer_id: u64,
    /// Keep-alive guards; workers exit once this reaches zero and the task
    /// queue is drained. Pending timers do not keep workers alive.
    guards: usize,
}

/// Task queue and timer table shared by the workers of one pool.
pub struct Reactor {
    inner: Mutex<ReactorInner>,
    wakeup: Condvar,
}

impl Reactor {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Reactor {
            inner: Mutex::new(ReactorInner {
                queue: VecDeque::new(),
                timers: BTreeMap::new(),
                deadlines: HashMap::new(),
                next_timer_id: 0,
                guards: 0,
            }),
            wakeup: Condvar::new(),
        })
    }

    /// Enqueues `f` for execution on a worker thread.
    pub fn post<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.post_named(f, "");
    }

    /// Enqueues `f` under a tracing label.
    pub fn post_named<F>(&self, f: F, name: &str)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut inner = self.inner.lock();
        inner.queue.push_back(NamedTask {
            name: name.to_string(),
            run: Box::new(f),
        });
        drop(inner);
        self.wakeup.notify_one();
    }

    /// Schedules `cb` to run on a worker after `delay`.
    ///
    /// The callback receives `false` when the deadline elapsed and `true`
    /// when the timer was canceled; it is invoked exactly once either way,
    /// unless the reactor is dropped first (then it is dropped unrun).
    pub fn schedule_timer<F>(&self, delay: Duration, cb: F) -> TimerKey
    where
        F: FnOnce(bool) + Send + 'static,
    {
        let mut inner = self.inner.lock();
        let id = inner.next_timer_id;
        inner.next_timer_id += 1;
        let deadline = Instant::now() + delay;
        inner.timers.insert((deadline, id), Box::new(cb));
        inner.deadlines.insert(id, deadline);
        drop(inner);
        // The new deadline may be earlier than what sleepers wait for.
        self.wakeup.notify_all();
        TimerKey(id)
    }

    /// Cancels a pending timer.
    ///
    /// When the timer had not fired yet, its callback is promptly run on a
    /// worker with `canceled = true` and this returns true. Returns false
    /// when the timer already fired (or was already canceled).
    pub fn cancel_timer(&self, key: TimerKey) -> bool {
        let mut inner = self.inner.lock();
        let Some(deadline) = inner.deadlines.remove(&key.0) else {
            return false;
        };
        let cb = inner
            .timers
            .remove(&(deadline, key.0))
            .expect("timer table out of sync");
        inner.queue.push_back(NamedTask {
            name: "timer cancel".to_string(),
            run: Box::new(move || cb(true)),
        });
        drop(inner);
        self.wakeup.notify_one();
        true
    }

    /// Number of tasks waiting in the queue (timers not included).
    pub fn queued_tasks(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub(crate) fn add_work_guard(&self) {
        self.inner.lock().guards += 1;
    }

    pub(crate) fn release_work_guard(&self) {
        let mut inner = self.inner.lock();
        debug_assert!(inner.guards > 0);
        inner.guards -= 1;
        drop(inner);
        self.wakeup.notify_all();
    }

    /// Blocks until a task is runnable or the reactor runs out of work.
    ///
    /// Returns `None` once the last work guard is gone and the queue is
    /// drained; pending timers are abandoned at that point (their callbacks
    /// are dropped when the reactor is, which breaks any promise they own).
    pub(crate) fn dequeue(&self) -> Option<NamedTask> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(task) = inner.queue.pop_front() {
                return Some(task);
            }
            if inner.guards == 0 {
                return None;
            }
            let now = Instant::now();
            let next_deadline = inner.timers.keys().next().copied();
            if let Some((deadline, id)) = next_deadline {
                if deadline <= now {
                    let cb = inner.timers.remove(&(deadline, id)).expect("timer exists");
                    inner.deadlines.remove(&id);
                    return Some(NamedTask {
                        name: "timer".to_string(),
                        run: Box::new(move || cb(false)),
                    });
                }
                self.wakeup.wait_until(&mut inner, deadline);
            } else {
                self.wakeup.wait(&mut inner);
            }
        }
    }
}
