//! Tracking and canceling groups of in-flight futures.

use parking_lot::Mutex;

use crate::future::Future;
use crate::when::when_all;

struct GroupInner {
    futures: Vec<Future<()>>,
    terminating: bool,
}

/// Collects in-flight futures so they can be canceled and awaited together.
///
/// A group must be terminated before it is dropped; adding to a
/// terminating group panics.
///
/// # Examples
///
/// ```rust
/// use conflux::{FutureGroup, Promise};
///
/// let group = FutureGroup::new();
/// let promise = Promise::<()>::new();
/// group.add(promise.get_future());
/// let done = group.terminate();
/// assert!(promise.cancellation_token().is_cancel_requested());
/// promise.set_error(conflux::Error::Canceled);
/// done.wait();
/// ```
pub struct FutureGroup {
    inner: Mutex<GroupInner>,
}

impl FutureGroup {
    pub fn new() -> Self {
        FutureGroup {
            inner: Mutex::new(GroupInner {
                futures: Vec::new(),
                terminating: false,
            }),
        }
    }

    /// Registers a future with the group. Ready futures are discarded, and
    /// previously registered futures that have since completed are
    /// collected. Panics once [`terminate`](Self::terminate) was called.
    pub fn add<T: Send + 'static>(&self, fut: Future<T>) {
        let mut inner = self.inner.lock();
        if inner.terminating {
            panic!("adding a future to a terminating group");
        }
        if fut.is_ready() {
            return;
        }
        inner.futures.retain(|f| !f.is_ready());
        inner.futures.push(fut.to_void());
    }

    /// Requests cancellation of every tracked future and returns a future
    /// resolving once they have all completed. Idempotent; later calls
    /// return a ready future.
    pub fn terminate(&self) -> Future<()> {
        let futures = {
            let mut inner = self.inner.lock();
            inner.terminating = true;
            std::mem::take(&mut inner.futures)
        };
        for fut in &futures {
            fut.request_cancel();
        }
        when_all(futures).to_void()
    }
}

impl Default for FutureGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for FutureGroup {
    fn drop(&mut self) {
        debug_assert!(
            self.inner.get_mut().terminating,
            "dropping a future group that was not terminated"
        );
    }
}

/// A [`FutureGroup`] that cancels everything it tracks on drop.
///
/// Dropping the canceler requests cancellation of all registered futures;
/// they are expected to resolve promptly (cooperatively), which is
/// debug-asserted.
pub struct TaskCanceler {
    group: FutureGroup,
}

impl TaskCanceler {
    pub fn new() -> Self {
        TaskCanceler {
            group: FutureGroup::new(),
        }
    }

    /// Builds a future with `body` and registers it before handing it back,
    /// so the caller keeps the value while the canceler keeps the handle.
    pub fn run<R, F>(&self, body: F) -> Future<R>
    where
        R: Send + 'static,
        F: FnOnce() -> Future<R>,
    {
        let fut = body();
        self.group.add(fut.completion_watcher());
        fut
    }

    /// Registers an already-built future.
    pub fn add<T: Send + 'static>(&self, fut: Future<T>) {
        self.group.add(fut);
    }

    /// Cancels and awaits everything registered so far.
    pub fn terminate(&self) -> Future<()> {
        self.group.terminate()
    }
}

impl Default for TaskCanceler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TaskCanceler {
    fn drop(&mut self) {
        let done = self.group.terminate();
        debug_assert!(
            done.wait_for(std::time::Duration::from_secs(5)),
            "dropping a task canceler whose tasks did not cancel promptly"
        );
    }
}
