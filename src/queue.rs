//! Unbounded FIFO queue with future-based pop.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::future::{make_ready_future, Future};
use crate::promise::Promise;

struct QueueInner<T: Send + 'static> {
    values: VecDeque<T>,
    waiters: VecDeque<Promise<T>>,
}

/// FIFO of values with a FIFO of waiting consumers.
///
/// `push` hands its value to the oldest waiter if there is one, `pop`
/// returns a ready future if a value is queued and otherwise a future that
/// resolves on a later push. At most one of the two internal queues is
/// non-empty at any time.
///
/// # Examples
///
/// ```rust
/// use conflux::ConcurrentQueue;
///
/// let queue = ConcurrentQueue::new();
/// let pending = queue.pop();
/// assert!(!pending.is_ready());
/// queue.push(7);
/// assert_eq!(pending.get().unwrap(), 7);
/// ```
pub struct ConcurrentQueue<T: Send + 'static> {
    inner: Mutex<QueueInner<T>>,
}

impl<T: Send + 'static> ConcurrentQueue<T> {
    pub fn new() -> Self {
        ConcurrentQueue {
            inner: Mutex::new(QueueInner {
                values: VecDeque::new(),
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Enqueues `value`, or hands it directly to the oldest waiter.
    pub fn push(&self, value: T) {
        let waiter = {
            let mut inner = self.inner.lock();
            match inner.waiters.pop_front() {
                Some(waiter) => {
                    debug_assert!(inner.values.is_empty());
                    waiter
                }
                None => {
                    inner.values.push_back(value);
                    return;
                }
            }
        };
        // Completing the waiter runs its continuations; keep that outside
        // the queue lock so a continuation may push again.
        waiter.set_value(value);
    }

    /// The future of the next value.
    ///
    /// Ready immediately when a value is queued; otherwise resolves on the
    /// corresponding later [`push`](Self::push), in pop order.
    pub fn pop(&self) -> Future<T> {
        let mut inner = self.inner.lock();
        if let Some(value) = inner.values.pop_front() {
            debug_assert!(inner.waiters.is_empty());
            return make_ready_future(value);
        }
        let promise = Promise::new();
        let fut = promise.get_future();
        inner.waiters.push_back(promise);
        fut
    }

    /// Number of queued values (waiters not included).
    pub fn len(&self) -> usize {
        self.inner.lock().values.len()
    }

    /// True when no values are queued.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().values.is_empty()
    }
}

impl<T: Send + 'static> Default for ConcurrentQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_are_popped_in_push_order() {
        let queue = ConcurrentQueue::new();
        queue.push(1);
        queue.push(2);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().get().unwrap(), 1);
        assert_eq!(queue.pop().get().unwrap(), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn waiters_are_served_in_pop_order() {
        let queue = ConcurrentQueue::new();
        let first = queue.pop();
        let second = queue.pop();
        queue.push(10);
        queue.push(20);
        assert_eq!(first.get().unwrap(), 10);
        assert_eq!(second.get().unwrap(), 20);
    }
}
