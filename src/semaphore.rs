//! Future-based counting semaphore.

use std::sync::Arc;

use crate::executor::get_synchronous_executor;
use crate::future::Future;
use crate::queue::ConcurrentQueue;

/// Counting semaphore built on [`ConcurrentQueue`]: the count is a queue of
/// unit tokens, acquiring pops one and releasing pushes one back.
///
/// # Examples
///
/// ```rust
/// use conflux::Semaphore;
///
/// let sem = Semaphore::new(1);
/// sem.acquire().get().unwrap();
/// let waiting = sem.acquire();
/// assert!(!waiting.is_ready());
/// sem.release();
/// waiting.get().unwrap();
/// ```
#[derive(Clone)]
pub struct Semaphore {
    tokens: Arc<ConcurrentQueue<()>>,
}

impl Semaphore {
    /// A semaphore with `count` initially available slots.
    pub fn new(count: usize) -> Self {
        let tokens = ConcurrentQueue::new();
        for _ in 0..count {
            tokens.push(());
        }
        Semaphore {
            tokens: Arc::new(tokens),
        }
    }

    /// The future of one acquired slot; resolves once a slot is free.
    pub fn acquire(&self) -> Future<()> {
        self.tokens
            .pop()
            .and_then_on(get_synchronous_executor(), |_| ())
    }

    /// Returns one slot. Also usable to grow the semaphore.
    pub fn release(&self) {
        self.tokens.push(());
    }

    /// The future of a guard that releases its slot on drop.
    pub fn acquire_scoped(&self) -> Future<SemaphoreGuard> {
        let semaphore = self.clone();
        self.tokens
            .pop()
            .and_then_on(get_synchronous_executor(), move |_| SemaphoreGuard {
                semaphore: Some(semaphore),
            })
    }

    /// Currently available slots.
    pub fn count(&self) -> usize {
        self.tokens.len()
    }
}

/// Releases its semaphore slot on drop.
pub struct SemaphoreGuard {
    semaphore: Option<Semaphore>,
}

impl Drop for SemaphoreGuard {
    fn drop(&mut self) {
        if let Some(semaphore) = self.semaphore.take() {
            semaphore.release();
        }
    }
}
