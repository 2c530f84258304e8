//! Cancelable timed futures.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::Error;
use crate::executor::get_default_pool;
use crate::future::Future;
use crate::promise::Promise;
use crate::reactor::TimerKey;
use crate::thread_pool::ThreadPool;

/// A future that resolves after `delay` on the default pool's timer.
///
/// The future is cancelable: requesting cancellation before the timer fires
/// resolves it with [`Error::Canceled`]. A zero delay still makes a full
/// round-trip through the reactor.
///
/// # Examples
///
/// ```rust
/// use conflux::{async_wait, shutdown};
/// use std::time::Duration;
///
/// async_wait(Duration::from_millis(5)).wait();
/// shutdown();
/// ```
pub fn async_wait(delay: Duration) -> Future<()> {
    async_wait_on(&get_default_pool(), delay)
}

/// A future that resolves after `delay` on the given pool's timer.
///
/// On a single-threaded pool a cancellation request completes the future
/// *immediately*, from the canceling thread. On a multi-threaded pool the
/// cancellation is relayed through the reactor and the future resolves
/// shortly after, from a worker.
pub fn async_wait_on(pool: &ThreadPool, delay: Duration) -> Future<()> {
    let reactor = pool.reactor();
    let promise = Promise::<()>::new();
    let token = promise.cancellation_token().clone();
    let fut = promise.get_future();

    // The cancel callback is pushed before the timer is scheduled, so the
    // fire path always finds it on the stack; the key travels through a
    // cell because it does not exist yet at push time.
    let key_cell: Arc<Mutex<Option<TimerKey>>> = Arc::new(Mutex::new(None));

    if pool.is_single_threaded() {
        // Fired/canceled latch: whichever path flips it first completes the
        // future, exactly once.
        let fired = Arc::new(AtomicBool::new(false));

        let cancel_latch = fired.clone();
        let cancel_reactor = reactor.clone();
        let cancel_keys = key_cell.clone();
        let cancel_token = token.clone();
        let cancel_promise = promise.clone();
        token.push_cancellation_callback(move || {
            if cancel_latch.swap(true, Ordering::SeqCst) {
                return;
            }
            if let Some(key) = *cancel_keys.lock() {
                cancel_reactor.cancel_timer(key);
            }
            cancel_token.pop_cancellation_callback();
            cancel_promise.set_error(Error::Canceled);
        });

        let fire_token = token;
        let key = reactor.schedule_timer(delay, move |canceled| {
            if canceled {
                return;
            }
            if !fired.swap(true, Ordering::SeqCst) {
                fire_token.pop_cancellation_callback();
                promise.set_value(());
            }
        });
        *key_cell.lock() = Some(key);
    } else {
        // Completion always happens on a worker; the cancel callback only
        // redirects the timer, and the reactor guarantees the completion
        // callback runs exactly once.
        let cancel_reactor = reactor.clone();
        let cancel_keys = key_cell.clone();
        token.push_cancellation_callback(move || {
            if let Some(key) = *cancel_keys.lock() {
                cancel_reactor.cancel_timer(key);
            }
        });

        let fire_token = token;
        let key = reactor.schedule_timer(delay, move |canceled| {
            fire_token.pop_cancellation_callback();
            if canceled || fire_token.is_cancel_requested() {
                promise.set_error(Error::Canceled);
            } else {
                promise.set_value(());
            }
        });
        *key_cell.lock() = Some(key);
    }

    fut
}
