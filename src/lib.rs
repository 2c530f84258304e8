//! # conflux
//!
//! Composable cancellable futures, cooperative coroutines and a small
//! thread-pool runtime.
//!
//! ## Features
//!
//! - **Eager futures**: a [`Future`]/[`Promise`] pair backed by a shared
//!   state; continuations (`then`, `and_then`, `unwrap`, `to_void`) are
//!   posted to executors as soon as the state completes
//! - **Structured cancellation**: every chain shares a
//!   [`CancellationToken`] with a LIFO stack of cancel callbacks; cancel
//!   requested at the tail reaches the head unless the chain is broken
//! - **Thread pools**: N-worker pools around a timer [`Reactor`], with
//!   error and task-trace hooks; a lazily-created single-threaded default
//!   pool keeps continuation chains race-free
//! - **Stackful coroutines**: [`async_resumable`] runs a body with real
//!   suspension points (`await_future`, `yield_now`), all of which are
//!   cancellation points
//! - **Primitives on futures**: periodic task, concurrent queue,
//!   semaphore, future group, task canceler, coalescing job
//!
//! ## Quick start
//!
//! ```rust
//! use conflux::{get_synchronous_executor, make_ready_future, shutdown, spawn};
//!
//! // Chain continuations on a future.
//! let doubled = make_ready_future(21)
//!     .and_then_on(get_synchronous_executor(), |n| n * 2);
//! assert_eq!(doubled.get().unwrap(), 42);
//!
//! // Or run work on the process-wide default pool.
//! let spawned = spawn(|| "hello".len());
//! assert_eq!(spawned.get().unwrap(), 5);
//! shutdown();
//! ```
//!
//! ## Cancellation
//!
//! ```rust
//! use conflux::Promise;
//!
//! let promise = Promise::<u32>::new();
//! let fut = promise.get_future();
//! fut.request_cancel();
//! // The producer observes the request on the shared token and gives up.
//! assert!(promise.cancellation_token().is_cancel_requested());
//! promise.set_error(conflux::Error::Canceled);
//! assert!(fut.get().unwrap_err().is_canceled());
//! ```
//!
//! ## Shutdown
//!
//! The two process-wide pools ([`get_default_executor`],
//! [`get_background_executor`]) are created lazily and torn down only by an
//! explicit [`shutdown`] call; there is no reliable destructor ordering at
//! process exit to do it implicitly.

// Module declarations
pub mod cancellation;
pub mod coroutine;
pub mod delay;
pub mod error;
pub mod executor;
pub mod future;
pub mod group;
pub mod job;
pub mod package;
pub mod periodic;
pub mod promise;
pub mod queue;
pub mod reactor;
pub mod semaphore;
pub mod spawn;
pub mod thread_pool;
pub mod when;

// Internal modules
mod internal;

// Re-export core types
pub use cancellation::{CancellationToken, ScopeCanceler};
pub use coroutine::{async_resumable, async_resumable_on, Awaiter};
pub use delay::{async_wait, async_wait_on};
pub use error::{Error, Result};
pub use executor::{
    get_background_executor, get_background_pool, get_default_executor, get_default_pool,
    get_synchronous_executor, shutdown, Executor, ExecutorBackend, SynchronousExecutor,
};
pub use future::{
    make_exceptional_future, make_ready_future, ready_future, Future, SharedFuture,
};
pub use group::{FutureGroup, TaskCanceler};
pub use job::Job;
pub use package::{package, package_cancelable, package_with_token, PackagedTask};
pub use periodic::{PeriodicTask, StartOption};
pub use promise::Promise;
pub use queue::ConcurrentQueue;
pub use reactor::{Reactor, TimerKey};
pub use semaphore::{Semaphore, SemaphoreGuard};
pub use spawn::{spawn, spawn_cancelable, spawn_cancelable_on, spawn_on};
pub use thread_pool::ThreadPool;
pub use when::{when_all, when_any, WhenAnyOptions, WhenAnyResult};
