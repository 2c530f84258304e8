//! Submitting plain callables to an executor.

use crate::cancellation::CancellationToken;
use crate::executor::{get_default_executor, Executor};
use crate::future::Future;
use crate::package::{package, package_with_token};

/// Runs `f` on the default executor and returns the future of its result.
///
/// # Examples
///
/// ```rust
/// use conflux::{shutdown, spawn};
///
/// let fut = spawn(|| 6 * 7);
/// assert_eq!(fut.get().unwrap(), 42);
/// shutdown();
/// ```
pub fn spawn<R, F>(f: F) -> Future<R>
where
    R: Send + 'static,
    F: FnOnce() -> R + Send + 'static,
{
    spawn_on(get_default_executor(), f)
}

/// Runs `f` on the given executor and returns the future of its result.
pub fn spawn_on<R, F>(executor: impl Into<Executor>, f: F) -> Future<R>
where
    R: Send + 'static,
    F: FnOnce() -> R + Send + 'static,
{
    let (task, fut) = package(f);
    executor.into().post(move || task.run());
    fut
}

/// Runs a token-aware callable on the default executor.
///
/// `f` receives the future's cancellation token for cooperative checks; it
/// always runs, even when cancellation was requested before it started.
pub fn spawn_cancelable<R, F>(f: F) -> Future<R>
where
    R: Send + 'static,
    F: FnOnce(&CancellationToken) -> R + Send + 'static,
{
    spawn_cancelable_on(get_default_executor(), f)
}

/// Runs a token-aware callable on the given executor.
pub fn spawn_cancelable_on<R, F>(executor: impl Into<Executor>, f: F) -> Future<R>
where
    R: Send + 'static,
    F: FnOnce(&CancellationToken) -> R + Send + 'static,
{
    let (task, fut) = package_with_token(f);
    executor.into().post(move || task.run());
    fut
}
