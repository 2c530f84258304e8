//! Combinators over collections of futures.
//!
//! Both combinators observe readiness through a non-consuming hook on each
//! input's shared state and hand the original futures back in the result,
//! so the caller keeps full access to every value and error.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cancellation::CancellationToken;
use crate::future::{make_ready_future, Future};
use crate::promise::Promise;

/// Sibling policy for [`when_any`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WhenAnyOptions {
    /// Leave the other inputs running.
    #[default]
    None,
    /// Request cancellation of every other input as soon as the first one
    /// completes. The returned future does not wait for the siblings: they
    /// may still be running when it resolves.
    AutoCancel,
}

/// Result of [`when_any`].
pub struct WhenAnyResult<T: Send + 'static> {
    /// Position of the first input that completed, or `None` for an empty
    /// input.
    pub index: Option<usize>,
    /// All input futures, in input order. The one at `index` is ready;
    /// the others may or may not be.
    pub futures: Vec<Future<T>>,
}

struct WhenAllShared<T: Send + 'static> {
    futures: Mutex<Option<Vec<Future<T>>>>,
    completed: AtomicUsize,
    total: usize,
    output: Promise<Vec<Future<T>>>,
}

/// Resolves once every input future is ready.
///
/// The output carries the inputs themselves, each completed with a value or
/// an error. An empty input resolves immediately. Cancel requested on the
/// output propagates to every input.
///
/// # Examples
///
/// ```rust
/// use conflux::{make_ready_future, when_all};
///
/// let futs = vec![make_ready_future(1), make_ready_future(2)];
/// let all = when_all(futs).get().unwrap();
/// let sum: i32 = all.into_iter().map(|f| f.get().unwrap()).sum();
/// assert_eq!(sum, 3);
/// ```
pub fn when_all<T: Send + 'static>(futures: Vec<Future<T>>) -> Future<Vec<Future<T>>> {
    if futures.is_empty() {
        return make_ready_future(Vec::new());
    }

    let output = Promise::new();
    let result = output.get_future();
    propagate_cancel(output.cancellation_token(), &futures);

    let states: Vec<_> = futures.iter().map(Future::state_handle).collect();
    let shared = Arc::new(WhenAllShared {
        total: futures.len(),
        futures: Mutex::new(Some(futures)),
        completed: AtomicUsize::new(0),
        output,
    });
    for state in states {
        let shared = shared.clone();
        state.add_continuation(Box::new(move || {
            if shared.completed.fetch_add(1, Ordering::SeqCst) + 1 == shared.total {
                let futures = shared
                    .futures
                    .lock()
                    .take()
                    .expect("when_all resolved twice");
                shared.output.set_value(futures);
            }
        }));
    }
    result
}

struct WhenAnyShared<T: Send + 'static> {
    futures: Mutex<Option<Vec<Future<T>>>>,
    tokens: Vec<CancellationToken>,
    resolved: AtomicBool,
    auto_cancel: bool,
    output: Promise<WhenAnyResult<T>>,
}

/// Resolves at the first input future that becomes ready.
///
/// The output carries the winning index and all input futures; the others
/// may still be pending. An empty input resolves immediately with
/// `index = None`. Cancel requested on the output propagates to every
/// input, and [`WhenAnyOptions::AutoCancel`] additionally cancels the
/// losers as soon as a winner is known.
pub fn when_any<T: Send + 'static>(
    futures: Vec<Future<T>>,
    options: WhenAnyOptions,
) -> Future<WhenAnyResult<T>> {
    if futures.is_empty() {
        return make_ready_future(WhenAnyResult {
            index: None,
            futures: Vec::new(),
        });
    }

    let output = Promise::new();
    let result = output.get_future();
    propagate_cancel(output.cancellation_token(), &futures);

    let states: Vec<_> = futures.iter().map(Future::state_handle).collect();
    let tokens: Vec<_> = futures
        .iter()
        .map(|f| f.cancellation_token().clone())
        .collect();
    let shared = Arc::new(WhenAnyShared {
        futures: Mutex::new(Some(futures)),
        tokens,
        resolved: AtomicBool::new(false),
        auto_cancel: options == WhenAnyOptions::AutoCancel,
        output,
    });
    for (index, state) in states.into_iter().enumerate() {
        let shared = shared.clone();
        state.add_continuation(Box::new(move || {
            if shared.resolved.swap(true, Ordering::SeqCst) {
                return;
            }
            if shared.auto_cancel {
                for (sibling, token) in shared.tokens.iter().enumerate() {
                    if sibling != index {
                        token.request_cancel();
                    }
                }
            }
            let futures = shared
                .futures
                .lock()
                .take()
                .expect("when_any resolved twice");
            shared.output.set_value(WhenAnyResult {
                index: Some(index),
                futures,
            });
        }));
    }
    result
}

fn propagate_cancel<T: Send + 'static>(output: &CancellationToken, inputs: &[Future<T>]) {
    let tokens: Vec<_> = inputs
        .iter()
        .map(|f| f.cancellation_token().clone())
        .collect();
    output.push_cancellation_callback(move || {
        for token in &tokens {
            token.request_cancel();
        }
    });
}
