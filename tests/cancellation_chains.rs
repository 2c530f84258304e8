use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use conflux::{
    get_synchronous_executor, make_ready_future, CancellationToken, Error, Future, Promise,
};

#[test]
fn test_cancel_on_ready_future_is_harmless() {
    let fut = make_ready_future(18);
    fut.request_cancel();
    assert!(fut.has_value());
    assert_eq!(fut.get().unwrap(), 18);
}

#[test]
fn test_cancel_on_tail_reaches_head_token() {
    let promise = Promise::<u32>::new();
    let tail = promise
        .get_future()
        .then_on(get_synchronous_executor(), |done| done.get().unwrap())
        .and_then_on(get_synchronous_executor(), |n| n + 1);
    tail.request_cancel();
    assert!(promise.cancellation_token().is_cancel_requested());
}

#[test]
fn test_promise_cancel_callback() {
    let called = Arc::new(AtomicUsize::new(0));
    let promise = Promise::<()>::new();
    let fut = promise.get_future();

    let seen = called.clone();
    promise
        .cancellation_token()
        .push_cancellation_callback(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });
    fut.request_cancel();
    assert_eq!(called.load(Ordering::SeqCst), 1);
    assert!(promise.cancellation_token().is_cancel_requested());
    assert!(!fut.is_ready());

    promise.set_error(Error::Canceled);
    assert!(fut.get().unwrap_err().is_canceled());
}

#[test]
fn test_scope_canceler_rearms_after_cancel() {
    let called = Arc::new(AtomicUsize::new(0));
    let promise = Promise::<()>::new();
    let fut = promise.get_future();
    let token = promise.cancellation_token().clone();

    {
        let seen = called.clone();
        let _scope = token.make_scope_canceler(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        fut.request_cancel();
        assert_eq!(called.load(Ordering::SeqCst), 1);
        assert!(token.is_cancel_requested());
    }

    fut.request_cancel();
    assert_eq!(called.load(Ordering::SeqCst), 1);

    {
        // pushing on an already-canceled token fires synchronously
        let seen = called.clone();
        let _scope = token.make_scope_canceler(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(called.load(Ordering::SeqCst), 2);
    }
}

#[test]
fn test_nested_scope_cancelers_cancel_inner() {
    let called = Arc::new(AtomicUsize::new(0));
    let token = CancellationToken::new();

    let outer_called = called.clone();
    let _outer = token.make_scope_canceler(move || {
        // fires only when it is the armed top again
        assert_eq!(outer_called.load(Ordering::SeqCst), 1);
    });
    {
        let seen = called.clone();
        let _inner = token.make_scope_canceler(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        token.request_cancel();
        assert_eq!(called.load(Ordering::SeqCst), 1);
    }
    // dropping the inner canceler on a canceled token fires the outer one,
    // which asserts above
}

#[test]
fn test_nested_scope_cancelers_cancel_outer() {
    let called = Arc::new(AtomicUsize::new(0));
    let token = CancellationToken::new();

    let seen = called.clone();
    let _outer = token.make_scope_canceler(move || {
        seen.fetch_add(1, Ordering::SeqCst);
    });
    {
        let _inner = token.make_scope_canceler(|| panic!("popped canceler must not fire"));
    }
    token.request_cancel();
    assert_eq!(called.load(Ordering::SeqCst), 1);
}

#[test]
fn test_promise_from_future_chains_cancellation() {
    let upstream = Promise::<()>::new();
    let fut = upstream.get_future();
    let downstream = Promise::<u32>::from_future(&fut);
    let fut2 = downstream.get_future();

    fut2.request_cancel();
    assert!(upstream.cancellation_token().is_cancel_requested());
}

#[test]
fn test_and_then_prevented_on_cancel() {
    let ran = Arc::new(AtomicBool::new(false));
    let promise = Promise::<u32>::new();
    let seen = ran.clone();
    let fut = promise
        .get_future()
        .and_then_on(get_synchronous_executor(), move |_| {
            seen.store(true, Ordering::SeqCst);
        });
    fut.request_cancel();
    promise.set_value(42);
    assert!(fut.get().unwrap_err().is_canceled());
    assert!(!ran.load(Ordering::SeqCst));
}

#[test]
fn test_then_still_runs_on_cancel() {
    let promise = Promise::<u32>::new();
    let fut = promise
        .get_future()
        .then_with_token_on(get_synchronous_executor(), |token, done| {
            (token.is_cancel_requested(), done.get().unwrap())
        });
    fut.request_cancel();
    promise.set_value(3);
    assert_eq!(fut.get().unwrap(), (true, 3));
}

#[test]
fn test_break_cancellation_chain_upstream_cancel_invisible_downstream() {
    let promise = Promise::<()>::new();
    let fut1 = promise.get_future();
    fut1.request_cancel();

    let called = Arc::new(AtomicUsize::new(0));
    let upstream_called = called.clone();
    let downstream_called = called.clone();
    let fut2 = fut1
        .then_with_token_on(get_synchronous_executor(), move |token, _| {
            upstream_called.fetch_add(1, Ordering::SeqCst);
            assert!(token.is_cancel_requested());
        })
        .break_cancellation_chain()
        .then_with_token_on(get_synchronous_executor(), move |token, _| {
            downstream_called.fetch_add(1, Ordering::SeqCst);
            assert!(!token.is_cancel_requested());
        });
    promise.set_value(());
    fut2.get().unwrap();
    assert_eq!(called.load(Ordering::SeqCst), 2);
}

#[test]
fn test_break_cancellation_chain_downstream_cancel_does_not_reach_upstream() {
    let promise = Promise::<()>::new();
    let called = Arc::new(AtomicUsize::new(0));
    let seen = called.clone();
    let fut2 = promise
        .get_future()
        .then_with_token_on(get_synchronous_executor(), move |token, _| {
            seen.fetch_add(1, Ordering::SeqCst);
            assert!(!token.is_cancel_requested());
        })
        .break_cancellation_chain();
    fut2.request_cancel();
    assert!(!promise.cancellation_token().is_cancel_requested());
    promise.set_value(());
    fut2.get().unwrap();
    assert_eq!(called.load(Ordering::SeqCst), 1);
}

#[test]
fn test_unwrap_propagates_cancel_to_upstream_and_inner() {
    let outer = Promise::<Future<i32>>::new();
    let flat = outer.get_future().unwrap();

    flat.request_cancel();
    assert!(outer.cancellation_token().is_cancel_requested());

    // delivering an inner future with a different token forwards the
    // already-requested cancel to it
    let inner = Promise::<i32>::new();
    outer.set_value(inner.get_future());
    assert!(inner.cancellation_token().is_cancel_requested());
}

#[test]
fn test_unwrap_forwards_late_cancel_to_inner() {
    let outer = Promise::<Future<i32>>::new();
    let flat = outer.get_future().unwrap();

    assert!(!outer.cancellation_token().is_cancel_requested());

    let inner = Promise::<i32>::new();
    outer.set_value(inner.get_future());
    flat.request_cancel();
    assert!(inner.cancellation_token().is_cancel_requested());
}

#[test]
fn test_canceled_value_surfaces_as_canceled_in_and_then() {
    let promise = Promise::<u32>::new();
    let fut = promise
        .get_future()
        .and_then_on(get_synchronous_executor(), |n| n);
    promise.cancellation_token().request_cancel();
    promise.set_value(1);
    assert!(fut.get().unwrap_err().is_canceled());
}
