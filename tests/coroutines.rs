use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use parking_lot::Mutex;

use conflux::{
    async_resumable_on, make_ready_future, spawn_on, Error, Promise, ThreadPool,
};

fn test_pool(name: &str) -> ThreadPool {
    let pool = ThreadPool::new(name);
    pool.start(1);
    pool
}

#[test]
fn test_coroutine_returns_value() {
    let pool = test_pool("coro-return");
    let fut = async_resumable_on("answer", pool.clone(), |_awaiter| Ok(42));
    assert_eq!(fut.get().unwrap(), 42);
    pool.stop();
}

#[test]
fn test_coroutine_error_propagates() {
    let pool = test_pool("coro-error");
    let fut = async_resumable_on("failing", pool.clone(), |_awaiter| -> conflux::Result<u32> {
        Err(Error::failed(std::io::Error::new(
            std::io::ErrorKind::Other,
            "backend down",
        )))
    });
    let err = fut.get().unwrap_err();
    assert!(err.to_string().contains("backend down"));
    pool.stop();
}

#[test]
fn test_coroutine_panic_resolves_with_panic_error() {
    let pool = test_pool("coro-panic");
    let fut = async_resumable_on("panicking", pool.clone(), |_awaiter| -> conflux::Result<u32> {
        panic!("coroutine body blew up")
    });
    let err = fut.get().unwrap_err();
    assert!(err.is_panic());
    pool.stop();
}

#[test]
fn test_coroutine_awaits_ready_future_without_suspending() {
    let pool = test_pool("coro-ready");
    let fut = async_resumable_on("ready", pool.clone(), |awaiter| {
        let value = awaiter.await_future(make_ready_future(40))?;
        Ok(value + 2)
    });
    assert_eq!(fut.get().unwrap(), 42);
    pool.stop();
}

#[test]
fn test_coroutine_awaits_pending_future() {
    let pool = test_pool("coro-pending");
    let promise = Promise::<u32>::new();
    let awaited = promise.get_future();
    let fut = async_resumable_on("pending", pool.clone(), move |awaiter| {
        let value = awaiter.await_future(awaited)?;
        Ok(value * 2)
    });
    promise.set_value(21);
    assert_eq!(fut.get().unwrap(), 42);
    pool.stop();
}

#[test]
fn test_coroutine_awaits_move_only_value() {
    let pool = test_pool("coro-move-only");
    let promise = Promise::<Box<u32>>::new();
    let awaited = promise.get_future();
    let fut = async_resumable_on("move-only", pool.clone(), move |awaiter| {
        let boxed = awaiter.await_future(awaited)?;
        Ok(*boxed)
    });
    promise.set_value(Box::new(42));
    assert_eq!(fut.get().unwrap(), 42);
    pool.stop();
}

#[test]
fn test_coroutine_awaited_error_propagates() {
    let pool = test_pool("coro-await-error");
    let promise = Promise::<u32>::new();
    let awaited = promise.get_future();
    let fut = async_resumable_on("await-error", pool.clone(), move |awaiter| {
        let value = awaiter.await_future(awaited)?;
        Ok(value)
    });
    promise.set_error(Error::BrokenPromise);
    assert!(fut.get().unwrap_err().is_broken_promise());
    pool.stop();
}

#[test]
fn test_nested_coroutines() {
    let pool = test_pool("coro-nested");
    let inner_pool = pool.clone();
    let fut = async_resumable_on("outer", pool.clone(), move |awaiter| {
        let inner = async_resumable_on("inner", inner_pool, |awaiter| {
            let v = awaiter.await_future(make_ready_future(20))?;
            Ok(v + 1)
        });
        let inner_value = awaiter.await_future(inner)?;
        Ok(inner_value * 2)
    });
    assert_eq!(fut.get().unwrap(), 42);
    pool.stop();
}

#[test]
fn test_coroutine_cancel_before_it_runs() {
    let pool = test_pool("coro-cancel-early");
    let body_ran = Arc::new(AtomicBool::new(false));

    // Park the worker so the setup task stays queued.
    let (gate_tx, gate_rx) = mpsc::channel::<()>();
    pool.post(move || {
        let _ = gate_rx.recv();
    });

    let ran = body_ran.clone();
    let fut = async_resumable_on("never-runs", pool.clone(), move |_awaiter| {
        ran.store(true, Ordering::SeqCst);
        Ok(42)
    });
    fut.request_cancel();
    // eager cancellation: the future resolves from the canceling thread
    assert!(fut.is_ready());

    gate_tx.send(()).unwrap();
    assert!(fut.get().unwrap_err().is_canceled());
    assert!(!body_ran.load(Ordering::SeqCst));
    pool.stop();
}

#[test]
fn test_coroutine_cancel_while_suspended() {
    let pool = test_pool("coro-cancel-suspended");
    let entered = Promise::<()>::new();
    let entered_fut = entered.get_future();
    let never_ready = Promise::<u32>::new();
    let never_token = never_ready.cancellation_token().clone();

    let awaited = never_ready.get_future();
    let fut = async_resumable_on("suspended", pool.clone(), move |awaiter| {
        entered.set_value(());
        let value = awaiter.await_future(awaited)?;
        Ok(value)
    });

    entered_fut.wait();
    fut.request_cancel();
    assert!(fut.wait_for(Duration::from_secs(5)));
    // the awaited operation's token observed the cancel
    assert!(never_token.is_cancel_requested());
    assert!(fut.get().unwrap_err().is_canceled());
    pool.stop();
}

#[test]
fn test_coroutine_cancel_fires_awaited_operations_canceler() {
    let pool = test_pool("coro-cancel-prop");
    let called = Arc::new(AtomicUsize::new(0));
    let promise = Promise::<()>::new();
    let seen = called.clone();
    promise
        .cancellation_token()
        .push_cancellation_callback(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });

    let entered = Promise::<()>::new();
    let entered_fut = entered.get_future();
    let awaited = promise.get_future();
    let fut = async_resumable_on("cancel-prop", pool.clone(), move |awaiter| {
        entered.set_value(());
        awaiter.await_future(awaited)?;
        Ok(42)
    });

    entered_fut.wait();
    fut.request_cancel();
    assert!(fut.wait_for(Duration::from_secs(5)));
    assert!(promise.cancellation_token().is_cancel_requested());
    assert_eq!(called.load(Ordering::SeqCst), 1);
    promise.set_value(());
    assert!(fut.get().unwrap_err().is_canceled());
    pool.stop();
}

#[test]
fn test_yield_reschedules_behind_queued_work() {
    let pool = test_pool("coro-yield");
    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let gate = Promise::<()>::new();
    let gate_fut = gate.get_future();

    let coroutine_order = order.clone();
    let fut = async_resumable_on("yielding", pool.clone(), move |awaiter| {
        coroutine_order.lock().push("before yield");
        // block the fiber (and its driver) until the observer is queued
        gate_fut.wait();
        awaiter.yield_now()?;
        coroutine_order.lock().push("after yield");
        Ok(())
    });

    let observer_order = order.clone();
    let observer = spawn_on(pool.clone(), move || {
        observer_order.lock().push("observer");
    });
    gate.set_value(());

    observer.get().unwrap();
    fut.get().unwrap();
    assert_eq!(
        *order.lock(),
        vec!["before yield", "observer", "after yield"]
    );
    pool.stop();
}

#[test]
fn test_yield_is_a_cancellation_point() {
    let pool = test_pool("coro-yield-cancel");
    let progress = Arc::new(AtomicUsize::new(0));
    let entered = Promise::<()>::new();
    let entered_fut = entered.get_future();
    let gate = Promise::<()>::new();
    let gate_fut = gate.get_future();

    let seen = progress.clone();
    let fut = async_resumable_on("yield-cancel", pool.clone(), move |awaiter| {
        seen.fetch_add(1, Ordering::SeqCst);
        entered.set_value(());
        gate_fut.wait();
        awaiter.yield_now()?;
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    entered_fut.wait();
    fut.request_cancel();
    gate.set_value(());
    assert!(fut.get().unwrap_err().is_canceled());
    assert_eq!(progress.load(Ordering::SeqCst), 1);
    pool.stop();
}
