use conflux::{make_ready_future, when_all, when_any, Future, Promise, WhenAnyOptions};

#[test]
fn test_when_all_waits_for_every_input() {
    const COUNT: usize = 100;
    let promises: Vec<Promise<()>> = (0..COUNT).map(|_| Promise::new()).collect();
    let futures: Vec<Future<()>> = promises.iter().map(|p| p.get_future()).collect();

    for (i, promise) in promises.iter().enumerate() {
        if i % 2 == 1 {
            promise.set_value(());
        }
    }

    let all = when_all(futures);
    assert!(!all.is_ready());

    for (i, promise) in promises.iter().enumerate() {
        if i % 2 == 0 {
            promise.set_value(());
        }
    }

    assert!(all.is_ready());
    let completed = all.get().unwrap();
    assert_eq!(completed.len(), COUNT);
    for fut in completed {
        assert!(fut.is_ready());
        assert!(fut.has_value());
    }
}

#[test]
fn test_when_all_empty_input_is_ready() {
    let all = when_all(Vec::<Future<u32>>::new());
    assert!(all.is_ready());
    assert!(all.get().unwrap().is_empty());
}

#[test]
fn test_when_all_collects_errors_too() {
    let ok = Promise::<u32>::new();
    let bad = Promise::<u32>::new();
    let all = when_all(vec![ok.get_future(), bad.get_future()]);
    ok.set_value(1);
    bad.set_error(conflux::Error::Canceled);
    let completed = all.get().unwrap();
    assert!(completed[0].has_value());
    assert!(completed[1].has_error());
}

#[test]
fn test_when_all_cancel_propagates_to_every_input() {
    const COUNT: usize = 100;
    let promises: Vec<Promise<()>> = (0..COUNT).map(|_| Promise::new()).collect();
    let futures: Vec<Future<()>> = promises.iter().map(|p| p.get_future()).collect();

    let all = when_all(futures);
    all.request_cancel();

    for promise in &promises {
        assert!(promise.cancellation_token().is_cancel_requested());
    }
    for promise in &promises {
        promise.set_value(());
    }
    all.get().unwrap();
}

#[test]
fn test_when_any_empty_input_is_ready_with_sentinel() {
    let any = when_any(Vec::<Future<u32>>::new(), WhenAnyOptions::None);
    assert!(any.is_ready());
    let result = any.get().unwrap();
    assert_eq!(result.index, None);
    assert!(result.futures.is_empty());
}

#[test]
fn test_when_any_resolves_at_first_completion() {
    let first = Promise::<u32>::new();
    let second = Promise::<u32>::new();
    let any = when_any(
        vec![first.get_future(), second.get_future()],
        WhenAnyOptions::None,
    );
    assert!(!any.is_ready());

    second.set_value(20);
    let result = any.get().unwrap();
    assert_eq!(result.index, Some(1));
    assert_eq!(result.futures.len(), 2);
    assert!(!result.futures[0].is_ready());
    assert!(result.futures[1].has_value());
    // siblings stay cancelable by their owner
    assert!(!first.cancellation_token().is_cancel_requested());
}

#[test]
fn test_when_any_auto_cancel_cancels_siblings() {
    let promises: Vec<Promise<u32>> = (0..3).map(|_| Promise::new()).collect();
    let futures: Vec<Future<u32>> = promises.iter().map(|p| p.get_future()).collect();
    let any = when_any(futures, WhenAnyOptions::AutoCancel);

    promises[1].set_value(5);
    let result = any.get().unwrap();
    assert_eq!(result.index, Some(1));

    // siblings got their cancel requested but may still be running
    assert!(promises[0].cancellation_token().is_cancel_requested());
    assert!(promises[2].cancellation_token().is_cancel_requested());
    assert!(!result.futures[0].is_ready());
    assert!(!result.futures[2].is_ready());
}

#[test]
fn test_when_any_cancel_propagates_to_every_input() {
    let promises: Vec<Promise<u32>> = (0..3).map(|_| Promise::new()).collect();
    let futures: Vec<Future<u32>> = promises.iter().map(|p| p.get_future()).collect();
    let any = when_any(futures, WhenAnyOptions::None);
    any.request_cancel();
    for promise in &promises {
        assert!(promise.cancellation_token().is_cancel_requested());
    }
}

#[test]
fn test_when_all_of_ready_futures_is_ready() {
    let all = when_all(vec![make_ready_future(1), make_ready_future(2)]);
    assert!(all.is_ready());
    let sum: u32 = all
        .get()
        .unwrap()
        .into_iter()
        .map(|f| f.get().unwrap())
        .sum();
    assert_eq!(sum, 3);
}
