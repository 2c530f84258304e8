use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_utils::thread as crossbeam_thread;
use serial_test::serial;

use conflux::{
    ready_future, spawn_on, ConcurrentQueue, FutureGroup, Job, Semaphore, TaskCanceler,
    ThreadPool,
};

#[test]
fn test_queue_handoff_across_threads() {
    let queue = Arc::new(ConcurrentQueue::new());

    // register consumers before any value exists
    let early: Vec<_> = (0..10).map(|_| queue.pop()).collect();

    crossbeam_thread::scope(|scope| {
        for worker in 0..4 {
            let queue = queue.clone();
            scope.spawn(move |_| {
                for i in 0..25 {
                    queue.push(worker * 25 + i);
                }
            });
        }
    })
    .unwrap();

    let late: Vec<_> = (0..90).map(|_| queue.pop()).collect();
    let mut values: Vec<u32> = early
        .into_iter()
        .chain(late)
        .map(|fut| fut.get().unwrap())
        .collect();
    values.sort_unstable();
    let expected: Vec<u32> = (0..100).collect();
    assert_eq!(values, expected);
    assert!(queue.is_empty());
}

#[test]
fn test_semaphore_bounds_concurrent_workers() {
    let pool = ThreadPool::new("sem-pool");
    pool.start(4);
    let semaphore = Semaphore::new(2);
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut pending = Vec::new();
    for _ in 0..20 {
        let semaphore = semaphore.clone();
        let active = active.clone();
        let peak = peak.clone();
        pending.push(spawn_on(pool.clone(), move || {
            let guard = semaphore.acquire_scoped().get().unwrap();
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(2));
            active.fetch_sub(1, Ordering::SeqCst);
            drop(guard);
        }));
    }
    for fut in pending {
        fut.get().unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(semaphore.count(), 2);
    pool.stop();
}

#[test]
fn test_future_group_cancels_timers_on_terminate() {
    let pool = ThreadPool::new("group-pool");
    pool.start(1);

    let group = FutureGroup::new();
    for _ in 0..5 {
        group.add(conflux::async_wait_on(&pool, Duration::from_secs(60)));
    }
    let done = group.terminate();
    // canceled timers resolve promptly, well before their deadline
    assert!(done.wait_for(Duration::from_secs(5)));
    done.get().unwrap();
    pool.stop();
}

#[test]
fn test_task_canceler_cancels_on_drop() {
    let pool = ThreadPool::new("canceler-pool");
    pool.start(1);

    let canceler = TaskCanceler::new();
    let fut = canceler.run(|| conflux::async_wait_on(&pool, Duration::from_secs(60)));
    drop(canceler);
    assert!(fut.wait_for(Duration::from_secs(5)));
    assert!(fut.get().unwrap_err().is_canceled());
    pool.stop();
}

#[test]
#[serial]
fn test_job_coalesces_triggers() {
    let runs = Arc::new(AtomicUsize::new(0));
    let gate = Arc::new(ConcurrentQueue::<()>::new());

    let seen = runs.clone();
    let job_gate = gate.clone();
    let job = Job::new(move || {
        seen.fetch_add(1, Ordering::SeqCst);
        job_gate.pop().to_void()
    });

    let first = job.trigger();
    while runs.load(Ordering::SeqCst) == 0 {
        std::thread::yield_now();
    }
    // the run is executing: these coalesce into exactly one more run
    let second = job.trigger();
    let third = job.trigger();

    gate.push(());
    first.wait();
    gate.push(());
    second.wait();
    third.wait();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    drop(job);
}

#[test]
#[serial]
fn test_job_trigger_success_resolves_on_successful_run() {
    let runs = Arc::new(AtomicUsize::new(0));
    let seen = runs.clone();
    let job = Job::new(move || {
        seen.fetch_add(1, Ordering::SeqCst);
        ready_future()
    });
    let success = job.trigger_success();
    success.wait();
    assert!(runs.load(Ordering::SeqCst) >= 1);
    drop(job);
}
