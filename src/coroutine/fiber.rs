//! Driver/fiber handshake.
//!
//! A fiber is a dedicated OS thread that runs coroutine code; a driver is
//! whichever executor thread currently resumes it. The two alternate
//! through a small state machine: the driver blocks while the fiber runs,
//! and the fiber blocks while suspended, so at any moment exactly one of
//! them makes progress — the scheduling semantics of a context-switching
//! fiber, with real stacks.

use parking_lot::{Condvar, Mutex};

/// What a resume observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FiberEvent {
    /// The fiber suspended again; its post-suspend hook has run.
    Suspended,
    /// The fiber ran to completion.
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Fiber thread exists but has not been resumed yet.
    Parked,
    /// Fiber owns the timeslice; `abort` tells it to unwind.
    Running { abort: bool },
    /// Fiber is waiting for the next resume.
    Suspended,
    /// Fiber ran to completion.
    Finished,
}

type Hook = Box<dyn FnOnce() + Send>;

pub(crate) struct Fiber {
    phase: Mutex<Phase>,
    turnstile: Condvar,
    /// Runs on the driver's stack after a suspension is observable and
    /// before the resume call returns.
    post_suspend: Mutex<Option<Hook>>,
}

impl Fiber {
    pub(crate) fn new() -> Self {
        Fiber {
            phase: Mutex::new(Phase::Parked),
            turnstile: Condvar::new(),
            post_suspend: Mutex::new(None),
        }
    }

    /// Fiber side: blocks until the first resume. Returns the abort flag.
    pub(crate) fn first_wait(&self) -> bool {
        let mut phase = self.phase.lock();
        loop {
            if let Phase::Running { abort } = *phase {
                return abort;
            }
            self.turnstile.wait(&mut phase);
        }
    }

    /// Fiber side: parks the fiber and hands the timeslice back to the
    /// driver. Returns the abort flag of the resume that woke it.
    pub(crate) fn suspend(&self, hook: Hook) -> bool {
        *self.post_suspend.lock() = Some(hook);
        let mut phase = self.phase.lock();
        *phase = Phase::Suspended;
        self.turnstile.notify_all();
        loop {
            if let Phase::Running { abort } = *phase {
                return abort;
            }
            self.turnstile.wait(&mut phase);
        }
    }

    /// Fiber side: marks the fiber complete and releases the driver.
    pub(crate) fn finish(&self) {
        *self.phase.lock() = Phase::Finished;
        self.turnstile.notify_all();
    }

    /// Driver side: hands the timeslice to the fiber and blocks until it
    /// suspends or finishes. Concurrent drivers serialize here.
    pub(crate) fn resume(&self, abort: bool) -> FiberEvent {
        let mut phase = self.phase.lock();
        while matches!(*phase, Phase::Running { .. }) {
            self.turnstile.wait(&mut phase);
        }
        if *phase == Phase::Finished {
            return FiberEvent::Finished;
        }
        *phase = Phase::Running { abort };
        self.turnstile.notify_all();
        while matches!(*phase, Phase::Running { .. }) {
            self.turnstile.wait(&mut phase);
        }
        let finished = *phase == Phase::Finished;
        drop(phase);
        if let Some(hook) = self.post_suspend.lock().take() {
            hook();
        }
        if finished {
            FiberEvent::Finished
        } else {
            FiberEvent::Suspended
        }
    }
}
