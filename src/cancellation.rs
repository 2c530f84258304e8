//! Cooperative cancellation tokens.
//!
//! A [`CancellationToken`] carries a sticky "cancel requested" flag and a
//! LIFO stack of cancel callbacks. At any moment at most one callback is
//! *armed*: the top of the stack, or the stack-bottom "last" callback while
//! the stack is empty. Requesting cancellation invokes the armed callback
//! outside the token's lock, so the callback may freely call back into the
//! token (the timer's callback pops itself, for example).
//!
//! Nesting is the point of the stack discipline: while a coroutine is
//! suspended on an inner operation, the inner operation's canceler shadows
//! the coroutine's own, and popping restores the outer one — firing it
//! immediately if cancellation already happened in between.

use std::sync::Arc;

use parking_lot::Mutex;

type Callback = Arc<dyn Fn() + Send + Sync + 'static>;

#[derive(Default)]
struct TokenState {
    cancel_requested: bool,
    stack: Vec<Callback>,
    last: Option<Callback>,
}

impl TokenState {
    fn armed(&self) -> Option<Callback> {
        self.stack.last().cloned().or_else(|| self.last.clone())
    }
}

/// Cooperative cancel signal shared along a future chain.
///
/// Cloning is cheap and every clone observes the same flag and callback
/// stack. Tokens are created by promises and packaged tasks and flow to
/// every continuation derived from them, unless
/// [`Future::break_cancellation_chain`](crate::future::Future::break_cancellation_chain)
/// cuts the link.
///
/// # Examples
///
/// ```rust
/// use conflux::CancellationToken;
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use std::sync::Arc;
///
/// let token = CancellationToken::new();
/// let hit = Arc::new(AtomicBool::new(false));
/// let hit2 = hit.clone();
/// token.push_cancellation_callback(move || hit2.store(true, Ordering::SeqCst));
/// token.request_cancel();
/// assert!(token.is_cancel_requested());
/// assert!(hit.load(Ordering::SeqCst));
/// ```
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Mutex<TokenState>>,
}

impl CancellationToken {
    /// Creates a fresh, un-canceled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// True once [`request_cancel`](Self::request_cancel) has been called on
    /// any clone of this token.
    pub fn is_cancel_requested(&self) -> bool {
        self.inner.lock().cancel_requested
    }

    /// Requests cancellation.
    ///
    /// Idempotent: the first call sets the flag and fires the armed callback
    /// (if any); later calls do nothing.
    pub fn request_cancel(&self) {
        let armed = {
            let mut state = self.inner.lock();
            if state.cancel_requested {
                return;
            }
            state.cancel_requested = true;
            state.armed()
        };
        if let Some(cb) = armed {
            cb();
        }
    }

    /// Pushes a cancel callback on top of the stack, shadowing whatever was
    /// armed before.
    ///
    /// If cancellation was already requested, the new callback fires
    /// synchronously before this call returns.
    pub fn push_cancellation_callback<F>(&self, cb: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let fire = {
            let mut state = self.inner.lock();
            let cb: Callback = Arc::new(cb);
            state.stack.push(cb.clone());
            state.cancel_requested.then_some(cb)
        };
        if let Some(cb) = fire {
            cb();
        }
    }

    /// Pops the top cancel callback.
    ///
    /// If cancellation was already requested, the newly exposed armed
    /// callback (the next stack entry, or the "last" callback when the stack
    /// becomes empty) fires synchronously. The popped callback's storage
    /// outlives any in-flight invocation of it, so a callback may pop itself.
    pub fn pop_cancellation_callback(&self) {
        let fire = {
            let mut state = self.inner.lock();
            let popped = state.stack.pop();
            debug_assert!(popped.is_some(), "popped an empty cancellation stack");
            state.cancel_requested.then(|| state.armed()).flatten()
        };
        if let Some(cb) = fire {
            cb();
        }
    }

    /// Installs the stack-bottom "last" callback.
    ///
    /// The last callback is armed only while the scoped stack is empty; it
    /// is how `unwrap` forwards cancellation to an inner future without
    /// shadowing the canceler of a currently suspended operation. Installing
    /// a second last callback replaces the first. If cancellation was
    /// already requested and the stack is empty, the callback fires
    /// synchronously.
    pub fn push_last_cancellation_callback<F>(&self, cb: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let fire = {
            let mut state = self.inner.lock();
            let cb: Callback = Arc::new(cb);
            state.last = Some(cb.clone());
            (state.cancel_requested && state.stack.is_empty()).then_some(cb)
        };
        if let Some(cb) = fire {
            cb();
        }
    }

    /// Pushes `cb` and returns a guard that pops it on drop.
    ///
    /// ```rust
    /// use conflux::CancellationToken;
    ///
    /// let token = CancellationToken::new();
    /// {
    ///     let _canceler = token.make_scope_canceler(|| { /* abort the inner step */ });
    ///     // the callback is armed here
    /// }
    /// // and popped again here
    /// token.request_cancel();
    /// ```
    #[must_use = "dropping the canceler immediately pops the callback again"]
    pub fn make_scope_canceler<F>(&self, cb: F) -> ScopeCanceler
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.push_cancellation_callback(cb);
        ScopeCanceler {
            token: Some(self.clone()),
        }
    }

    /// True when both handles refer to the same underlying token.
    pub fn ptr_eq(a: &CancellationToken, b: &CancellationToken) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("CancellationToken")
            .field("cancel_requested", &state.cancel_requested)
            .field("callbacks", &state.stack.len())
            .finish()
    }
}

/// RAII guard pairing a callback push with its pop.
///
/// Move-only; dropping it pops the callback (and, on an already-canceled
/// token, fires whatever becomes armed underneath).
pub struct ScopeCanceler {
    token: Option<CancellationToken>,
}

impl ScopeCanceler {
    /// A disarmed canceler that pops nothing on drop.
    pub fn empty() -> Self {
        ScopeCanceler { token: None }
    }
}

impl Drop for ScopeCanceler {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            token.pop_cancellation_callback();
        }
    }
}
