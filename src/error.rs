//! Error types shared by every future in the crate.

use std::any::Any;
use std::sync::Arc;

use thiserror::Error;

/// Terminal error of a future.
///
/// A future always resolves to `Result<T, Error>`: either the value produced
/// by its task, or one of these errors stored in the slot. Errors are cheap
/// to clone so that a [`SharedFuture`](crate::future::SharedFuture) can hand
/// the same terminal error to every reader.
///
/// # Examples
///
/// ```rust
/// use conflux::{make_exceptional_future, Error};
///
/// let fut = make_exceptional_future::<u32>(Error::Canceled);
/// assert!(fut.get().unwrap_err().is_canceled());
/// ```
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Every writer of the state was dropped before a value was set.
    #[error("promise is broken")]
    BrokenPromise,
    /// The operation observed a cancellation request.
    #[error("operation was canceled")]
    Canceled,
    /// A packaged task or continuation panicked; the payload is captured here.
    #[error("task panicked: {0}")]
    Panicked(Arc<str>),
    /// A failure installed through [`Promise::set_error`](crate::promise::Promise::set_error)
    /// or [`make_exceptional_future`](crate::future::make_exceptional_future).
    #[error("{0}")]
    Failed(Arc<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Wraps an arbitrary error value.
    pub fn failed<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Failed(Arc::new(err))
    }

    /// True for [`Error::Canceled`].
    pub fn is_canceled(&self) -> bool {
        matches!(self, Error::Canceled)
    }

    /// True for [`Error::BrokenPromise`].
    pub fn is_broken_promise(&self) -> bool {
        matches!(self, Error::BrokenPromise)
    }

    /// True for [`Error::Panicked`].
    pub fn is_panic(&self) -> bool {
        matches!(self, Error::Panicked(_))
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic payload of unknown type".to_string()
        };
        Error::Panicked(Arc::from(message.as_str()))
    }
}

/// Result type used throughout the crate.
///
/// Every future resolves to a `Result<T>`; blocking and awaiting accessors
/// hand it back as-is instead of unwinding.
pub type Result<T> = std::result::Result<T, Error>;
