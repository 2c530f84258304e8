//! Internal machinery behind the future/promise surface.

pub(crate) mod state;

pub(crate) use state::{State, Ticket};
