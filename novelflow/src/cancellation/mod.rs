//! Cooperative cancellation.
//!
//! A batch owns a root [`CancellationToken`]; every task gets a child token and
//! every fan-out inherits its task's token. Cancellation is checked at stage
//! boundaries and before each pool dispatch.

mod token;

pub use token::{CancelCallback, CancellationToken};
