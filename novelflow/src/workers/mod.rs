//! Bounded parallelism shared by both nesting levels.

mod pool;

pub use pool::{UnitOutcome, WorkerPool};
