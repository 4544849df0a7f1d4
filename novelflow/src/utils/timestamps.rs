//! Timestamp helpers.

use chrono::{DateTime, Utc};

/// UTC timestamp used on tasks and batches.
pub type Timestamp = DateTime<Utc>;

/// Returns the current UTC timestamp.
#[must_use]
pub fn now_utc() -> Timestamp {
    Utc::now()
}
