//! Utility functions for ids, timestamps and text previews.

mod text;
mod timestamps;

pub use text::bounded_preview;
pub use timestamps::{now_utc, Timestamp};

use uuid::Uuid;

/// Generates a new random (v4) id.
#[must_use]
pub fn generate_id() -> Uuid {
    Uuid::new_v4()
}
