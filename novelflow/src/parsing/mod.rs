//! Recovery of structured data from unreliable model output.
//!
//! This module provides:
//! - [`StructuredResponseParser`]: candidate extraction plus ordered repair passes
//! - [`BracketBalanceRepairer`]: closes truncated structures
//! - Cleanup and lenient normalization helpers used by the parser

pub mod cleanup;
mod parser;
mod repair;

pub use parser::{ParseOutcome, RepairPass, StructuredResponseParser, DEFAULT_PREVIEW_LIMIT};
pub use repair::{BracketBalanceRepairer, Repair, RepairStrategy};
