//! Testing utilities for novelflow.
//!
//! This module provides:
//! - [`ScriptedCompletion`], a closure-driven completion function
//! - Canned model responses
//! - Assertions over tasks and batch snapshots

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{assert_batch_counts, assert_task_failed_at, assert_task_succeeded};
pub use fixtures::{chapter_text, outline_json, params_map, settings_json};
pub use mocks::{novel_response, ScriptedCompletion};
