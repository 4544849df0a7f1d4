//! Stage definitions and the stage runner.
//!
//! Each model-calling stage is a [`StageDefinition`]: a prompt builder over
//! upstream artifacts plus a schema validator. [`StageRunner`] executes one
//! attempt of a definition. Assembly makes no call and is a plain function.

mod assembly;
mod chapter;
mod definition;
mod outline;
mod runner;
mod settings;

pub use assembly::assemble;
pub use chapter::ChapterStage;
pub use definition::{ResponseFormat, StageDefinition, StageInputs, StageResponse};
pub use outline::OutlineStage;
pub use runner::StageRunner;
pub use settings::SettingsStage;
