//! The step graph that drives create and edit runs.

mod engine;
mod state;
mod step;

pub use engine::{Pipeline, PipelineSettings, RunOutcome};
pub use state::RunState;
pub use step::{RunMode, Step};
