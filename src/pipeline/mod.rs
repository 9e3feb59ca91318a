//! The augmentation pipeline module.
//!
//! This module provides the orchestrator that sequences loaders, the graph
//! engine and output tensor materialization, plus its timing helpers.

mod master;
pub mod stats;
#[cfg(test)]
pub(crate) mod test_support;

pub use master::{MasterPipeline, PipelineState};
pub use stats::{PipelineTiming, StageTimer};
