//! Configuration management for the augmentation pipeline.
//!
//! This module provides the pipeline configuration type, its validation
//! trait, and JSON loading.

pub mod errors;
pub mod pipeline;

pub use errors::{ConfigError, ConfigValidator};
pub use pipeline::{Affinity, MAX_AFFINITY_ID, PipelineConfig};
