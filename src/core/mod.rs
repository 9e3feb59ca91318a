//! The core module of the augmentation pipeline.
//!
//! This module contains the fundamental components shared by every layer:
//! - Configuration management
//! - Error handling
//! - Traits defining the external collaborators (loaders, graph engine, transfer device)

pub mod config;
pub mod errors;
pub mod traits;

pub use config::{Affinity, ConfigError, ConfigValidator, PipelineConfig};
pub use errors::{ErrorCategory, IterationStage, PipelineError, PipelineResult};
