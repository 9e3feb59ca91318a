//! Error types for the augmentation pipeline.
//!
//! Errors follow a four-way taxonomy exposed through [`ErrorCategory`]:
//! construction and configuration errors leave the pipeline released,
//! iteration errors abort one call and leave it reusable, and usage errors
//! report lifecycle misuse by the caller.
//!
//! # Usage
//!
//! ```rust
//! use augment_pipeline::core::errors::{ErrorCategory, PipelineError};
//!
//! let error = PipelineError::config_error("no outputs configured");
//! assert_eq!(error.category(), ErrorCategory::Configuration);
//! ```

pub mod constructors;
pub mod types;

pub use types::{ErrorCategory, IterationStage, PipelineError};

/// Convenient result alias for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;
