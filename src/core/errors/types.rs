//! Error type definitions for the augmentation pipeline.

use thiserror::Error;

use crate::core::config::ConfigError;
use crate::core::traits::{DeviceError, GraphError, LoaderError};

/// Stage of an iteration in which a recoverable failure occurred.
///
/// Iteration failures abort only the current `run()` or copy call; the
/// pipeline stays verified and can be driven again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationStage {
    /// A loader module could not supply its next batch.
    Load,
    /// The augmentation graph failed while executing.
    Process,
    /// A transfer-device operation (copy, dispatch, read-back) failed.
    Device,
    /// The output tensor conversion failed.
    Convert,
}

impl std::fmt::Display for IterationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IterationStage::Load => write!(f, "load"),
            IterationStage::Process => write!(f, "graph processing"),
            IterationStage::Device => write!(f, "device transfer"),
            IterationStage::Convert => write!(f, "tensor conversion"),
        }
    }
}

/// Coarse error taxonomy used by callers to decide what to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Context or device initialisation failed; the pipeline is unusable.
    Construction,
    /// The pipeline was wired incorrectly; it has been released.
    Configuration,
    /// One iteration failed; the pipeline is still verified and reusable.
    Iteration,
    /// The caller violated the lifecycle contract.
    Usage,
}

/// Errors surfaced by the pipeline orchestrator.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Context, device or backend initialisation failed.
    #[error("construction failed: {context}")]
    Construction {
        /// What was being initialised.
        context: String,
        /// The underlying failure, when one exists.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The pipeline configuration or wiring is invalid.
    #[error("configuration: {message}")]
    ConfigError {
        /// A message describing the configuration problem.
        message: String,
    },

    /// A single iteration failed.
    #[error("{stage} failed: {context}")]
    Iteration {
        /// Where in the iteration the failure happened.
        stage: IterationStage,
        /// Additional context about the failure.
        context: String,
        /// The underlying error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The lifecycle contract was violated by the caller.
    #[error("usage: {message}")]
    Usage {
        /// A message describing the misuse.
        message: String,
    },

    /// A caller-provided buffer cannot hold the requested output.
    #[error("buffer too small: expected at least {expected} elements, got {actual}")]
    BufferTooSmall {
        /// Required number of elements.
        expected: usize,
        /// Number of elements provided.
        actual: usize,
    },

    /// The requested combination of parameters is not supported.
    #[error("unsupported: {message}")]
    Unsupported {
        /// A message naming the unsupported configuration.
        message: String,
    },

    /// The operation has no implementation for this residency model.
    #[error("not implemented: {operation}")]
    NotImplemented {
        /// The operation that was requested.
        operation: String,
    },

    /// Error from ndarray shape construction.
    #[error("tensor operation")]
    Tensor(#[from] ndarray::ShapeError),
}

impl PipelineError {
    /// Maps the error onto the coarse taxonomy.
    pub fn category(&self) -> ErrorCategory {
        match self {
            PipelineError::Construction { .. } => ErrorCategory::Construction,
            PipelineError::ConfigError { .. } => ErrorCategory::Configuration,
            PipelineError::Usage { .. } => ErrorCategory::Usage,
            PipelineError::Iteration { .. }
            | PipelineError::BufferTooSmall { .. }
            | PipelineError::Unsupported { .. }
            | PipelineError::NotImplemented { .. }
            | PipelineError::Tensor(_) => ErrorCategory::Iteration,
        }
    }

    /// Returns `true` when the pipeline object can no longer be driven.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Construction | ErrorCategory::Configuration
        )
    }
}

impl From<ConfigError> for PipelineError {
    fn from(error: ConfigError) -> Self {
        Self::ConfigError {
            message: error.to_string(),
        }
    }
}

impl From<LoaderError> for PipelineError {
    fn from(error: LoaderError) -> Self {
        Self::iteration(IterationStage::Load, "loader module failed", error)
    }
}

impl From<GraphError> for PipelineError {
    fn from(error: GraphError) -> Self {
        Self::iteration(IterationStage::Process, "augmentation graph failed", error)
    }
}

impl From<DeviceError> for PipelineError {
    fn from(error: DeviceError) -> Self {
        Self::iteration(IterationStage::Device, "transfer device call failed", error)
    }
}
