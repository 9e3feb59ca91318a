//! Error constructor utilities for the pipeline.
//!
//! These helpers keep call sites short and make sure every error carries a
//! context string and, where one exists, its source.

use super::types::{IterationStage, PipelineError};

impl PipelineError {
    /// Creates a construction error that wraps an underlying failure.
    ///
    /// # Arguments
    ///
    /// * `context` - What was being initialised.
    /// * `error` - The underlying error that caused this error.
    pub fn construction(
        context: impl Into<String>,
        error: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Construction {
            context: context.into(),
            source: Some(Box::new(error)),
        }
    }

    /// Creates a construction error without an underlying cause.
    pub fn construction_message(context: impl Into<String>) -> Self {
        Self::Construction {
            context: context.into(),
            source: None,
        }
    }

    /// Creates a configuration error.
    ///
    /// # Arguments
    ///
    /// * `message` - A message describing the configuration error.
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    /// Creates an iteration error for the given stage.
    ///
    /// # Arguments
    ///
    /// * `stage` - The stage of the iteration where the error occurred.
    /// * `context` - Additional context about the error.
    /// * `error` - The underlying error that caused this error.
    pub fn iteration(
        stage: IterationStage,
        context: impl Into<String>,
        error: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Iteration {
            stage,
            context: context.into(),
            source: Box::new(error),
        }
    }

    /// Creates a lifecycle misuse error.
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
        }
    }

    /// Creates an unsupported-configuration error.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }

    /// Creates a not-implemented error for the named operation.
    pub fn not_implemented(operation: impl Into<String>) -> Self {
        Self::NotImplemented {
            operation: operation.into(),
        }
    }

    /// Checks that a destination buffer can hold `expected` elements.
    ///
    /// # Errors
    ///
    /// Returns `BufferTooSmall` when `actual < expected`.
    pub fn check_buffer(expected: usize, actual: usize) -> Result<(), Self> {
        if actual < expected {
            Err(Self::BufferTooSmall { expected, actual })
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::ErrorCategory;
    use crate::core::traits::LoaderError;

    #[test]
    fn test_loader_error_maps_to_iteration() {
        let error: PipelineError = LoaderError::Exhausted.into();
        assert_eq!(error.category(), ErrorCategory::Iteration);
        assert!(!error.is_fatal());
        assert!(matches!(
            error,
            PipelineError::Iteration {
                stage: IterationStage::Load,
                ..
            }
        ));
    }

    #[test]
    fn test_fatal_categories() {
        assert!(PipelineError::config_error("no outputs configured").is_fatal());
        assert!(PipelineError::construction_message("device init").is_fatal());
        assert!(!PipelineError::usage("run before build").is_fatal());
    }

    #[test]
    fn test_check_buffer() {
        assert!(PipelineError::check_buffer(16, 16).is_ok());
        let err = PipelineError::check_buffer(16, 8).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::BufferTooSmall {
                expected: 16,
                actual: 8
            }
        ));
    }
}
