//! Configuration error types and validation traits.

use thiserror::Error;

/// Errors that can occur during configuration validation or loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Error indicating that a batch size is invalid (must be greater than 0).
    #[error("batch size must be greater than 0")]
    InvalidBatchSize,

    /// Error indicating that a configuration is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Error indicating that a resource limit has been exceeded.
    #[error("resource limit exceeded: {message}")]
    ResourceLimitExceeded { message: String },

    /// The configuration file could not be read.
    #[error("failed to read configuration file")]
    Io(#[from] std::io::Error),

    /// The configuration document is not valid JSON for this type.
    #[error("failed to parse configuration")]
    Parse(#[from] serde_json::Error),
}

/// A trait for validating configuration parameters.
///
/// Implementors provide [`validate`](ConfigValidator::validate) and
/// [`get_defaults`](ConfigValidator::get_defaults); the remaining methods are
/// reusable checks.
pub trait ConfigValidator {
    /// Validates the configuration.
    ///
    /// # Returns
    ///
    /// A Result indicating success or a ConfigError if validation fails.
    fn validate(&self) -> Result<(), ConfigError>;

    /// Returns the default configuration.
    fn get_defaults() -> Self
    where
        Self: Sized;

    /// Validates a batch size.
    ///
    /// # Arguments
    ///
    /// * `batch_size` - The batch size to validate.
    fn validate_batch_size(&self, batch_size: usize) -> Result<(), ConfigError> {
        if batch_size == 0 {
            Err(ConfigError::InvalidBatchSize)
        } else {
            Ok(())
        }
    }

    /// Validates thread count.
    ///
    /// This method checks that the thread count is non-zero and reasonable.
    ///
    /// # Arguments
    ///
    /// * `thread_count` - The thread count to validate.
    fn validate_thread_count(&self, thread_count: usize) -> Result<(), ConfigError> {
        const MAX_REASONABLE_THREADS: usize = 256;

        if thread_count == 0 {
            Err(ConfigError::InvalidConfig {
                message: "Thread count must be greater than 0".to_string(),
            })
        } else if thread_count > MAX_REASONABLE_THREADS {
            Err(ConfigError::ResourceLimitExceeded {
                message: format!(
                    "Thread count {thread_count} exceeds reasonable maximum of {MAX_REASONABLE_THREADS}"
                ),
            })
        } else {
            Ok(())
        }
    }
}
