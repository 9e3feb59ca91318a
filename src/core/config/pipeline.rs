//! Top-level pipeline configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::errors::{ConfigError, ConfigValidator};
use crate::domain::MemType;

/// Highest accelerator/CPU id accepted by the affinity mapping.
pub const MAX_AFFINITY_ID: usize = 9;

/// Where graph execution and buffers live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Affinity {
    /// Execute on the host; all buffers are host-resident.
    #[default]
    Cpu,
    /// Execute on an accelerator; buffers are device-resident.
    Gpu,
}

impl Affinity {
    /// Residency model implied by this affinity.
    pub fn mem_type(self) -> MemType {
        match self {
            Affinity::Cpu => MemType::Host,
            Affinity::Gpu => MemType::Device,
        }
    }
}

/// Configuration for a [`MasterPipeline`](crate::pipeline::MasterPipeline).
///
/// # Example
///
/// ```rust
/// use augment_pipeline::core::config::{Affinity, PipelineConfig};
///
/// let config = PipelineConfig::from_json_str(
///     r#"{ "batch_size": 4, "affinity": "Gpu", "gpu_id": 1, "cpu_threads": 2 }"#,
/// )
/// .unwrap();
/// assert_eq!(config.affinity, Affinity::Gpu);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Number of images processed per iteration.
    pub batch_size: usize,
    /// Host or accelerator execution.
    #[serde(default)]
    pub affinity: Affinity,
    /// Accelerator id used when `affinity` is `Gpu`.
    #[serde(default)]
    pub gpu_id: usize,
    /// Worker threads for host-side conversion.
    #[serde(default = "PipelineConfig::default_cpu_threads")]
    pub cpu_threads: usize,
    /// Seed for the stochastic parameter context; entropy-seeded when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl PipelineConfig {
    fn default_cpu_threads() -> usize {
        1
    }

    /// Creates a host-affinity configuration with the given batch size.
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            ..Self::get_defaults()
        }
    }

    /// Sets the affinity.
    pub fn affinity(mut self, affinity: Affinity) -> Self {
        self.affinity = affinity;
        self
    }

    /// Sets the accelerator id.
    pub fn gpu_id(mut self, gpu_id: usize) -> Self {
        self.gpu_id = gpu_id;
        self
    }

    /// Sets the number of host worker threads.
    pub fn cpu_threads(mut self, cpu_threads: usize) -> Self {
        self.cpu_threads = cpu_threads;
        self
    }

    /// Seeds the parameter context for reproducible runs.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Accelerator id after range clamping; ids outside `0..=9` map to 0.
    pub fn effective_gpu_id(&self) -> usize {
        if self.gpu_id <= MAX_AFFINITY_ID {
            self.gpu_id
        } else {
            tracing::warn!(
                "gpu_id {} is outside 0..={}, falling back to device 0",
                self.gpu_id,
                MAX_AFFINITY_ID
            );
            0
        }
    }

    /// Residency model implied by the configured affinity.
    pub fn mem_type(&self) -> MemType {
        self.affinity.mem_type()
    }

    /// Parses and validates a configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` for malformed JSON and any validation error.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }
}

impl ConfigValidator for PipelineConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.validate_batch_size(self.batch_size)?;
        self.validate_thread_count(self.cpu_threads)?;
        Ok(())
    }

    fn get_defaults() -> Self {
        Self {
            batch_size: 1,
            affinity: Affinity::Cpu,
            gpu_id: 0,
            cpu_threads: Self::default_cpu_threads(),
            seed: None,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::get_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.mem_type(), MemType::Host);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let config = PipelineConfig::new(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBatchSize)
        ));
    }

    #[test]
    fn test_gpu_id_clamped() {
        assert_eq!(PipelineConfig::new(1).gpu_id(3).effective_gpu_id(), 3);
        assert_eq!(PipelineConfig::new(1).gpu_id(12).effective_gpu_id(), 0);
    }

    #[test]
    fn test_json_defaults_fill_missing_fields() {
        let config = PipelineConfig::from_json_str(r#"{ "batch_size": 8 }"#).unwrap();
        assert_eq!(config.batch_size, 8);
        assert_eq!(config.affinity, Affinity::Cpu);
        assert_eq!(config.cpu_threads, 1);
        assert!(config.seed.is_none());
    }

    #[test]
    fn test_json_validation_runs() {
        let result = PipelineConfig::from_json_str(r#"{ "batch_size": 2, "cpu_threads": 0 }"#);
        assert!(matches!(result, Err(ConfigError::InvalidConfig { .. })));
    }

    #[test]
    fn test_from_json_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "batch_size": 2, "affinity": "Gpu", "gpu_id": 1, "seed": 7 }}"#
        )
        .unwrap();

        let config = PipelineConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.mem_type(), MemType::Device);
        assert_eq!(config.seed, Some(7));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = PipelineConfig::from_json_file("/nonexistent/pipeline.json");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
