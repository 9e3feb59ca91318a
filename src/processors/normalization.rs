//! Per-channel affine normalization applied while materializing the output tensor.
//!
//! Every destination element is `offset[k] + multiplier[k] * source`, with at
//! most three channels carrying their own coefficients.

use serde::{Deserialize, Serialize};

use crate::core::errors::{PipelineError, PipelineResult};

/// Highest channel count the per-channel coefficients cover.
pub const MAX_NORMALIZED_PLANES: usize = 3;

/// Coefficients of the normalizing conversion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizeParams {
    /// Scaling factor for each channel
    pub multiplier: [f32; 3],
    /// Additive offset for each channel
    pub offset: [f32; 3],
    /// Read source channels in reverse order (RGB <-> BGR)
    pub reverse_channels: bool,
}

impl NormalizeParams {
    /// Creates parameters from explicit coefficients.
    pub fn new(multiplier: [f32; 3], offset: [f32; 3], reverse_channels: bool) -> Self {
        Self {
            multiplier,
            offset,
            reverse_channels,
        }
    }

    /// Parameters that copy every value unchanged.
    pub fn identity() -> Self {
        Self::new([1.0; 3], [0.0; 3], false)
    }

    /// Derives coefficients from a scale and per-channel mean and standard deviation.
    ///
    /// The result computes `(value * scale - mean) / std` as
    /// `value * (scale / std) + (-mean / std)`.
    ///
    /// # Arguments
    ///
    /// * `scale` - Optional scaling factor (defaults to 1.0/255.0)
    /// * `mean` - Mean values for each channel
    /// * `std` - Standard deviation values for each channel
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// * Scale is less than or equal to 0
    /// * Any standard deviation value is less than or equal to 0
    pub fn from_mean_std(scale: Option<f32>, mean: [f32; 3], std: [f32; 3]) -> PipelineResult<Self> {
        let scale = scale.unwrap_or(1.0 / 255.0);

        if scale <= 0.0 {
            return Err(PipelineError::config_error("Scale must be greater than 0"));
        }

        for (i, &s) in std.iter().enumerate() {
            if s <= 0.0 {
                return Err(PipelineError::config_error(format!(
                    "Standard deviation at index {i} must be greater than 0, got {s}"
                )));
            }
        }

        let multiplier = std.map(|s| scale / s);
        let offset = [0, 1, 2].map(|i| -mean[i] / std[i]);

        Ok(Self::new(multiplier, offset, false))
    }

    /// ImageNet statistics on 0..=255 input.
    pub fn imagenet() -> PipelineResult<Self> {
        Self::from_mean_std(None, [0.485, 0.456, 0.406], [0.229, 0.224, 0.225])
    }

    /// Returns a copy with channel reversal switched on or off.
    pub fn with_reverse_channels(mut self, reverse_channels: bool) -> Self {
        self.reverse_channels = reverse_channels;
        self
    }

    /// Validates the coefficients.
    ///
    /// # Errors
    ///
    /// Returns an error if any multiplier or offset is not finite.
    pub fn validate(&self) -> PipelineResult<()> {
        for (i, &m) in self.multiplier.iter().enumerate() {
            if !m.is_finite() {
                return Err(PipelineError::config_error(format!(
                    "Multiplier at index {i} is not finite: {m}"
                )));
            }
        }

        for (i, &o) in self.offset.iter().enumerate() {
            if !o.is_finite() {
                return Err(PipelineError::config_error(format!(
                    "Offset at index {i} is not finite: {o}"
                )));
            }
        }

        Ok(())
    }
}

impl Default for NormalizeParams {
    fn default() -> Self {
        Self::identity()
    }
}
