//! Types used in output tensor conversion.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::errors::PipelineError;

/// Four-dimensional float tensor handed to training frameworks.
pub type Tensor4D = ndarray::Array4<f32>;

/// Element order of the batch tensor handed to the training framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TensorLayout {
    /// Batch, height, width, channel (channel-last, common in TensorFlow)
    Nhwc,
    /// Batch, channel, height, width (channel-first, common in PyTorch)
    Nchw,
}

impl FromStr for TensorLayout {
    type Err = PipelineError;

    fn from_str(layout: &str) -> Result<Self, Self::Err> {
        match layout.to_ascii_uppercase().as_str() {
            "NHWC" => Ok(TensorLayout::Nhwc),
            "NCHW" => Ok(TensorLayout::Nchw),
            other => Err(PipelineError::unsupported(format!(
                "tensor layout '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for TensorLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TensorLayout::Nhwc => write!(f, "NHWC"),
            TensorLayout::Nchw => write!(f, "NCHW"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_parsing() {
        assert_eq!("nhwc".parse::<TensorLayout>().unwrap(), TensorLayout::Nhwc);
        assert_eq!("NCHW".parse::<TensorLayout>().unwrap(), TensorLayout::Nchw);
        assert!("CHW".parse::<TensorLayout>().is_err());
        assert_eq!(TensorLayout::Nchw.to_string(), "NCHW");
    }
}
