//! Residency backends.
//!
//! The pipeline never branches on where its buffers live. Everything that
//! differs between host and device residency (allocation, raw copy-out and
//! the normalizing conversion) goes through a [`ResidencyBackend`] chosen once
//! when the pipeline is constructed.

mod device;
mod host;
mod software;

use std::fmt::Debug;

pub use device::DeviceBackend;
pub use host::HostBackend;
pub use software::{SoftwareDevice, SoftwareDeviceStats};

use crate::core::errors::PipelineResult;
use crate::core::traits::DeviceBuffer;
use crate::domain::{ImageBuffer, ImageHandle, ImageInfo, MemType};
use crate::processors::{NormalizeParams, TensorLayout};

/// Staging storage for the normalized batch tensor.
#[derive(Debug)]
pub enum OutputTensor {
    /// Host conversion writes straight into the caller's buffer; only the
    /// element count is tracked.
    Host { elements: usize },
    /// Device buffer of `f32` elements the conversion kernels write into.
    Device(DeviceBuffer),
}

impl OutputTensor {
    /// Number of `f32` elements in the tensor.
    pub fn elements(&self) -> usize {
        match self {
            OutputTensor::Host { elements } => *elements,
            OutputTensor::Device(buffer) => buffer.len() / std::mem::size_of::<f32>(),
        }
    }

    pub fn mem_type(&self) -> MemType {
        match self {
            OutputTensor::Host { .. } => MemType::Host,
            OutputTensor::Device(_) => MemType::Device,
        }
    }
}

/// Residency-specific half of the pipeline.
pub trait ResidencyBackend: Send + Sync + Debug {
    /// Residency of every buffer this backend creates.
    fn mem_type(&self) -> MemType;

    /// Allocates storage for an image described by `info`.
    fn allocate_image(&self, info: &ImageInfo) -> PipelineResult<ImageBuffer>;

    /// Allocates the staging tensor for `elements` floats.
    fn allocate_tensor(&self, elements: usize) -> PipelineResult<OutputTensor>;

    /// Copies the raw bytes of `images`, concatenated in order, into `dst`.
    fn copy(&self, images: &[ImageHandle], dst: &mut [u8]) -> PipelineResult<()>;

    /// Writes the normalized batch tensor of `images` into `dst`.
    ///
    /// Image `i` occupies elements `[i * E, (i + 1) * E)` where `E` is the
    /// element count of one batched image.
    fn transform_copy(
        &self,
        images: &[ImageHandle],
        tensor: &OutputTensor,
        dst: &mut [f32],
        layout: TensorLayout,
        params: &NormalizeParams,
    ) -> PipelineResult<()>;

    /// Releases backend resources. Called once from pipeline release.
    fn release(&self) {}
}

/// Bytes of one image and the total over `images`.
pub(crate) fn raw_sizes(images: &[ImageHandle]) -> (usize, usize) {
    let per_image = images.first().map_or(0, |image| image.info().data_size());
    (per_image, per_image * images.len())
}
