//! Device-resident backend.

use std::sync::Arc;

use tracing::{debug, trace};

use super::{OutputTensor, ResidencyBackend, raw_sizes};
use crate::core::errors::{IterationStage, PipelineError, PipelineResult};
use crate::core::traits::{ConvertKernel, ConvertKernelArgs, DeviceBuffer, SyncMode, TransferDevice};
use crate::domain::{ImageBuffer, ImageHandle, ImageInfo, MemType};
use crate::processors::{ConversionShape, NormalizeParams, TensorLayout};

/// Backend for pipelines whose buffers live on a transfer device.
#[derive(Debug)]
pub struct DeviceBackend {
    device: Arc<dyn TransferDevice>,
}

impl DeviceBackend {
    /// Initialises `device` for `device_id` and wraps it.
    ///
    /// # Errors
    ///
    /// Returns a construction error if the device cannot be initialised.
    pub fn new(device: Arc<dyn TransferDevice>, device_id: usize) -> PipelineResult<Self> {
        device
            .initialize(device_id)
            .map_err(|e| PipelineError::construction(format!("transfer device {device_id}"), e))?;
        debug!(device_id, "device backend ready");
        Ok(Self { device })
    }

    pub fn device(&self) -> &Arc<dyn TransferDevice> {
        &self.device
    }
}

fn kernel_u32(value: usize, what: &str) -> PipelineResult<u32> {
    u32::try_from(value).map_err(|_| {
        PipelineError::unsupported(format!("{what} {value} exceeds the conversion kernel range"))
    })
}

impl ResidencyBackend for DeviceBackend {
    fn mem_type(&self) -> MemType {
        MemType::Device
    }

    fn allocate_image(&self, info: &ImageInfo) -> PipelineResult<ImageBuffer> {
        let buffer = DeviceBuffer::allocate(&self.device, info.data_size())
            .map_err(|e| PipelineError::construction("device image buffer", e))?;
        Ok(ImageBuffer::Device(buffer))
    }

    fn allocate_tensor(&self, elements: usize) -> PipelineResult<OutputTensor> {
        let bytes = elements
            .checked_mul(std::mem::size_of::<f32>())
            .ok_or_else(|| {
                PipelineError::construction_message(format!(
                    "output tensor of {elements} elements overflows the device address range"
                ))
            })?;
        let buffer = DeviceBuffer::allocate(&self.device, bytes)
            .map_err(|e| PipelineError::construction("device output tensor", e))?;
        Ok(OutputTensor::Device(buffer))
    }

    fn copy(&self, images: &[ImageHandle], dst: &mut [u8]) -> PipelineResult<()> {
        let (per_image, total) = raw_sizes(images);
        PipelineError::check_buffer(total, dst.len())?;
        if per_image == 0 {
            return Ok(());
        }

        let last = images.len() - 1;
        for (index, (image, chunk)) in images
            .iter()
            .zip(dst[..total].chunks_exact_mut(per_image))
            .enumerate()
        {
            // only the final read needs to drain the queue
            let sync = if index == last {
                SyncMode::Blocking
            } else {
                SyncMode::Deferred
            };
            image.download(chunk, sync).map_err(|e| {
                PipelineError::iteration(
                    IterationStage::Convert,
                    format!("reading output image {index}"),
                    e,
                )
            })?;
        }
        Ok(())
    }

    fn transform_copy(
        &self,
        images: &[ImageHandle],
        tensor: &OutputTensor,
        dst: &mut [f32],
        layout: TensorLayout,
        params: &NormalizeParams,
    ) -> PipelineResult<()> {
        let OutputTensor::Device(tensor) = tensor else {
            return Err(PipelineError::usage("device conversion needs a device output tensor"));
        };
        let Some(first) = images.first() else {
            return Ok(());
        };

        let shape = ConversionShape::from_info(first.info());
        shape.check_normalizable()?;
        let per_image = shape.image_elements();
        let total = per_image * images.len();
        PipelineError::check_buffer(total, dst.len())?;
        PipelineError::check_buffer(total * std::mem::size_of::<f32>(), tensor.len())?;

        let kernel = ConvertKernel::for_layout(layout);
        let width = kernel_u32(shape.width, "width")?;
        let height = kernel_u32(shape.height, "height")?;
        let planes = kernel_u32(shape.planes, "plane count")?;

        for (index, image) in images.iter().enumerate() {
            let buffer = image.read();
            let src = buffer.as_device().ok_or_else(|| {
                PipelineError::usage(format!("output image {} has no device storage", image.id()))
            })?;

            let args = ConvertKernelArgs {
                src: src.id(),
                dst: tensor.id(),
                dst_offset: kernel_u32(index * per_image, "destination offset")?,
                width,
                height,
                planes,
                multiplier0: params.multiplier[0],
                multiplier1: params.multiplier[1],
                multiplier2: params.multiplier[2],
                offset0: params.offset[0],
                offset1: params.offset[1],
                offset2: params.offset[2],
                reverse_channels: u32::from(params.reverse_channels),
            };
            let geometry = args.geometry();
            trace!(kernel = kernel.name(), index, global = geometry.global, "dispatch");
            self.device
                .dispatch_convert(kernel, &args, geometry)
                .map_err(|e| {
                    PipelineError::iteration(
                        IterationStage::Convert,
                        format!("converting output image {index}"),
                        e,
                    )
                })?;
        }

        self.device
            .read_f32(tensor.id(), &mut dst[..total], SyncMode::Blocking)
            .map_err(|e| {
                PipelineError::iteration(IterationStage::Convert, "reading output tensor", e)
            })
    }

    fn release(&self) {
        self.device.release();
    }
}
