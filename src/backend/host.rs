//! Host-resident backend.

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::debug;

use super::{OutputTensor, ResidencyBackend, raw_sizes};
use crate::core::errors::{PipelineError, PipelineResult};
use crate::domain::{ImageBuffer, ImageHandle, ImageInfo, MemType};
use crate::processors::{ConversionShape, NormalizeParams, TensorLayout, convert_image_into};

/// Backend for pipelines whose buffers live in host memory.
///
/// Conversion runs on a dedicated rayon pool sized from the configured CPU
/// thread count, one image per task.
#[derive(Debug)]
pub struct HostBackend {
    pool: ThreadPool,
}

impl HostBackend {
    /// Creates a backend with `threads` conversion workers.
    ///
    /// # Errors
    ///
    /// Returns a construction error if the thread pool cannot be built.
    pub fn new(threads: usize) -> PipelineResult<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|index| format!("augment-convert-{index}"))
            .build()
            .map_err(|e| PipelineError::construction("host conversion thread pool", e))?;
        debug!(threads = pool.current_num_threads(), "host backend ready");
        Ok(Self { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

fn convert_one(
    image: &ImageHandle,
    dst: &mut [f32],
    layout: TensorLayout,
    params: &NormalizeParams,
) -> PipelineResult<()> {
    let shape = ConversionShape::from_info(image.info());
    let buffer = image.read();
    let src = buffer.as_host().ok_or_else(|| {
        PipelineError::usage(format!("output image {} has no host storage", image.id()))
    })?;
    convert_image_into(src, dst, &shape, layout, params)
}

impl ResidencyBackend for HostBackend {
    fn mem_type(&self) -> MemType {
        MemType::Host
    }

    fn allocate_image(&self, info: &ImageInfo) -> PipelineResult<ImageBuffer> {
        Ok(ImageBuffer::Host(vec![0; info.data_size()]))
    }

    fn allocate_tensor(&self, elements: usize) -> PipelineResult<OutputTensor> {
        Ok(OutputTensor::Host { elements })
    }

    fn copy(&self, images: &[ImageHandle], dst: &mut [u8]) -> PipelineResult<()> {
        let (per_image, total) = raw_sizes(images);
        PipelineError::check_buffer(total, dst.len())?;
        if per_image == 0 {
            return Ok(());
        }

        for (image, chunk) in images.iter().zip(dst[..total].chunks_exact_mut(per_image)) {
            let buffer = image.read();
            let src = buffer.as_host().ok_or_else(|| {
                PipelineError::usage(format!("output image {} has no host storage", image.id()))
            })?;
            chunk.copy_from_slice(src);
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
        let Some(first) = images.first() else {
            return Ok(());
        };
        let per_image = ConversionShape::from_info(first.info()).image_elements();
        let total = per_image * images.len();
        if tensor.elements() != total {
            return Err(PipelineError::usage(format!(
                "output tensor holds {} elements, batch needs {total}",
                tensor.elements()
            )));
        }
        PipelineError::check_buffer(total, dst.len())?;
        let dst = &mut dst[..total];

        if images.len() == 1 {
            return convert_one(first, dst, layout, params);
        }

        self.pool.install(|| {
            dst.par_chunks_mut(per_image)
                .zip(images.par_iter())
                .try_for_each(|(chunk, image)| convert_one(image, chunk, layout, params))
        })
    }
}
