//! Index arithmetic shared by every output-tensor conversion path.
//!
//! The host backend walks images channel by channel; device kernels run one
//! work-item per destination element. Both go through [`convert_value`] and
//! [`destination_index`], so the two paths produce bit-identical tensors.

use crate::core::errors::{PipelineError, PipelineResult};
use crate::core::traits::{ConvertKernel, ConvertKernelArgs};
use crate::domain::ImageInfo;
use crate::processors::normalization::{MAX_NORMALIZED_PLANES, NormalizeParams};
use crate::processors::types::TensorLayout;

/// Geometry of one batched source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversionShape {
    pub width: usize,
    /// Batched height.
    pub height: usize,
    pub planes: usize,
}

impl ConversionShape {
    /// Shape of an image described by `info`.
    pub fn from_info(info: &ImageInfo) -> Self {
        Self {
            width: info.width(),
            height: info.height_batch(),
            planes: info.color_plane_count(),
        }
    }

    /// Shape carried by a kernel argument block.
    pub fn from_kernel_args(args: &ConvertKernelArgs) -> Self {
        Self {
            width: args.width as usize,
            height: args.height as usize,
            planes: args.planes as usize,
        }
    }

    /// Pixels per channel plane.
    pub fn plane_size(&self) -> usize {
        self.width * self.height
    }

    /// Destination elements per image.
    pub fn image_elements(&self) -> usize {
        self.plane_size() * self.planes
    }

    /// Rejects shapes the per-channel coefficients cannot cover.
    pub fn check_normalizable(&self) -> PipelineResult<()> {
        if self.planes == 0 || self.planes > MAX_NORMALIZED_PLANES {
            return Err(PipelineError::unsupported(format!(
                "normalized conversion supports 1 to {MAX_NORMALIZED_PLANES} color planes, got {}",
                self.planes
            )));
        }
        Ok(())
    }
}

/// Source channel read for destination channel `channel`.
#[inline]
pub fn source_channel(planes: usize, channel: usize, reverse_channels: bool) -> usize {
    if reverse_channels {
        planes - 1 - channel
    } else {
        channel
    }
}

/// Position of (`channel`, `pixel`) inside one image of the destination tensor.
#[inline]
pub fn destination_index(
    layout: TensorLayout,
    shape: &ConversionShape,
    channel: usize,
    pixel: usize,
) -> usize {
    match layout {
        TensorLayout::Nhwc => channel + pixel * shape.planes,
        TensorLayout::Nchw => channel * shape.plane_size() + pixel,
    }
}

/// Splits a destination element index into (`channel`, `pixel`).
#[inline]
pub fn decompose_index(layout: TensorLayout, shape: &ConversionShape, element: usize) -> (usize, usize) {
    match layout {
        TensorLayout::Nhwc => (element % shape.planes, element / shape.planes),
        TensorLayout::Nchw => (element / shape.plane_size(), element % shape.plane_size()),
    }
}

/// Normalized value of (`channel`, `pixel`) read from interleaved `src`.
#[inline]
pub fn convert_value(
    src: &[u8],
    planes: usize,
    channel: usize,
    pixel: usize,
    multiplier: &[f32; 3],
    offset: &[f32; 3],
    reverse_channels: bool,
) -> f32 {
    let src_channel = source_channel(planes, channel, reverse_channels);
    offset[channel] + multiplier[channel] * f32::from(src[pixel * planes + src_channel])
}

/// Converts one interleaved image into `dst`, channel by channel.
///
/// `dst` is the image's own slice of the batch tensor and must hold
/// `shape.image_elements()` values.
pub fn convert_image_into(
    src: &[u8],
    dst: &mut [f32],
    shape: &ConversionShape,
    layout: TensorLayout,
    params: &NormalizeParams,
) -> PipelineResult<()> {
    shape.check_normalizable()?;
    PipelineError::check_buffer(shape.image_elements(), dst.len())?;
    PipelineError::check_buffer(shape.image_elements(), src.len())?;

    for channel in 0..shape.planes {
        for pixel in 0..shape.plane_size() {
            dst[destination_index(layout, shape, channel, pixel)] = convert_value(
                src,
                shape.planes,
                channel,
                pixel,
                &params.multiplier,
                &params.offset,
                params.reverse_channels,
            );
        }
    }

    Ok(())
}

/// Body of the conversion kernel for a single work-item.
///
/// Work-items past the end of the image do nothing. `tensor` is the whole
/// destination tensor; the image starts at `args.dst_offset`.
#[inline]
pub fn convert_work_item(
    kernel: ConvertKernel,
    args: &ConvertKernelArgs,
    src: &[u8],
    tensor: &mut [f32],
    global_id: usize,
) {
    let shape = ConversionShape::from_kernel_args(args);
    if global_id >= shape.image_elements() {
        return;
    }

    let layout = kernel.layout();
    let (channel, pixel) = decompose_index(layout, &shape, global_id);
    let value = convert_value(
        src,
        shape.planes,
        channel,
        pixel,
        &args.multiplier(),
        &args.offset(),
        args.reverse_channels != 0,
    );
    tensor[args.dst_offset as usize + destination_index(layout, &shape, channel, pixel)] = value;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::traits::DeviceBufferId;

    fn rgb_shape() -> ConversionShape {
        ConversionShape {
            width: 2,
            height: 2,
            planes: 3,
        }
    }

    fn rgb_pixels() -> Vec<u8> {
        // four pixels, channels (r, g, b) = (10p+1, 10p+2, 10p+3)
        (0..4u8)
            .flat_map(|p| [10 * p + 1, 10 * p + 2, 10 * p + 3])
            .collect()
    }

    #[test]
    fn test_identity_nhwc_copies_values() {
        let shape = rgb_shape();
        let src = rgb_pixels();
        let mut dst = vec![0.0; shape.image_elements()];

        convert_image_into(&src, &mut dst, &shape, TensorLayout::Nhwc, &NormalizeParams::identity())
            .unwrap();

        let expected: Vec<f32> = src.iter().map(|&v| f32::from(v)).collect();
        assert_eq!(dst, expected);
    }

    #[test]
    fn test_reverse_swaps_outer_channels() {
        let shape = rgb_shape();
        let src = rgb_pixels();
        let mut dst = vec![0.0; shape.image_elements()];
        let params = NormalizeParams::identity().with_reverse_channels(true);

        convert_image_into(&src, &mut dst, &shape, TensorLayout::Nhwc, &params).unwrap();

        for pixel in 0..shape.plane_size() {
            assert_eq!(dst[pixel * 3], f32::from(src[pixel * 3 + 2]));
            assert_eq!(dst[pixel * 3 + 1], f32::from(src[pixel * 3 + 1]));
            assert_eq!(dst[pixel * 3 + 2], f32::from(src[pixel * 3]));
        }
    }

    #[test]
    fn test_reverse_is_noop_for_single_plane() {
        let shape = ConversionShape {
            width: 3,
            height: 1,
            planes: 1,
        };
        let src = [5u8, 6, 7];
        let mut plain = vec![0.0; 3];
        let mut reversed = vec![0.0; 3];
        let params = NormalizeParams::new([2.0, 1.0, 1.0], [1.0, 0.0, 0.0], false);

        convert_image_into(&src, &mut plain, &shape, TensorLayout::Nchw, &params).unwrap();
        convert_image_into(
            &src,
            &mut reversed,
            &shape,
            TensorLayout::Nchw,
            &params.with_reverse_channels(true),
        )
        .unwrap();

        assert_eq!(plain, reversed);
        assert_eq!(plain, vec![11.0, 13.0, 15.0]);
    }

    #[test]
    fn test_nchw_is_permutation_of_nhwc() {
        let shape = rgb_shape();
        let src = rgb_pixels();
        let params = NormalizeParams::new([0.5, 2.0, -1.0], [1.0, -3.0, 0.25], true);
        let mut nhwc = vec![0.0; shape.image_elements()];
        let mut nchw = vec![0.0; shape.image_elements()];

        convert_image_into(&src, &mut nhwc, &shape, TensorLayout::Nhwc, &params).unwrap();
        convert_image_into(&src, &mut nchw, &shape, TensorLayout::Nchw, &params).unwrap();

        for channel in 0..shape.planes {
            for pixel in 0..shape.plane_size() {
                assert_eq!(
                    nhwc[pixel * shape.planes + channel],
                    nchw[channel * shape.plane_size() + pixel]
                );
            }
        }
    }

    #[test]
    fn test_four_planes_unsupported() {
        let shape = ConversionShape {
            width: 1,
            height: 1,
            planes: 4,
        };
        let mut dst = vec![0.0; 4];
        let result = convert_image_into(
            &[1, 2, 3, 4],
            &mut dst,
            &shape,
            TensorLayout::Nhwc,
            &NormalizeParams::identity(),
        );
        assert!(matches!(result, Err(PipelineError::Unsupported { .. })));
    }

    #[test]
    fn test_short_destination_rejected() {
        let shape = rgb_shape();
        let mut dst = vec![0.0; 5];
        let result = convert_image_into(
            &rgb_pixels(),
            &mut dst,
            &shape,
            TensorLayout::Nhwc,
            &NormalizeParams::identity(),
        );
        assert!(matches!(result, Err(PipelineError::BufferTooSmall { .. })));
    }

    #[test]
    fn test_work_items_match_host_loop() {
        let shape = rgb_shape();
        let src = rgb_pixels();
        let params = NormalizeParams::new([0.1, 0.2, 0.3], [-1.0, 0.5, 2.0], true);

        for layout in [TensorLayout::Nhwc, TensorLayout::Nchw] {
            let mut host = vec![0.0; shape.image_elements()];
            convert_image_into(&src, &mut host, &shape, layout, &params).unwrap();

            let args = ConvertKernelArgs {
                src: DeviceBufferId(1),
                dst: DeviceBufferId(2),
                dst_offset: 4,
                width: 2,
                height: 2,
                planes: 3,
                multiplier0: 0.1,
                multiplier1: 0.2,
                multiplier2: 0.3,
                offset0: -1.0,
                offset1: 0.5,
                offset2: 2.0,
                reverse_channels: 1,
            };
            let kernel = ConvertKernel::for_layout(layout);
            let mut tensor = vec![0.0; 4 + shape.image_elements()];
            for gid in 0..args.geometry().global {
                convert_work_item(kernel, &args, &src, &mut tensor, gid);
            }

            assert_eq!(&tensor[..4], &[0.0; 4]);
            assert_eq!(&tensor[4..], host.as_slice());
        }
    }
}
