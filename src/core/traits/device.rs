//! Transfer-device contract for device-resident pipelines.
//!
//! A transfer device wraps an accelerator context and its command queue. The
//! pipeline only needs buffer management, host transfers, and dispatch of the
//! output conversion kernel; everything else about the accelerator stays
//! behind the implementation.

use std::fmt::Debug;
use std::sync::Arc;

use thiserror::Error;

use crate::processors::TensorLayout;

/// Work-group size used when dispatching the conversion kernel.
pub const CONVERT_LOCAL_WORK_SIZE: usize = 256;

/// Opaque identifier of a buffer owned by a [`TransferDevice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceBufferId(pub u64);

/// Errors reported by a transfer device.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// The device or its context could not be initialised.
    #[error("device {device_id} initialisation failed: {message}")]
    Init { device_id: usize, message: String },

    /// A buffer allocation failed.
    #[error("allocation of {bytes} bytes failed")]
    Allocation { bytes: usize },

    /// The buffer id is not known to the device.
    #[error("unknown device buffer {0:?}")]
    UnknownBuffer(DeviceBufferId),

    /// A transfer touched memory outside the buffer.
    #[error("transfer out of bounds: offset {offset} + {len} exceeds buffer size {size}")]
    OutOfBounds {
        offset: usize,
        len: usize,
        size: usize,
    },

    /// A kernel could not be enqueued or failed while running.
    #[error("kernel {kernel} failed: {message}")]
    Dispatch {
        kernel: &'static str,
        message: String,
    },
}

/// Whether a host transfer must wait for the command queue to drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// The device may skip the queue flush; the copy still lands in the
    /// destination slice before the call returns.
    Deferred,
    /// The queue is flushed before the call returns.
    Blocking,
}

/// Conversion kernels exposed by the device, one per output layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertKernel {
    /// Channel-last output.
    Nhwc,
    /// Channel-first output.
    Nchw,
}

impl ConvertKernel {
    /// Kernel selected for a destination layout.
    pub fn for_layout(layout: TensorLayout) -> Self {
        match layout {
            TensorLayout::Nhwc => ConvertKernel::Nhwc,
            TensorLayout::Nchw => ConvertKernel::Nchw,
        }
    }

    /// Layout produced by this kernel.
    pub fn layout(self) -> TensorLayout {
        match self {
            ConvertKernel::Nhwc => TensorLayout::Nhwc,
            ConvertKernel::Nchw => TensorLayout::Nchw,
        }
    }

    /// Name of the kernel in the device's utility program.
    pub fn name(self) -> &'static str {
        match self {
            ConvertKernel::Nhwc => "copy_u8_to_nhwc_f32",
            ConvertKernel::Nchw => "copy_u8_to_nchw_f32",
        }
    }
}

/// Argument block of the conversion kernel.
///
/// Field order is the kernel's argument order and must not change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvertKernelArgs {
    pub src: DeviceBufferId,
    pub dst: DeviceBufferId,
    /// Element offset of this image inside the destination tensor.
    pub dst_offset: u32,
    pub width: u32,
    /// Batched height of the source image.
    pub height: u32,
    pub planes: u32,
    pub multiplier0: f32,
    pub multiplier1: f32,
    pub multiplier2: f32,
    pub offset0: f32,
    pub offset1: f32,
    pub offset2: f32,
    /// Non-zero to read source channels in reverse order.
    pub reverse_channels: u32,
}

impl ConvertKernelArgs {
    /// Per-channel multipliers as an array.
    pub fn multiplier(&self) -> [f32; 3] {
        [self.multiplier0, self.multiplier1, self.multiplier2]
    }

    /// Per-channel offsets as an array.
    pub fn offset(&self) -> [f32; 3] {
        [self.offset0, self.offset1, self.offset2]
    }

    /// Number of destination elements written for one image.
    pub fn image_elements(&self) -> usize {
        self.width as usize * self.height as usize * self.planes as usize
    }

    /// One work-item per destination element, padded to the work-group size.
    pub fn geometry(&self) -> DispatchGeometry {
        DispatchGeometry::covering(self.image_elements(), CONVERT_LOCAL_WORK_SIZE)
    }
}

/// One-dimensional dispatch size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchGeometry {
    /// Total work-items, a multiple of `local`.
    pub global: usize,
    pub local: usize,
}

impl DispatchGeometry {
    /// Smallest geometry with at least `items` work-items.
    pub fn covering(items: usize, local: usize) -> Self {
        let local = local.max(1);
        Self {
            global: items.div_ceil(local) * local,
            local,
        }
    }
}

/// Accelerator context and command queue.
///
/// Implementations must be safe to share between the pipeline, its images and
/// its output tensor; all of them hold an `Arc` to the device.
pub trait TransferDevice: Send + Sync + Debug {
    /// Prepares the context for the given device id.
    fn initialize(&self, device_id: usize) -> Result<(), DeviceError>;

    /// Allocates a buffer of `bytes` bytes.
    fn allocate(&self, bytes: usize) -> Result<DeviceBufferId, DeviceError>;

    /// Frees a buffer. Unknown ids are ignored.
    fn free(&self, buffer: DeviceBufferId);

    /// Copies host bytes into a buffer at `offset`.
    fn write(&self, buffer: DeviceBufferId, offset: usize, src: &[u8]) -> Result<(), DeviceError>;

    /// Copies buffer bytes starting at `offset` into `dst`.
    fn read(
        &self,
        buffer: DeviceBufferId,
        offset: usize,
        dst: &mut [u8],
        sync: SyncMode,
    ) -> Result<(), DeviceError>;

    /// Copies the leading `dst.len()` floats of a buffer into `dst`.
    fn read_f32(
        &self,
        buffer: DeviceBufferId,
        dst: &mut [f32],
        sync: SyncMode,
    ) -> Result<(), DeviceError>;

    /// Enqueues the conversion kernel for one image.
    fn dispatch_convert(
        &self,
        kernel: ConvertKernel,
        args: &ConvertKernelArgs,
        geometry: DispatchGeometry,
    ) -> Result<(), DeviceError>;

    /// Releases the context. Called once when the owning pipeline is released.
    fn release(&self) {}
}

/// Device buffer that frees itself when dropped.
#[derive(Debug)]
pub struct DeviceBuffer {
    id: DeviceBufferId,
    bytes: usize,
    device: Arc<dyn TransferDevice>,
}

impl DeviceBuffer {
    /// Allocates `bytes` bytes on `device`.
    pub fn allocate(device: &Arc<dyn TransferDevice>, bytes: usize) -> Result<Self, DeviceError> {
        let id = device.allocate(bytes)?;
        Ok(Self {
            id,
            bytes,
            device: Arc::clone(device),
        })
    }

    pub fn id(&self) -> DeviceBufferId {
        self.id
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }

    /// The device owning this buffer.
    pub fn device(&self) -> &Arc<dyn TransferDevice> {
        &self.device
    }

    /// Uploads host bytes at `offset`.
    pub fn write(&self, offset: usize, src: &[u8]) -> Result<(), DeviceError> {
        self.device.write(self.id, offset, src)
    }

    /// Downloads bytes starting at `offset`.
    pub fn read(&self, offset: usize, dst: &mut [u8], sync: SyncMode) -> Result<(), DeviceError> {
        self.device.read(self.id, offset, dst, sync)
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        self.device.free(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_rounds_up_to_local_size() {
        let geometry = DispatchGeometry::covering(300, 256);
        assert_eq!(geometry.global, 512);
        assert_eq!(geometry.local, 256);

        let exact = DispatchGeometry::covering(512, 256);
        assert_eq!(exact.global, 512);
    }

    #[test]
    fn test_kernel_layout_mapping() {
        for layout in [TensorLayout::Nhwc, TensorLayout::Nchw] {
            assert_eq!(ConvertKernel::for_layout(layout).layout(), layout);
        }
        assert_ne!(ConvertKernel::Nhwc.name(), ConvertKernel::Nchw.name());
    }

    #[test]
    fn test_args_expose_channel_arrays() {
        let args = ConvertKernelArgs {
            src: DeviceBufferId(1),
            dst: DeviceBufferId(2),
            dst_offset: 0,
            width: 4,
            height: 2,
            planes: 3,
            multiplier0: 1.0,
            multiplier1: 2.0,
            multiplier2: 3.0,
            offset0: -1.0,
            offset1: -2.0,
            offset2: -3.0,
            reverse_channels: 0,
        };
        assert_eq!(args.multiplier(), [1.0, 2.0, 3.0]);
        assert_eq!(args.offset(), [-1.0, -2.0, -3.0]);
        assert_eq!(args.image_elements(), 24);
        assert_eq!(args.geometry().global, 256);
    }
}
