//! In-process transfer device.
//!
//! Emulates an accelerator with host memory. Kernels run work-item by
//! work-item through the same arithmetic a real device program implements,
//! which makes it the reference for device-resident pipelines and the device
//! used by the test suite.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::core::traits::{
    ConvertKernel, ConvertKernelArgs, DeviceBufferId, DeviceError, DispatchGeometry, SyncMode,
    TransferDevice,
};
use crate::processors::convert_work_item;

/// Counters describing how a [`SoftwareDevice`] was driven.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SoftwareDeviceStats {
    pub initialized_id: Option<usize>,
    pub live_buffers: usize,
    pub dispatches: usize,
    pub blocking_reads: usize,
    pub deferred_reads: usize,
    pub released: bool,
}

#[derive(Debug, Default)]
struct State {
    buffers: HashMap<DeviceBufferId, Vec<u8>>,
    next_id: u64,
    stats: SoftwareDeviceStats,
}

/// Host-memory implementation of [`TransferDevice`].
#[derive(Debug, Default)]
pub struct SoftwareDevice {
    state: Mutex<State>,
    fail_init: bool,
}

impl SoftwareDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// A device whose initialisation always fails.
    pub fn failing() -> Self {
        Self {
            state: Mutex::default(),
            fail_init: true,
        }
    }

    /// Snapshot of the usage counters.
    pub fn stats(&self) -> SoftwareDeviceStats {
        let state = self.lock();
        SoftwareDeviceStats {
            live_buffers: state.buffers.len(),
            ..state.stats
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn bounds(offset: usize, len: usize, size: usize) -> Result<std::ops::Range<usize>, DeviceError> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(offset..end),
        _ => Err(DeviceError::OutOfBounds { offset, len, size }),
    }
}

impl TransferDevice for SoftwareDevice {
    fn initialize(&self, device_id: usize) -> Result<(), DeviceError> {
        if self.fail_init {
            return Err(DeviceError::Init {
                device_id,
                message: "software device configured to fail".to_string(),
            });
        }
        self.lock().stats.initialized_id = Some(device_id);
        debug!(device_id, "software device initialised");
        Ok(())
    }

    fn allocate(&self, bytes: usize) -> Result<DeviceBufferId, DeviceError> {
        let mut state = self.lock();
        state.next_id += 1;
        let id = DeviceBufferId(state.next_id);
        state.buffers.insert(id, vec![0; bytes]);
        Ok(id)
    }

    fn free(&self, buffer: DeviceBufferId) {
        self.lock().buffers.remove(&buffer);
    }

    fn write(&self, buffer: DeviceBufferId, offset: usize, src: &[u8]) -> Result<(), DeviceError> {
        let mut state = self.lock();
        let data = state
            .buffers
            .get_mut(&buffer)
            .ok_or(DeviceError::UnknownBuffer(buffer))?;
        let range = bounds(offset, src.len(), data.len())?;
        data[range].copy_from_slice(src);
        Ok(())
    }

    fn read(
        &self,
        buffer: DeviceBufferId,
        offset: usize,
        dst: &mut [u8],
        sync: SyncMode,
    ) -> Result<(), DeviceError> {
        let mut state = self.lock();
        let data = state
            .buffers
            .get(&buffer)
            .ok_or(DeviceError::UnknownBuffer(buffer))?;
        let range = bounds(offset, dst.len(), data.len())?;
        dst.copy_from_slice(&data[range]);
        match sync {
            SyncMode::Blocking => state.stats.blocking_reads += 1,
            SyncMode::Deferred => state.stats.deferred_reads += 1,
        }
        Ok(())
    }

    fn read_f32(
        &self,
        buffer: DeviceBufferId,
        dst: &mut [f32],
        sync: SyncMode,
    ) -> Result<(), DeviceError> {
        let mut state = self.lock();
        let data = state
            .buffers
            .get(&buffer)
            .ok_or(DeviceError::UnknownBuffer(buffer))?;
        let range = bounds(0, dst.len() * 4, data.len())?;
        for (value, bytes) in dst.iter_mut().zip(data[range].chunks_exact(4)) {
            *value = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        }
        match sync {
            SyncMode::Blocking => state.stats.blocking_reads += 1,
            SyncMode::Deferred => state.stats.deferred_reads += 1,
        }
        Ok(())
    }

    fn dispatch_convert(
        &self,
        kernel: ConvertKernel,
        args: &ConvertKernelArgs,
        geometry: DispatchGeometry,
    ) -> Result<(), DeviceError> {
        let mut state = self.lock();
        let dispatch_error = |message: String| DeviceError::Dispatch {
            kernel: kernel.name(),
            message,
        };

        let src = state
            .buffers
            .get(&args.src)
            .ok_or(DeviceError::UnknownBuffer(args.src))?
            .clone();
        if src.len() < args.image_elements() {
            return Err(dispatch_error(format!(
                "source holds {} bytes, kernel reads {}",
                src.len(),
                args.image_elements()
            )));
        }

        let dst = state
            .buffers
            .get_mut(&args.dst)
            .ok_or(DeviceError::UnknownBuffer(args.dst))?;
        let needed = (args.dst_offset as usize + args.image_elements()) * 4;
        if dst.len() < needed {
            return Err(dispatch_error(format!(
                "destination holds {} bytes, kernel writes up to {needed}",
                dst.len()
            )));
        }

        let mut tensor: Vec<f32> = dst
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        for global_id in 0..geometry.global {
            convert_work_item(kernel, args, &src, &mut tensor, global_id);
        }
        for (bytes, value) in dst.chunks_exact_mut(4).zip(&tensor) {
            bytes.copy_from_slice(&value.to_le_bytes());
        }

        state.stats.dispatches += 1;
        Ok(())
    }

    fn release(&self) {
        self.lock().stats.released = true;
    }
}
