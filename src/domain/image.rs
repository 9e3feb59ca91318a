//! Image descriptors and buffers.
//!
//! An [`ImageInfo`] is the immutable shape of one pipeline buffer; an
//! [`Image`] owns the buffer itself. Buffers are released when the image is
//! released or dropped, whichever happens first.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use crate::core::errors::{PipelineError, PipelineResult};
use crate::core::traits::{DeviceBuffer, DeviceError, SyncMode};

/// Where a buffer lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemType {
    /// Host-accessible memory.
    Host,
    /// Accelerator memory reached through a transfer device.
    Device,
}

impl std::fmt::Display for MemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemType::Host => write!(f, "host"),
            MemType::Device => write!(f, "device"),
        }
    }
}

/// Pixel format of an 8-bit interleaved image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColorFormat {
    /// Single luminance plane.
    Gray8,
    /// Interleaved red, green, blue.
    Rgb24,
    /// Interleaved blue, green, red.
    Bgr24,
    /// Interleaved red, green, blue, alpha.
    Rgba32,
}

impl ColorFormat {
    /// Number of interleaved channels.
    pub fn plane_count(self) -> usize {
        match self {
            ColorFormat::Gray8 => 1,
            ColorFormat::Rgb24 | ColorFormat::Bgr24 => 3,
            ColorFormat::Rgba32 => 4,
        }
    }
}

/// Immutable description of one image buffer.
///
/// Equality is structural: two images share an `ImageInfo` only if every
/// field matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageInfo {
    width: usize,
    height: usize,
    batch_size: usize,
    color_planes: usize,
    color_format: ColorFormat,
    mem_type: MemType,
}

impl ImageInfo {
    /// Describes a batch of `batch_size` images stacked vertically.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for zero dimensions or batch size, or
    /// when the batched buffer size does not fit in `usize`.
    pub fn new(
        width: usize,
        height: usize,
        batch_size: usize,
        color_format: ColorFormat,
        mem_type: MemType,
    ) -> PipelineResult<Self> {
        if width == 0 || height == 0 || batch_size == 0 {
            return Err(PipelineError::config_error(format!(
                "image dimensions must be positive, got {width}x{height} with batch size {batch_size}"
            )));
        }

        let color_planes = color_format.plane_count();
        width
            .checked_mul(height)
            .and_then(|pixels| pixels.checked_mul(batch_size))
            .and_then(|pixels| pixels.checked_mul(color_planes))
            .ok_or_else(|| {
                PipelineError::config_error(format!(
                    "image {width}x{height} with batch size {batch_size} overflows the addressable size"
                ))
            })?;

        Ok(Self {
            width,
            height,
            batch_size,
            color_planes,
            color_format,
            mem_type,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Height of a single image in the batch.
    pub fn height_single(&self) -> usize {
        self.height
    }

    /// Height of the whole batch stacked vertically.
    pub fn height_batch(&self) -> usize {
        self.height * self.batch_size
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn color_plane_count(&self) -> usize {
        self.color_planes
    }

    pub fn color_format(&self) -> ColorFormat {
        self.color_format
    }

    pub fn mem_type(&self) -> MemType {
        self.mem_type
    }

    /// Pixels in one plane of the batched image.
    pub fn plane_size(&self) -> usize {
        self.width * self.height_batch()
    }

    /// Bytes needed for the batched buffer.
    pub fn data_size(&self) -> usize {
        self.plane_size() * self.color_planes
    }
}

/// Storage behind an [`Image`].
#[derive(Debug, Default)]
pub enum ImageBuffer {
    /// No storage yet; the image is virtual until the graph backs it.
    #[default]
    Deferred,
    /// Host memory.
    Host(Vec<u8>),
    /// Device memory.
    Device(DeviceBuffer),
}

impl ImageBuffer {
    /// Residency of the storage, `None` while deferred.
    pub fn mem_type(&self) -> Option<MemType> {
        match self {
            ImageBuffer::Deferred => None,
            ImageBuffer::Host(_) => Some(MemType::Host),
            ImageBuffer::Device(_) => Some(MemType::Device),
        }
    }

    /// Size in bytes; zero while deferred.
    pub fn len(&self) -> usize {
        match self {
            ImageBuffer::Deferred => 0,
            ImageBuffer::Host(bytes) => bytes.len(),
            ImageBuffer::Device(buffer) => buffer.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_host(&self) -> Option<&[u8]> {
        match self {
            ImageBuffer::Host(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_device(&self) -> Option<&DeviceBuffer> {
        match self {
            ImageBuffer::Device(buffer) => Some(buffer),
            _ => None,
        }
    }
}

/// Shared handle to an image; loaders, nodes and the pipeline all hold one.
pub type ImageHandle = Arc<Image>;

static NEXT_IMAGE_ID: AtomicU64 = AtomicU64::new(1);

/// One pipeline buffer together with its description.
#[derive(Debug)]
pub struct Image {
    id: u64,
    info: ImageInfo,
    buffer: RwLock<ImageBuffer>,
}

impl Image {
    /// Creates an image whose storage is created later by the graph engine.
    pub fn deferred(info: ImageInfo) -> ImageHandle {
        Arc::new(Self {
            id: NEXT_IMAGE_ID.fetch_add(1, Ordering::Relaxed),
            info,
            buffer: RwLock::new(ImageBuffer::Deferred),
        })
    }

    /// Creates an image backed by `buffer`.
    ///
    /// # Errors
    ///
    /// Fails if the buffer does not match the description.
    pub fn with_buffer(info: ImageInfo, buffer: ImageBuffer) -> PipelineResult<ImageHandle> {
        let image = Self::deferred(info);
        image.attach(buffer)?;
        Ok(image)
    }

    /// Process-unique id, stable for the life of the image.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn info(&self) -> &ImageInfo {
        &self.info
    }

    /// `true` while the image has no storage.
    pub fn is_virtual(&self) -> bool {
        matches!(*self.read(), ImageBuffer::Deferred)
    }

    /// Installs storage for a deferred image.
    ///
    /// # Errors
    ///
    /// Fails if the image already has storage or the buffer's size or
    /// residency differ from the description.
    pub fn attach(&self, buffer: ImageBuffer) -> PipelineResult<()> {
        let expected = self.info.data_size();
        if buffer.len() != expected {
            return Err(PipelineError::config_error(format!(
                "image {} expects {expected} bytes, buffer has {}",
                self.id,
                buffer.len()
            )));
        }
        if buffer.mem_type() != Some(self.info.mem_type()) {
            return Err(PipelineError::config_error(format!(
                "image {} is {}-resident, buffer is not",
                self.id,
                self.info.mem_type()
            )));
        }

        let mut slot = self.write();
        if !matches!(*slot, ImageBuffer::Deferred) {
            return Err(PipelineError::usage(format!(
                "image {} already has storage",
                self.id
            )));
        }
        *slot = buffer;
        Ok(())
    }

    /// Drops the storage, returning the image to the deferred state.
    pub fn release_buffer(&self) {
        *self.write() = ImageBuffer::Deferred;
    }

    /// Read access to the storage.
    pub fn read(&self) -> RwLockReadGuard<'_, ImageBuffer> {
        self.buffer.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write access to the storage.
    pub fn write(&self) -> RwLockWriteGuard<'_, ImageBuffer> {
        self.buffer.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the image contents with `bytes`, wherever the storage lives.
    ///
    /// # Errors
    ///
    /// Fails with `DeviceError::OutOfBounds` when the length does not match
    /// or the image has no storage.
    pub fn upload(&self, bytes: &[u8]) -> Result<(), DeviceError> {
        let size = self.info.data_size();
        if bytes.len() != size {
            return Err(DeviceError::OutOfBounds {
                offset: 0,
                len: bytes.len(),
                size,
            });
        }

        match &mut *self.write() {
            ImageBuffer::Host(dst) => {
                dst.copy_from_slice(bytes);
                Ok(())
            }
            ImageBuffer::Device(buffer) => buffer.write(0, bytes),
            ImageBuffer::Deferred => Err(DeviceError::OutOfBounds {
                offset: 0,
                len: bytes.len(),
                size: 0,
            }),
        }
    }

    /// Copies the image contents into `dst`.
    pub fn download(&self, dst: &mut [u8], sync: SyncMode) -> Result<(), DeviceError> {
        match &*self.read() {
            ImageBuffer::Host(src) => {
                let len = src.len().min(dst.len());
                dst[..len].copy_from_slice(&src[..len]);
                Ok(())
            }
            ImageBuffer::Device(buffer) => buffer.read(0, dst, sync),
            ImageBuffer::Deferred => Err(DeviceError::OutOfBounds {
                offset: 0,
                len: dst.len(),
                size: 0,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_info(width: usize, height: usize, batch: usize, format: ColorFormat) -> ImageInfo {
        ImageInfo::new(width, height, batch, format, MemType::Host).unwrap()
    }

    #[test]
    fn test_info_sizes() {
        let info = host_info(4, 2, 3, ColorFormat::Rgb24);
        assert_eq!(info.height_batch(), 6);
        assert_eq!(info.plane_size(), 24);
        assert_eq!(info.data_size(), 72);
        assert_eq!(info.color_plane_count(), 3);
    }

    #[test]
    fn test_info_equality_is_structural() {
        let a = host_info(4, 2, 1, ColorFormat::Rgb24);
        let b = host_info(4, 2, 1, ColorFormat::Rgb24);
        let bgr = host_info(4, 2, 1, ColorFormat::Bgr24);
        let device = ImageInfo::new(4, 2, 1, ColorFormat::Rgb24, MemType::Device).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, bgr);
        assert_ne!(a, device);
    }

    #[test]
    fn test_zero_dimensions_rejected() {
        assert!(ImageInfo::new(0, 2, 1, ColorFormat::Gray8, MemType::Host).is_err());
        assert!(ImageInfo::new(4, 2, 0, ColorFormat::Gray8, MemType::Host).is_err());
    }

    #[test]
    fn test_overflowing_size_rejected() {
        let error =
            ImageInfo::new(usize::MAX / 2, 4, 1, ColorFormat::Rgb24, MemType::Host).unwrap_err();
        assert!(error.to_string().contains("overflows"));
        assert!(ImageInfo::new(usize::MAX, 1, 2, ColorFormat::Gray8, MemType::Host).is_err());
        assert!(ImageInfo::new(usize::MAX / 3, 1, 1, ColorFormat::Rgb24, MemType::Host).is_ok());
    }

    #[test]
    fn test_deferred_image_attach() {
        let info = host_info(2, 2, 1, ColorFormat::Gray8);
        let image = Image::deferred(info);
        assert!(image.is_virtual());

        image.attach(ImageBuffer::Host(vec![0; 4])).unwrap();
        assert!(!image.is_virtual());

        let second = image.attach(ImageBuffer::Host(vec![0; 4]));
        assert!(second.is_err());
    }

    #[test]
    fn test_attach_rejects_wrong_size() {
        let image = Image::deferred(host_info(2, 2, 1, ColorFormat::Gray8));
        assert!(image.attach(ImageBuffer::Host(vec![0; 3])).is_err());
        assert!(image.is_virtual());
    }

    #[test]
    fn test_upload_download_and_release() {
        let info = host_info(2, 1, 1, ColorFormat::Gray8);
        let image = Image::with_buffer(info, ImageBuffer::Host(vec![0; 2])).unwrap();
        image.upload(&[7, 9]).unwrap();

        let mut out = [0u8; 2];
        image.download(&mut out, SyncMode::Blocking).unwrap();
        assert_eq!(out, [7, 9]);

        image.release_buffer();
        assert!(image.is_virtual());
        assert!(image.upload(&[1, 2]).is_err());
    }

    #[test]
    fn test_ids_are_unique() {
        let info = host_info(1, 1, 1, ColorFormat::Gray8);
        let a = Image::deferred(info);
        let b = Image::deferred(info);
        assert_ne!(a.id(), b.id());
    }
}
