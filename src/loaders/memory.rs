//! In-memory loader module.

use std::path::PathBuf;

use image::DynamicImage;
use tracing::trace;

use crate::core::traits::{LoaderError, LoaderModule};
use crate::domain::ImageHandle;
use crate::pipeline::StageTimer;
use crate::utils::{fit_to, read_and_decode, to_format_bytes};

/// One entry of a [`MemoryLoader`] dataset.
#[derive(Debug, Clone)]
pub enum ImageSource {
    /// An image decoded by the caller.
    Decoded(DynamicImage),
    /// An encoded image file read and decoded on demand.
    Path(PathBuf),
}

impl From<DynamicImage> for ImageSource {
    fn from(image: DynamicImage) -> Self {
        ImageSource::Decoded(image)
    }
}

impl From<PathBuf> for ImageSource {
    fn from(path: PathBuf) -> Self {
        ImageSource::Path(path)
    }
}

/// Loader over a fixed list of images.
///
/// Each batch stacks `batch_size` consecutive images vertically into the bound
/// output image, resized to the output width and single-image height and
/// converted to its color format. A final partial batch is never delivered.
///
/// Timing reports `[load, decode]`: the file read and the image decode of
/// [`ImageSource::Path`] entries. Resizing and format packing are not counted,
/// and pre-decoded entries add nothing to either timer.
#[derive(Debug)]
pub struct MemoryLoader {
    sources: Vec<ImageSource>,
    cursor: usize,
    output: Option<ImageHandle>,
    staging: Vec<u8>,
    load_timer: StageTimer,
    decode_timer: StageTimer,
}

impl MemoryLoader {
    pub fn new<I, S>(sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ImageSource>,
    {
        Self {
            sources: sources.into_iter().map(Into::into).collect(),
            cursor: 0,
            output: None,
            staging: Vec::new(),
            load_timer: StageTimer::new(),
            decode_timer: StageTimer::new(),
        }
    }

    /// Total number of images in the dataset.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl LoaderModule for MemoryLoader {
    fn bind_output(&mut self, image: ImageHandle) -> Result<(), LoaderError> {
        let info = *image.info();
        if u32::try_from(info.width()).is_err() || u32::try_from(info.height_single()).is_err() {
            return Err(LoaderError::Mismatch {
                message: format!(
                    "output {}x{} exceeds decoder limits",
                    info.width(),
                    info.height_single()
                ),
            });
        }
        self.staging = vec![0; info.data_size()];
        self.output = Some(image);
        Ok(())
    }

    fn load_next(&mut self) -> Result<(), LoaderError> {
        let output = self.output.as_ref().ok_or(LoaderError::Unbound)?;
        let info = *output.info();
        let batch = info.batch_size();
        if self.remaining_count() < batch {
            return Err(LoaderError::Exhausted);
        }

        // bind_output checked both fit in u32
        let width = info.width() as u32;
        let height = info.height_single() as u32;
        let single = info.data_size() / batch;

        for (slot, source) in self.sources[self.cursor..self.cursor + batch]
            .iter()
            .enumerate()
        {
            let bytes = match source {
                ImageSource::Decoded(image) => {
                    to_format_bytes(&fit_to(image, width, height), info.color_format())
                }
                ImageSource::Path(path) => {
                    let (image, read, decode) = read_and_decode(path)?;
                    self.load_timer.record(read);
                    self.decode_timer.record(decode);
                    to_format_bytes(&fit_to(&image, width, height), info.color_format())
                }
            };
            self.staging[slot * single..(slot + 1) * single].copy_from_slice(&bytes);
        }

        output.upload(&self.staging)?;
        self.cursor += batch;
        trace!(remaining = self.remaining_count(), "memory loader delivered batch");
        Ok(())
    }

    fn reset(&mut self) {
        self.cursor = 0;
    }

    fn remaining_count(&self) -> usize {
        self.sources.len() - self.cursor
    }

    fn timing(&self) -> Vec<std::time::Duration> {
        vec![self.load_timer.total(), self.decode_timer.total()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ColorFormat, Image, ImageBuffer, ImageInfo, MemType};
    use image::{Luma, Rgb, RgbImage};
    use std::time::Duration;

    fn solid(value: u8) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(2, 2, Rgb([value, value / 2, 0])))
    }

    fn bound_loader(count: usize, batch: usize, format: ColorFormat) -> (MemoryLoader, ImageHandle) {
        let info = ImageInfo::new(2, 2, batch, format, MemType::Host).unwrap();
        let image = Image::with_buffer(info, ImageBuffer::Host(vec![0; info.data_size()])).unwrap();
        let mut loader = MemoryLoader::new((0..count).map(|i| solid(10 * (i as u8 + 1))));
        loader.bind_output(image.clone()).unwrap();
        (loader, image)
    }

    #[test]
    fn test_batches_stack_vertically() {
        let (mut loader, image) = bound_loader(4, 2, ColorFormat::Rgb24);
        loader.load_next().unwrap();

        let buffer = image.read();
        let bytes = buffer.as_host().unwrap();
        assert_eq!(&bytes[..3], &[10, 5, 0]);
        assert_eq!(&bytes[12..15], &[20, 10, 0]);
        assert_eq!(loader.remaining_count(), 2);
    }

    #[test]
    fn test_exhausted_without_full_batch() {
        let (mut loader, _image) = bound_loader(3, 2, ColorFormat::Gray8);
        loader.load_next().unwrap();
        assert!(matches!(loader.load_next(), Err(LoaderError::Exhausted)));
        assert_eq!(loader.remaining_count(), 1);

        loader.reset();
        assert_eq!(loader.remaining_count(), 3);
    }

    #[test]
    fn test_unbound_loader_fails() {
        let mut loader = MemoryLoader::new(vec![solid(1)]);
        assert!(matches!(loader.load_next(), Err(LoaderError::Unbound)));
    }

    #[test]
    fn test_resizes_and_converts() {
        let info = ImageInfo::new(2, 2, 1, ColorFormat::Gray8, MemType::Host).unwrap();
        let image = Image::with_buffer(info, ImageBuffer::Host(vec![0; 4])).unwrap();
        let big = DynamicImage::ImageLuma8(image::GrayImage::from_pixel(8, 8, Luma([77])));
        let mut loader = MemoryLoader::new(vec![big]);
        loader.bind_output(image.clone()).unwrap();
        loader.load_next().unwrap();

        assert_eq!(image.read().as_host().unwrap(), &[77, 77, 77, 77]);
        // resizing an already decoded image is neither load nor decode work
        assert_eq!(loader.timing(), vec![Duration::ZERO, Duration::ZERO]);
    }

    #[test]
    fn test_reads_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pixel.png");
        solid(40).save(&path).unwrap();

        let (_, image) = bound_loader(0, 1, ColorFormat::Bgr24);
        let mut loader = MemoryLoader::new(vec![path]);
        loader.bind_output(image.clone()).unwrap();
        loader.load_next().unwrap();

        assert_eq!(&image.read().as_host().unwrap()[..3], &[0, 20, 40]);
        let timing = loader.timing();
        assert_eq!(timing.len(), 2);
        assert!(timing[1] > Duration::ZERO);
    }
}
