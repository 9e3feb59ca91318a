//! Utility functions for turning decoded images into pipeline bytes.
//!
//! Loader modules decode with the `image` crate and hand the pipeline tightly
//! packed, interleaved 8-bit pixels in the layout a [`ColorFormat`] names.

use std::path::Path;
use std::time::{Duration, Instant};

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};

use crate::core::traits::LoaderError;
use crate::domain::ColorFormat;

/// Reads an encoded image file and decodes it, timing each half separately.
///
/// Returns the image together with the read and decode durations.
///
/// # Errors
///
/// Returns `LoaderError::Io` if the file cannot be read and
/// `LoaderError::Decode` if its contents are not a supported image.
pub fn read_and_decode(path: &Path) -> Result<(DynamicImage, Duration, Duration), LoaderError> {
    let start = Instant::now();
    let encoded = std::fs::read(path)?;
    let read = start.elapsed();

    let start = Instant::now();
    let decoded = image::load_from_memory(&encoded)?;
    Ok((decoded, read, start.elapsed()))
}

/// Resizes `img` to exactly `width` x `height` unless it already matches.
pub fn fit_to(img: &DynamicImage, width: u32, height: u32) -> DynamicImage {
    if img.dimensions() == (width, height) {
        img.clone()
    } else {
        img.resize_exact(width, height, FilterType::Triangle)
    }
}

/// Packs a decoded image into interleaved bytes of the given format.
///
/// # Arguments
///
/// * `img` - The decoded image, already at its target size
/// * `format` - Pixel layout of the returned bytes
pub fn to_format_bytes(img: &DynamicImage, format: ColorFormat) -> Vec<u8> {
    match format {
        ColorFormat::Gray8 => img.to_luma8().into_raw(),
        ColorFormat::Rgb24 => img.to_rgb8().into_raw(),
        ColorFormat::Bgr24 => {
            let mut bytes = img.to_rgb8().into_raw();
            for pixel in bytes.chunks_exact_mut(3) {
                pixel.swap(0, 2);
            }
            bytes
        }
        ColorFormat::Rgba32 => img.to_rgba8().into_raw(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn two_pixels() -> DynamicImage {
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(0, 0, Rgb([10, 20, 30]));
        img.put_pixel(1, 0, Rgb([40, 50, 60]));
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn test_rgb_and_bgr_bytes() {
        let img = two_pixels();
        assert_eq!(to_format_bytes(&img, ColorFormat::Rgb24), vec![10, 20, 30, 40, 50, 60]);
        assert_eq!(to_format_bytes(&img, ColorFormat::Bgr24), vec![30, 20, 10, 60, 50, 40]);
    }

    #[test]
    fn test_rgba_and_gray_sizes() {
        let img = two_pixels();
        assert_eq!(to_format_bytes(&img, ColorFormat::Rgba32).len(), 8);
        assert_eq!(to_format_bytes(&img, ColorFormat::Gray8).len(), 2);
    }

    #[test]
    fn test_fit_to_resizes_only_when_needed() {
        let img = two_pixels();
        assert_eq!(fit_to(&img, 2, 1).dimensions(), (2, 1));
        assert_eq!(fit_to(&img, 4, 3).dimensions(), (4, 3));
    }

    #[test]
    fn test_read_missing_file() {
        assert!(matches!(
            read_and_decode(Path::new("/nonexistent/image.png")),
            Err(LoaderError::Io(_))
        ));
    }
}
