//! Domain-level structures shared across the pipeline.
//!
//! This module holds the image descriptors and buffers that flow from loader
//! modules through the augmentation graph into the output tensor.

pub mod image;

pub use image::{ColorFormat, Image, ImageBuffer, ImageHandle, ImageInfo, MemType};
