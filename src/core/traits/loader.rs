//! Loader module contract.
//!
//! A loader module produces one decoded batch per call into the image it was
//! bound to. Prefetching, if any, stays inside the implementation.

use std::fmt::Debug;
use std::time::Duration;

use thiserror::Error;

use super::device::DeviceError;
use crate::domain::ImageHandle;

/// Errors reported by loader modules.
#[derive(Error, Debug)]
pub enum LoaderError {
    /// Fewer images remain than one batch needs.
    #[error("not enough images left for another batch")]
    Exhausted,

    /// `load_next` was called before an output image was bound.
    #[error("no output image bound to the loader")]
    Unbound,

    /// The bound output image does not fit this loader.
    #[error("output image rejected: {message}")]
    Mismatch { message: String },

    /// An image could not be read.
    #[error("failed to read image source")]
    Io(#[from] std::io::Error),

    /// An image could not be decoded.
    #[error("failed to decode image")]
    Decode(#[from] image::ImageError),

    /// Uploading the batch to device memory failed.
    #[error("failed to upload batch")]
    Device(#[from] DeviceError),
}

/// A source of decoded image batches.
pub trait LoaderModule: Send + Debug {
    /// Binds the image this loader writes each batch into.
    fn bind_output(&mut self, image: ImageHandle) -> Result<(), LoaderError>;

    /// Loads and decodes the next batch into the bound image.
    fn load_next(&mut self) -> Result<(), LoaderError>;

    /// Restarts the source from its first image.
    fn reset(&mut self);

    /// Number of images not yet delivered.
    fn remaining_count(&self) -> usize;

    /// Accumulated stage durations, `[load, decode]` when both are tracked.
    fn timing(&self) -> Vec<Duration>;
}
