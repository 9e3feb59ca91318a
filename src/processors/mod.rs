//! Output tensor conversion utilities.
//!
//! # Modules
//!
//! * `conversion` - Index arithmetic shared by host and device conversion paths
//! * `normalization` - Per-channel multiplier/offset coefficients
//! * `types` - Type definitions used across the processors module

pub mod conversion;
mod normalization;
pub mod types;

pub use conversion::{ConversionShape, convert_image_into, convert_work_item};
pub use normalization::*;
pub use types::*;
