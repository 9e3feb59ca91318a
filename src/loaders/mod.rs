//! Loader module implementations.
//!
//! Production decoders (JPEG readers, video demuxers, record files) plug in
//! through [`LoaderModule`](crate::core::traits::LoaderModule); this crate
//! ships an in-memory source for tests and small datasets.

mod memory;

pub use memory::{ImageSource, MemoryLoader};
