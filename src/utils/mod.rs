//! Utility functions for the augmentation pipeline.
//!
//! This module provides image packing helpers used by loader modules and the
//! logging setup.

pub mod image;

pub use self::image::{fit_to, read_and_decode, to_format_bytes};

/// Initializes the tracing subscriber for logging.
///
/// This function sets up the tracing subscriber with environment filter and formatting layer.
/// It's typically called at the start of an application to enable logging.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();
}
