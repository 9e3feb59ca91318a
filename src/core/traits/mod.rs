//! Trait definitions for the pipeline's external collaborators.
//!
//! The orchestrator drives three kinds of collaborators through these traits:
//! loader modules (`loader`), the augmentation graph engine and its nodes
//! (`graph`), and, for device-resident pipelines, the transfer device
//! (`device`).

pub mod device;
pub mod graph;
pub mod loader;

pub use device::{
    CONVERT_LOCAL_WORK_SIZE, ConvertKernel, ConvertKernelArgs, DeviceBuffer, DeviceBufferId,
    DeviceError, DispatchGeometry, SyncMode, TransferDevice,
};
pub use graph::{AugmentationGraph, AugmentationNode, GraphError, NodeBinding, NodeId};
pub use loader::{LoaderError, LoaderModule};
