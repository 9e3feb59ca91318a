//! Augmentation graph and node contracts.
//!
//! ```text
//! ┌─────────────┐ create(graph) ┌──────────────────┐ verify() ┌──────────────┐
//! │Augmentation │──────────────▶│AugmentationGraph │─────────▶│ process() ×N │
//! │Node (×N)    │  append(...)  │  (engine owned)  │          │              │
//! └─────────────┘               └──────────────────┘          └──────────────┘
//! ```
//!
//! Nodes describe themselves to the graph engine through [`NodeBinding`]s.
//! The engine owns kernel execution; the pipeline only sequences the calls.

use std::fmt::Debug;

use thiserror::Error;

use crate::domain::{ImageBuffer, ImageHandle, ImageInfo};
use crate::parameters::ParamHandle;

/// Errors reported by the graph engine or by nodes.
#[derive(Error, Debug)]
pub enum GraphError {
    /// The engine rejected the topology.
    #[error("graph verification failed: {message}")]
    Verification { message: String },

    /// A node could not be created or updated.
    #[error("node '{node}' failed: {message}")]
    Node { node: String, message: String },

    /// The engine could not back a virtual image.
    #[error("virtual image creation failed: {message}")]
    VirtualImage { message: String },

    /// Graph execution failed.
    #[error("graph execution failed: {message}")]
    Execution { message: String },
}

/// Identifier the engine assigns to an appended node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub usize);

/// Everything the engine needs to schedule one node.
#[derive(Debug, Clone)]
pub struct NodeBinding {
    /// Engine kernel name.
    pub kernel: String,
    pub inputs: Vec<ImageHandle>,
    pub outputs: Vec<ImageHandle>,
    /// Stochastic parameters read by the kernel on every execution.
    pub parameters: Vec<ParamHandle>,
}

impl NodeBinding {
    pub fn new(kernel: impl Into<String>) -> Self {
        Self {
            kernel: kernel.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            parameters: Vec::new(),
        }
    }

    pub fn input(mut self, image: ImageHandle) -> Self {
        self.inputs.push(image);
        self
    }

    pub fn output(mut self, image: ImageHandle) -> Self {
        self.outputs.push(image);
        self
    }

    pub fn parameter(mut self, parameter: ParamHandle) -> Self {
        self.parameters.push(parameter);
        self
    }
}

/// The external graph engine.
pub trait AugmentationGraph: Send + Debug {
    /// Creates the backing buffer of an image whose storage was deferred.
    fn create_virtual_image(&mut self, info: &ImageInfo) -> Result<ImageBuffer, GraphError>;

    /// Appends a node to the graph in execution order.
    fn append(&mut self, binding: NodeBinding) -> Result<NodeId, GraphError>;

    /// Finalises and checks the topology. Called once, after every node is appended.
    fn verify(&mut self) -> Result<(), GraphError>;

    /// Executes every node synchronously.
    fn process(&mut self) -> Result<(), GraphError>;

    /// Releases engine resources. Must tolerate repeated calls.
    fn release(&mut self);
}

/// One augmentation step as seen by the pipeline.
pub trait AugmentationNode: Send + Debug {
    /// Human-readable node name used in logs and errors.
    fn name(&self) -> &str;

    /// Images this node writes. Any still deferred at build time become
    /// virtual images backed by the engine.
    fn outputs(&self) -> &[ImageHandle];

    /// Adds the node to the engine's graph.
    fn create(&mut self, graph: &mut dyn AugmentationGraph) -> Result<(), GraphError>;

    /// Refreshes runtime state after the graph has executed.
    fn update_parameters(&mut self) -> Result<(), GraphError> {
        Ok(())
    }
}
