//! # Augment Pipeline
//!
//! Orchestration core of a batched image-augmentation pipeline that feeds
//! machine-learning training and inference loops.
//!
//! ## Features
//!
//! - Strict build, verify and run lifecycle around an external graph engine
//! - Multi-source loading with fail-fast iteration and shortest-source counting
//! - Per-iteration resampling of stochastic augmentation parameters
//! - Normalized NHWC/NCHW tensor materialization with channel reversal
//! - Host-resident and device-resident buffers behind one backend interface
//!
//! ## Modules
//!
//! * [`core`] - Configuration, errors and collaborator traits
//! * [`domain`] - Image descriptors and buffers
//! * [`parameters`] - Stochastic parameter context
//! * [`processors`] - Normalization coefficients and conversion index arithmetic
//! * [`backend`] - Host and device residency backends
//! * [`loaders`] - Loader module implementations
//! * [`pipeline`] - The orchestrator and its timing
//! * [`utils`] - Image packing helpers and logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use augment_pipeline::prelude::*;
//! # fn demo(graph: Box<dyn AugmentationGraph>) -> PipelineResult<()> {
//!
//! augment_pipeline::utils::init_tracing();
//!
//! let config = PipelineConfig::from_json_str(r#"{ "batch_size": 2, "cpu_threads": 4 }"#)?;
//! let mut pipeline = MasterPipeline::new(config, graph, None)?;
//!
//! let loader = MemoryLoader::new(vec![
//!     std::path::PathBuf::from("a.jpg"),
//!     std::path::PathBuf::from("b.jpg"),
//! ]);
//! let info = ImageInfo::new(224, 224, 2, ColorFormat::Rgb24, MemType::Host)?;
//! pipeline.add_loader(Box::new(loader), info, true)?;
//! pipeline.build()?;
//!
//! pipeline.run()?;
//! let tensor = pipeline.output_tensor4d(TensorLayout::Nchw, &NormalizeParams::imagenet()?)?;
//! println!("{:?}\n{}", tensor.shape(), pipeline.timing());
//! # Ok(())
//! # }
//! ```

// Core modules
pub mod core;
pub mod domain;

pub mod backend;
pub mod loaders;
pub mod parameters;
pub mod pipeline;
pub mod processors;
pub mod utils;

/// Prelude module for convenient imports.
///
/// ```rust
/// use augment_pipeline::prelude::*;
/// ```
///
/// Included items cover building and driving a pipeline. Backends, kernel
/// argument blocks and conversion helpers are imported from their modules.
pub mod prelude {
    pub use crate::core::config::{Affinity, PipelineConfig};
    pub use crate::core::errors::{ErrorCategory, PipelineError, PipelineResult};
    pub use crate::core::traits::{AugmentationGraph, AugmentationNode, LoaderModule, TransferDevice};
    pub use crate::domain::{ColorFormat, ImageHandle, ImageInfo, MemType};
    pub use crate::loaders::MemoryLoader;
    pub use crate::parameters::{ParamDistribution, ParamHandle, ParameterContext};
    pub use crate::pipeline::{MasterPipeline, PipelineTiming};
    pub use crate::processors::{NormalizeParams, Tensor4D, TensorLayout};
}
