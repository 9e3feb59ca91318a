//! The pipeline orchestrator.
//!
//! [`MasterPipeline`] owns the loaders, the augmentation nodes, the graph
//! engine and the output tensor, and drives them through a strict lifecycle:
//!
//! ```text
//! Unbuilt ──build()──▶ Verified ──run()/copy*()──▶ Verified ──release()──▶ Released
//!    │                                                                        ▲
//!    └──────────────────────── build() failure ───────────────────────────────┘
//! ```
//!
//! Topology (loaders, images, nodes) can only change while unbuilt. A failed
//! build tears everything down; a failed iteration leaves the pipeline
//! verified and ready for the next `run()`.

use std::sync::Arc;

use tracing::{debug, info, info_span, warn};

use crate::backend::{DeviceBackend, HostBackend, OutputTensor, ResidencyBackend};
use crate::core::config::{Affinity, ConfigValidator, PipelineConfig};
use crate::core::errors::{IterationStage, PipelineError, PipelineResult};
use crate::core::traits::{
    AugmentationGraph, AugmentationNode, DeviceBuffer, GraphError, LoaderModule, TransferDevice,
};
use crate::domain::{ColorFormat, Image, ImageHandle, ImageInfo, MemType};
use crate::parameters::ParameterContext;
use crate::pipeline::stats::{PipelineTiming, StageTimer};
use crate::processors::{ConversionShape, NormalizeParams, Tensor4D, TensorLayout};

/// Lifecycle state of a [`MasterPipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Topology is still being declared.
    Unbuilt,
    /// Built and verified; iterations may run.
    Verified,
    /// Every resource has been freed. Terminal.
    Released,
}

/// Orchestrates loading, augmentation and output tensor materialization.
///
/// # Example
///
/// ```rust,no_run
/// # use augment_pipeline::prelude::*;
/// # fn demo(graph: Box<dyn AugmentationGraph>, loader: Box<dyn LoaderModule>) -> PipelineResult<()> {
/// let config = PipelineConfig::new(4);
/// let mut pipeline = MasterPipeline::new(config, graph, None)?;
///
/// let info = ImageInfo::new(224, 224, 4, ColorFormat::Rgb24, MemType::Host)?;
/// pipeline.add_loader(loader, info, true)?;
/// pipeline.build()?;
///
/// let mut tensor = vec![0.0; pipeline.output_tensor_len()?];
/// while pipeline.remaining_images_count() >= 4 {
///     pipeline.run()?;
///     pipeline.copy_out_tensor(&mut tensor, TensorLayout::Nchw, &NormalizeParams::imagenet()?)?;
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct MasterPipeline {
    state: PipelineState,
    config: PipelineConfig,
    mem_type: MemType,
    backend: Option<Box<dyn ResidencyBackend>>,
    graph: Option<Box<dyn AugmentationGraph>>,
    nodes: Vec<Box<dyn AugmentationNode>>,
    loaders: Vec<Box<dyn LoaderModule>>,
    output_images: Vec<ImageHandle>,
    internal_images: Vec<ImageHandle>,
    output_info: Option<ImageInfo>,
    output_tensor: Option<OutputTensor>,
    parameters: ParameterContext,
    process_timer: StageTimer,
    convert_timer: StageTimer,
}

impl MasterPipeline {
    /// Creates an unbuilt pipeline.
    ///
    /// GPU affinity needs a transfer device, which is initialised for the
    /// configured accelerator id. CPU affinity ignores `device`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an invalid `config` and a
    /// construction error if the backend cannot be created. The graph is
    /// released before either is returned.
    pub fn new(
        config: PipelineConfig,
        mut graph: Box<dyn AugmentationGraph>,
        device: Option<Arc<dyn TransferDevice>>,
    ) -> PipelineResult<Self> {
        let backend = config
            .validate()
            .map_err(PipelineError::from)
            .and_then(|()| Self::create_backend(&config, device));
        let backend = match backend {
            Ok(backend) => backend,
            Err(e) => {
                warn!(error = %e, "pipeline construction failed");
                graph.release();
                return Err(e);
            }
        };

        let parameters = config
            .seed
            .map_or_else(ParameterContext::new, ParameterContext::seeded);
        let mem_type = config.mem_type();
        debug!(batch_size = config.batch_size, %mem_type, "pipeline created");

        Ok(Self {
            state: PipelineState::Unbuilt,
            config,
            mem_type,
            backend: Some(backend),
            graph: Some(graph),
            nodes: Vec::new(),
            loaders: Vec::new(),
            output_images: Vec::new(),
            internal_images: Vec::new(),
            output_info: None,
            output_tensor: None,
            parameters,
            process_timer: StageTimer::new(),
            convert_timer: StageTimer::new(),
        })
    }

    fn create_backend(
        config: &PipelineConfig,
        device: Option<Arc<dyn TransferDevice>>,
    ) -> PipelineResult<Box<dyn ResidencyBackend>> {
        match config.affinity {
            Affinity::Cpu => {
                if device.is_some() {
                    debug!("CPU affinity, ignoring the supplied transfer device");
                }
                Ok(Box::new(HostBackend::new(config.cpu_threads)?))
            }
            Affinity::Gpu => {
                let device = device.ok_or_else(|| {
                    PipelineError::construction_message("GPU affinity requires a transfer device")
                })?;
                Ok(Box::new(DeviceBackend::new(device, config.effective_gpu_id())?))
            }
        }
    }

    /// Registers a loader and creates the image it writes into.
    ///
    /// The loader's image is always allocated, never virtual. It joins the
    /// output set when `is_output` is set and the internal set otherwise.
    pub fn add_loader(
        &mut self,
        mut loader: Box<dyn LoaderModule>,
        info: ImageInfo,
        is_output: bool,
    ) -> PipelineResult<ImageHandle> {
        self.ensure_unbuilt("add_loader")?;
        let image = self.allocate_image(info)?;
        loader.bind_output(Arc::clone(&image)).map_err(|e| {
            PipelineError::config_error(format!("loader rejected its output image: {e}"))
        })?;

        self.loaders.push(loader);
        if is_output {
            self.output_images.push(Arc::clone(&image));
        } else {
            self.internal_images.push(Arc::clone(&image));
        }
        Ok(image)
    }

    /// Creates an image for node wiring.
    ///
    /// Output images are allocated immediately. Other images stay virtual and
    /// are backed by the graph engine at build time if a node produces them.
    pub fn create_image(&mut self, info: ImageInfo, is_output: bool) -> PipelineResult<ImageHandle> {
        self.ensure_unbuilt("create_image")?;
        if !is_output {
            self.check_image_info(&info)?;
            return Ok(Image::deferred(info));
        }

        let image = self.allocate_image(info)?;
        self.output_images.push(Arc::clone(&image));
        Ok(image)
    }

    /// Appends an augmentation node. Nodes are created in insertion order.
    pub fn add_node(&mut self, node: Box<dyn AugmentationNode>) -> PipelineResult<()> {
        self.ensure_unbuilt("add_node")?;
        debug!(node = node.name(), "node added");
        self.nodes.push(node);
        Ok(())
    }

    /// The parameter context nodes draw their stochastic parameters from.
    pub fn parameters_mut(&mut self) -> &mut ParameterContext {
        &mut self.parameters
    }

    pub fn parameters(&self) -> &ParameterContext {
        &self.parameters
    }

    /// Validates the outputs, allocates the output tensor and builds the graph.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when there are no outputs, when output
    /// descriptions differ, or when the graph engine rejects the topology.
    /// Any failure releases the pipeline.
    pub fn build(&mut self) -> PipelineResult<()> {
        let span = info_span!("pipeline.build", outputs = self.output_images.len());
        let _guard = span.enter();

        match self.state {
            PipelineState::Unbuilt => {}
            PipelineState::Verified => return Err(PipelineError::usage("pipeline is already built")),
            PipelineState::Released => {
                return Err(PipelineError::usage("cannot build a released pipeline"));
            }
        }

        match self.try_build() {
            Ok(()) => {
                self.state = PipelineState::Verified;
                info!(
                    outputs = self.output_images.len(),
                    nodes = self.nodes.len(),
                    loaders = self.loaders.len(),
                    "pipeline built"
                );
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "build failed, releasing pipeline");
                self.release();
                Err(e)
            }
        }
    }

    fn try_build(&mut self) -> PipelineResult<()> {
        let info = *self
            .output_images
            .first()
            .ok_or_else(|| PipelineError::config_error("no outputs configured"))?
            .info();
        if let Some((index, image)) = self
            .output_images
            .iter()
            .enumerate()
            .find(|(_, image)| *image.info() != info)
        {
            return Err(PipelineError::config_error(format!(
                "dimension mismatch: output image {index} is {:?}, expected {info:?}",
                image.info()
            )));
        }

        self.output_info = Some(info);
        self.allocate_output_tensor(&info)?;
        self.materialize_virtual_images()?;
        self.create_graph()
    }

    fn allocate_output_tensor(&mut self, info: &ImageInfo) -> PipelineResult<()> {
        let elements = ConversionShape::from_info(info)
            .image_elements()
            .checked_mul(self.output_images.len())
            .ok_or_else(|| {
                PipelineError::config_error(format!(
                    "{} outputs of {info:?} overflow the output tensor size",
                    self.output_images.len()
                ))
            })?;
        let backend = self.backend()?;
        let tensor = backend.allocate_tensor(elements)?;
        debug!(elements, residency = %tensor.mem_type(), "output tensor allocated");
        self.output_tensor = Some(tensor);
        Ok(())
    }

    /// Backs every still-deferred node output with an engine buffer.
    fn materialize_virtual_images(&mut self) -> PipelineResult<()> {
        let graph = self
            .graph
            .as_deref_mut()
            .ok_or_else(|| PipelineError::usage("graph has been released"))?;

        for node in &self.nodes {
            for image in node.outputs() {
                if !image.is_virtual() {
                    continue;
                }
                let buffer = graph
                    .create_virtual_image(image.info())
                    .map_err(|e| graph_build_error(node.name(), e))?;
                image.attach(buffer)?;
                self.internal_images.push(Arc::clone(image));
            }
        }
        Ok(())
    }

    fn create_graph(&mut self) -> PipelineResult<()> {
        let graph = self
            .graph
            .as_deref_mut()
            .ok_or_else(|| PipelineError::usage("graph has been released"))?;

        for node in &mut self.nodes {
            node.create(graph).map_err(|e| graph_build_error(node.name(), e))?;
        }
        graph.verify().map_err(|e| graph_build_error("graph", e))
    }

    /// Executes one iteration.
    ///
    /// Parameters are resampled once, every loader advances, the graph runs
    /// and nodes refresh their runtime state.
    ///
    /// # Errors
    ///
    /// Returns a usage error if the pipeline is not verified, with no effect
    /// on loaders or graph. Loader and graph failures are iteration errors
    /// and leave the pipeline verified.
    pub fn run(&mut self) -> PipelineResult<()> {
        let span = info_span!("pipeline.run", generation = self.parameters.generation());
        let _guard = span.enter();

        self.ensure_verified("run")?;
        self.parameters.resample_all();

        let loaders = &mut self.loaders;
        let nodes = &mut self.nodes;
        let graph = self
            .graph
            .as_deref_mut()
            .ok_or_else(|| PipelineError::usage("graph has been released"))?;

        self.process_timer.time(|| -> PipelineResult<()> {
            for (index, loader) in loaders.iter_mut().enumerate() {
                loader.load_next().map_err(|e| {
                    warn!(loader = index, error = %e, "loader failed to supply the next batch");
                    PipelineError::iteration(
                        IterationStage::Load,
                        format!("loader {index} failed to load the next batch"),
                        e,
                    )
                })?;
            }

            graph.process()?;

            for node in nodes.iter_mut() {
                node.update_parameters().map_err(|e| {
                    PipelineError::iteration(
                        IterationStage::Process,
                        format!("updating parameters of node '{}'", node.name()),
                        e,
                    )
                })?;
            }
            Ok(())
        })?;

        debug!(
            remaining = self.remaining_images_count(),
            process_ms = self.process_timer.total().as_secs_f64() * 1000.0,
            "iteration complete"
        );
        Ok(())
    }

    /// Rewinds every loader to its first image.
    pub fn reset_loaders(&mut self) {
        for loader in &mut self.loaders {
            loader.reset();
        }
    }

    /// Images left in the shortest loader; zero without loaders.
    pub fn remaining_images_count(&self) -> usize {
        self.loaders
            .iter()
            .map(|loader| loader.remaining_count())
            .min()
            .unwrap_or(0)
    }

    pub fn output_image_count(&self) -> usize {
        self.output_images.len()
    }

    /// Shared description of the output images.
    ///
    /// # Errors
    ///
    /// Returns a usage error before a successful build.
    pub fn output_info(&self) -> PipelineResult<ImageInfo> {
        self.output_info
            .ok_or_else(|| PipelineError::usage("output description is known only after build"))
    }

    pub fn output_color_format(&self) -> PipelineResult<ColorFormat> {
        Ok(self.output_info()?.color_format())
    }

    pub fn output_width(&self) -> PipelineResult<usize> {
        Ok(self.output_info()?.width())
    }

    /// Batched height of the output images.
    pub fn output_height(&self) -> PipelineResult<usize> {
        Ok(self.output_info()?.height_batch())
    }

    /// Number of `f32` elements `copy_out_tensor` writes.
    pub fn output_tensor_len(&self) -> PipelineResult<usize> {
        self.output_tensor
            .as_ref()
            .map(OutputTensor::elements)
            .ok_or_else(|| PipelineError::usage("output tensor is allocated only after build"))
    }

    /// Copies the raw bytes of every output image, in registration order.
    ///
    /// # Errors
    ///
    /// Returns `BufferTooSmall` if `dst` cannot hold every output image.
    pub fn copy_output(&mut self, dst: &mut [u8]) -> PipelineResult<()> {
        self.ensure_verified("copy_output")?;
        let backend = self
            .backend
            .as_deref()
            .ok_or_else(|| PipelineError::usage("backend has been released"))?;
        let images = &self.output_images;
        self.convert_timer.time(|| backend.copy(images, dst))
    }

    /// Raw copy into a caller-owned device buffer. Not supported.
    pub fn copy_output_to_device(&mut self, _dst: &DeviceBuffer) -> PipelineResult<()> {
        self.ensure_verified("copy_output_to_device")?;
        Err(PipelineError::not_implemented("raw copy into a device buffer"))
    }

    /// Writes the normalized batch tensor into `dst` in the requested layout.
    ///
    /// Each element is `offset[k] + multiplier[k] * source[k']` where `k'` is
    /// `planes - 1 - k` when channels are reversed and `k` otherwise.
    ///
    /// # Errors
    ///
    /// Returns `Unsupported` for more than three color planes,
    /// `BufferTooSmall` if `dst` is shorter than the tensor, and an
    /// iteration error if a device transfer fails.
    pub fn copy_out_tensor(
        &mut self,
        dst: &mut [f32],
        layout: TensorLayout,
        params: &NormalizeParams,
    ) -> PipelineResult<()> {
        self.ensure_verified("copy_out_tensor")?;
        params.validate()?;
        ConversionShape::from_info(&self.output_info()?).check_normalizable()?;

        let tensor = self
            .output_tensor
            .as_ref()
            .ok_or_else(|| PipelineError::usage("output tensor has been released"))?;
        PipelineError::check_buffer(tensor.elements(), dst.len())?;
        let backend = self
            .backend
            .as_deref()
            .ok_or_else(|| PipelineError::usage("backend has been released"))?;
        let images = &self.output_images;

        self.convert_timer
            .time(|| backend.transform_copy(images, tensor, dst, layout, params))
    }

    /// Materializes the normalized batch as a four-dimensional array.
    ///
    /// The shape is `(n, h, w, c)` for NHWC and `(n, c, h, w)` for NCHW, where
    /// `h` is the batched height.
    pub fn output_tensor4d(
        &mut self,
        layout: TensorLayout,
        params: &NormalizeParams,
    ) -> PipelineResult<Tensor4D> {
        let info = self.output_info()?;
        let mut data = vec![0.0; self.output_tensor_len()?];
        self.copy_out_tensor(&mut data, layout, params)?;

        let (n, h, w, c) = (
            self.output_images.len(),
            info.height_batch(),
            info.width(),
            info.color_plane_count(),
        );
        let shape = match layout {
            TensorLayout::Nhwc => (n, h, w, c),
            TensorLayout::Nchw => (n, c, h, w),
        };
        Ok(Tensor4D::from_shape_vec(shape, data)?)
    }

    /// Residency of the pipeline's buffers.
    pub fn mem_type(&self) -> MemType {
        self.mem_type
    }

    /// Accumulated stage timings.
    ///
    /// Load and decode times are summed over loaders reporting both.
    pub fn timing(&self) -> PipelineTiming {
        let mut timing = PipelineTiming {
            process: self.process_timer.total(),
            convert: self.convert_timer.total(),
            ..PipelineTiming::default()
        };
        for loader in &self.loaders {
            let stages = loader.timing();
            if stages.len() < 2 {
                continue;
            }
            timing.load += stages[0];
            timing.decode += stages[1];
        }
        timing
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn is_verified(&self) -> bool {
        self.state == PipelineState::Verified
    }

    pub fn has_output_tensor(&self) -> bool {
        self.output_tensor.is_some()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Frees every resource the pipeline owns. Idempotent.
    ///
    /// The graph is released first, then images, the output tensor and
    /// finally the backend with its device context.
    pub fn release(&mut self) {
        if self.state == PipelineState::Released {
            return;
        }
        let was_verified = self.state == PipelineState::Verified;
        self.state = PipelineState::Released;

        if let Some(mut graph) = self.graph.take() {
            graph.release();
        }
        self.nodes.clear();
        self.loaders.clear();
        for image in self
            .internal_images
            .drain(..)
            .chain(self.output_images.drain(..))
        {
            image.release_buffer();
        }
        self.output_tensor = None;
        self.output_info = None;
        if let Some(backend) = self.backend.take() {
            backend.release();
        }

        info!(was_verified, "pipeline released");
    }

    fn backend(&self) -> PipelineResult<&dyn ResidencyBackend> {
        self.backend
            .as_deref()
            .ok_or_else(|| PipelineError::usage("backend has been released"))
    }

    fn allocate_image(&self, info: ImageInfo) -> PipelineResult<ImageHandle> {
        self.check_image_info(&info)?;
        let buffer = self.backend()?.allocate_image(&info)?;
        Image::with_buffer(info, buffer)
    }

    fn check_image_info(&self, info: &ImageInfo) -> PipelineResult<()> {
        if info.mem_type() != self.mem_type {
            return Err(PipelineError::config_error(format!(
                "image is {}-resident but the pipeline is {}-resident",
                info.mem_type(),
                self.mem_type
            )));
        }
        if info.batch_size() != self.config.batch_size {
            return Err(PipelineError::config_error(format!(
                "image batch size {} differs from pipeline batch size {}",
                info.batch_size(),
                self.config.batch_size
            )));
        }
        Ok(())
    }

    fn ensure_unbuilt(&self, operation: &str) -> PipelineResult<()> {
        match self.state {
            PipelineState::Unbuilt => Ok(()),
            PipelineState::Verified => Err(PipelineError::usage(format!(
                "{operation} is not allowed after build"
            ))),
            PipelineState::Released => Err(PipelineError::usage(format!(
                "{operation} called on a released pipeline"
            ))),
        }
    }

    fn ensure_verified(&self, operation: &str) -> PipelineResult<()> {
        match self.state {
            PipelineState::Verified => Ok(()),
            PipelineState::Unbuilt => Err(PipelineError::usage(format!(
                "{operation} called before a successful build"
            ))),
            PipelineState::Released => Err(PipelineError::usage(format!(
                "{operation} called on a released pipeline"
            ))),
        }
    }
}

impl Drop for MasterPipeline {
    fn drop(&mut self) {
        self.release();
    }
}

fn graph_build_error(stage: &str, error: GraphError) -> PipelineError {
    PipelineError::config_error(format!("{stage}: {error}"))
}
