//! Collaborator doubles shared by the pipeline tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::core::traits::{
    AugmentationGraph, AugmentationNode, DeviceBuffer, GraphError, LoaderError, LoaderModule,
    NodeBinding, NodeId, SyncMode, TransferDevice,
};
use crate::domain::{ImageBuffer, ImageHandle, ImageInfo, MemType};
use crate::parameters::ParamHandle;

/// What a [`ScriptedLoader`] has been asked to do.
#[derive(Debug, Default)]
pub struct LoaderProbe {
    pub loads: usize,
    pub resets: usize,
    pub bound: Option<ImageHandle>,
}

pub type Shared<T> = Arc<Mutex<T>>;

pub fn lock<T>(shared: &Shared<T>) -> MutexGuard<'_, T> {
    shared.lock().unwrap()
}

/// Loader with a fixed image count and an optional payload written per batch.
#[derive(Debug)]
pub struct ScriptedLoader {
    total: usize,
    remaining: usize,
    fail: bool,
    payload: Option<Vec<u8>>,
    timing: Vec<Duration>,
    probe: Shared<LoaderProbe>,
}

impl ScriptedLoader {
    pub fn new(remaining: usize) -> (Self, Shared<LoaderProbe>) {
        let probe: Shared<LoaderProbe> = Arc::new(Mutex::new(LoaderProbe::default()));
        let loader = Self {
            total: remaining,
            remaining,
            fail: false,
            payload: None,
            timing: vec![Duration::from_millis(2), Duration::from_millis(3)],
            probe: Arc::clone(&probe),
        };
        (loader, probe)
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_timing(mut self, timing: Vec<Duration>) -> Self {
        self.timing = timing;
        self
    }
}

impl LoaderModule for ScriptedLoader {
    fn bind_output(&mut self, image: ImageHandle) -> Result<(), LoaderError> {
        lock(&self.probe).bound = Some(image);
        Ok(())
    }

    fn load_next(&mut self) -> Result<(), LoaderError> {
        if self.fail {
            return Err(LoaderError::Io(std::io::Error::other("scripted failure")));
        }
        let mut probe = lock(&self.probe);
        let image = probe.bound.clone().ok_or(LoaderError::Unbound)?;
        let batch = image.info().batch_size();
        if self.remaining < batch {
            return Err(LoaderError::Exhausted);
        }
        if let Some(payload) = &self.payload {
            image.upload(payload)?;
        }
        self.remaining -= batch;
        probe.loads += 1;
        Ok(())
    }

    fn reset(&mut self) {
        self.remaining = self.total;
        lock(&self.probe).resets += 1;
    }

    fn remaining_count(&self) -> usize {
        self.remaining
    }

    fn timing(&self) -> Vec<Duration> {
        self.timing.clone()
    }
}

/// Everything a [`RecordingGraph`] saw.
#[derive(Debug, Default)]
pub struct GraphLog {
    pub events: Vec<String>,
    pub bindings: Vec<NodeBinding>,
    /// Parameter values observed by each `process` call.
    pub observed: Vec<Vec<f32>>,
    pub releases: usize,
}

impl GraphLog {
    pub fn count(&self, event: &str) -> usize {
        self.events.iter().filter(|e| e.as_str() == event).count()
    }
}

/// Graph engine double. The `copy` kernel copies its first input into every
/// output; other kernels only record their parameters.
#[derive(Debug)]
pub struct RecordingGraph {
    device: Option<Arc<dyn TransferDevice>>,
    fail_verify: bool,
    fail_process: bool,
    log: Shared<GraphLog>,
}

impl RecordingGraph {
    pub fn new() -> (Self, Shared<GraphLog>) {
        let log: Shared<GraphLog> = Arc::new(Mutex::new(GraphLog::default()));
        let graph = Self {
            device: None,
            fail_verify: false,
            fail_process: false,
            log: Arc::clone(&log),
        };
        (graph, log)
    }

    pub fn on_device(mut self, device: Arc<dyn TransferDevice>) -> Self {
        self.device = Some(device);
        self
    }

    pub fn failing_verify(mut self) -> Self {
        self.fail_verify = true;
        self
    }

    pub fn failing_process(mut self) -> Self {
        self.fail_process = true;
        self
    }

    fn run_binding(binding: &NodeBinding) -> Result<(), GraphError> {
        if binding.kernel != "copy" {
            return Ok(());
        }
        let Some(input) = binding.inputs.first() else {
            return Ok(());
        };
        let execution = |e: crate::core::traits::DeviceError| GraphError::Execution {
            message: e.to_string(),
        };
        let mut bytes = vec![0; input.info().data_size()];
        input.download(&mut bytes, SyncMode::Blocking).map_err(execution)?;
        for output in &binding.outputs {
            output.upload(&bytes).map_err(execution)?;
        }
        Ok(())
    }
}

impl AugmentationGraph for RecordingGraph {
    fn create_virtual_image(&mut self, info: &ImageInfo) -> Result<ImageBuffer, GraphError> {
        lock(&self.log).events.push("virtual".to_string());
        match (info.mem_type(), &self.device) {
            (MemType::Host, _) => Ok(ImageBuffer::Host(vec![0; info.data_size()])),
            (MemType::Device, Some(device)) => DeviceBuffer::allocate(device, info.data_size())
                .map(ImageBuffer::Device)
                .map_err(|e| GraphError::VirtualImage {
                    message: e.to_string(),
                }),
            (MemType::Device, None) => Err(GraphError::VirtualImage {
                message: "no device attached".to_string(),
            }),
        }
    }

    fn append(&mut self, binding: NodeBinding) -> Result<NodeId, GraphError> {
        let mut log = lock(&self.log);
        log.events.push(format!("append:{}", binding.kernel));
        log.bindings.push(binding);
        Ok(NodeId(log.bindings.len() - 1))
    }

    fn verify(&mut self) -> Result<(), GraphError> {
        lock(&self.log).events.push("verify".to_string());
        if self.fail_verify {
            return Err(GraphError::Verification {
                message: "scripted verification failure".to_string(),
            });
        }
        Ok(())
    }

    fn process(&mut self) -> Result<(), GraphError> {
        let mut log = lock(&self.log);
        log.events.push("process".to_string());
        if self.fail_process {
            return Err(GraphError::Execution {
                message: "scripted execution failure".to_string(),
            });
        }
        let observed: Vec<f32> = log
            .bindings
            .iter()
            .flat_map(|b| b.parameters.iter().map(ParamHandle::value))
            .collect();
        log.observed.push(observed);
        for binding in &log.bindings {
            Self::run_binding(binding)?;
        }
        Ok(())
    }

    fn release(&mut self) {
        let mut log = lock(&self.log);
        log.events.push("release".to_string());
        log.releases += 1;
    }
}

/// Node that copies `input` into its outputs through the `copy` kernel.
#[derive(Debug)]
pub struct PassThroughNode {
    input: ImageHandle,
    outputs: Vec<ImageHandle>,
    parameters: Vec<ParamHandle>,
    updates: Arc<AtomicUsize>,
}

impl PassThroughNode {
    pub fn new(input: ImageHandle, output: ImageHandle) -> Self {
        Self {
            input,
            outputs: vec![output],
            parameters: Vec::new(),
            updates: Arc::default(),
        }
    }

    pub fn with_parameter(mut self, parameter: ParamHandle) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Counter bumped by every `update_parameters` call.
    pub fn updates(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.updates)
    }
}

impl AugmentationNode for PassThroughNode {
    fn name(&self) -> &str {
        "pass_through"
    }

    fn outputs(&self) -> &[ImageHandle] {
        &self.outputs
    }

    fn create(&mut self, graph: &mut dyn AugmentationGraph) -> Result<(), GraphError> {
        let mut binding = NodeBinding::new("copy").input(Arc::clone(&self.input));
        for output in &self.outputs {
            binding = binding.output(Arc::clone(output));
        }
        for parameter in &self.parameters {
            binding = binding.parameter(parameter.clone());
        }
        graph.append(binding)?;
        Ok(())
    }

    fn update_parameters(&mut self) -> Result<(), GraphError> {
        self.updates.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
