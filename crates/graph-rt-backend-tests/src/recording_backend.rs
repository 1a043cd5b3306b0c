use std::path::Path;
use std::sync::{Arc, Mutex};

use graph_rt::backend::{Backend, BackendId, Handle, PerformanceCounter};
use graph_rt::graph::{Function, Node};
use graph_rt::tensor::{ElementType, Shape, Tensor, TensorDesc};
use graph_rt::Result;

/// Test-only backend wrapper that forwards to an inner backend and records every `call`
/// that reaches execution.
///
/// `call_with_validate` is left to the trait default, so a rejected validation is observable as
/// a call count that did not move.
pub struct RecordingBackend<B: ?Sized> {
    inner: Arc<B>,
    calls: Mutex<Vec<Vec<TensorDesc>>>,
}

impl<B: Backend + ?Sized> RecordingBackend<B> {
    pub fn new(inner: Arc<B>) -> Self {
        Self {
            inner,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("recording mutex poisoned").len()
    }

    /// Input descriptors of the most recent executed call.
    pub fn last_inputs(&self) -> Option<Vec<TensorDesc>> {
        self.calls
            .lock()
            .expect("recording mutex poisoned")
            .last()
            .cloned()
    }
}

impl<B: Backend + ?Sized> Backend for RecordingBackend<B> {
    fn name(&self) -> &str {
        "recording"
    }

    fn id(&self) -> BackendId {
        self.inner.id()
    }

    fn create_tensor(&self, element_type: ElementType, shape: Shape) -> Result<Tensor> {
        self.inner.create_tensor(element_type, shape)
    }

    fn compile(&self, function: &Function) -> Result<Handle> {
        self.inner.compile(function)
    }

    fn call(&self, handle: Handle, outputs: &[Tensor], inputs: &[Tensor]) -> Result<()> {
        self.calls
            .lock()
            .expect("recording mutex poisoned")
            .push(inputs.iter().map(|tensor| tensor.desc().clone()).collect());
        self.inner.call(handle, outputs, inputs)
    }

    fn remove_compiled_function(&self, handle: Handle) -> Result<()> {
        self.inner.remove_compiled_function(handle)
    }

    fn parameter_descriptors(&self, handle: Handle) -> Result<Vec<TensorDesc>> {
        self.inner.parameter_descriptors(handle)
    }

    fn result_descriptors(&self, handle: Handle) -> Result<Vec<TensorDesc>> {
        self.inner.result_descriptors(handle)
    }

    fn save(&self, handle: Handle, path: &Path) -> Result<()> {
        self.inner.save(handle, path)
    }

    fn load(&self, path: &Path) -> Result<Handle> {
        self.inner.load(path)
    }

    fn enable_performance_data(&self, enable: bool) {
        self.inner.enable_performance_data(enable)
    }

    fn get_performance_data(&self, handle: Handle) -> Result<Vec<PerformanceCounter>> {
        self.inner.get_performance_data(handle)
    }

    fn is_supported(&self, node: &Node) -> bool {
        self.inner.is_supported(node)
    }

    fn thread_safe_calls(&self) -> bool {
        self.inner.thread_safe_calls()
    }
}
