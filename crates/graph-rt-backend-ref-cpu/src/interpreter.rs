use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use graph_rt::backend::validate::check_supported;
use graph_rt::backend::{
    Backend, BackendId, BackendOptions, Handle, HandleTable, PerfRecorder, PerformanceCounter,
};
use graph_rt::graph::{Function, Node, NodeId, NodeKind};
use graph_rt::tensor::{ElementType, Shape, Tensor, TensorDesc};
use graph_rt::{Error, Result};
use tracing::trace;

use crate::kernels::{HostData, Kernel};

struct Interpreted {
    function: Function,
    perf: PerfRecorder,
}

/// Walks the graph node by node on every call, with fresh buffers each time.
///
/// Nothing is lowered ahead of time and there is no persistence. Concurrent calls on one
/// handle are safe: each call owns its values.
pub struct InterpreterBackend {
    id: BackendId,
    handles: RwLock<HandleTable<Arc<Interpreted>>>,
    perf_enabled: AtomicBool,
}

impl InterpreterBackend {
    pub const NAME: &'static str = "INTERPRETER";

    pub fn new(options: BackendOptions) -> Self {
        let id = BackendId::next();
        Self {
            id,
            handles: RwLock::new(HandleTable::new(id)),
            perf_enabled: AtomicBool::new(options.performance_data),
        }
    }

    pub fn create(options: &BackendOptions) -> Result<Arc<dyn Backend>> {
        if options.device_index != 0 {
            return Err(Error::NotFound(format!(
                "backend `{}:{}`",
                Self::NAME,
                options.device_index
            )));
        }
        Ok(Arc::new(Self::new(options.clone())))
    }

    fn entry(&self, handle: Handle) -> Result<Arc<Interpreted>> {
        self.handles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(handle)
            .cloned()
    }
}

fn op_nodes(function: &Function) -> impl Iterator<Item = &Node> {
    function
        .ordered_nodes()
        .iter()
        .filter(|node| matches!(node.kind(), NodeKind::Operation { .. }))
}

impl Backend for InterpreterBackend {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn id(&self) -> BackendId {
        self.id
    }

    fn create_tensor(&self, element_type: ElementType, shape: Shape) -> Result<Tensor> {
        Tensor::allocate(self.id, element_type, shape)
    }

    fn compile(&self, function: &Function) -> Result<Handle> {
        check_supported(self, function)?;
        let counters = op_nodes(function)
            .map(|node| PerformanceCounter::new(node.friendly_name(), node.type_name()))
            .collect();
        let entry = Arc::new(Interpreted {
            function: function.clone(),
            perf: PerfRecorder::new(counters),
        });
        Ok(self
            .handles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entry))
    }

    fn call(&self, handle: Handle, outputs: &[Tensor], inputs: &[Tensor]) -> Result<()> {
        let entry = self.entry(handle)?;
        let function = &entry.function;
        if inputs.len() != function.parameters().len()
            || outputs.len() != function.results().len()
        {
            return Err(Error::argument("argument count does not match the function"));
        }
        let timed = self.perf_enabled.load(Ordering::Relaxed);
        trace!(?handle, function = function.name(), "interpreting");

        let mut values: HashMap<NodeId, HostData> = HashMap::new();
        for (param, tensor) in function.parameters().iter().zip(inputs) {
            let value = tensor.with_bytes(|bytes| HostData::decode(&param.outputs()[0], bytes))?;
            values.insert(param.id(), value);
        }

        let mut durations = Vec::new();
        for node in function.ordered_nodes() {
            match node.kind() {
                NodeKind::Parameter => {}
                NodeKind::Constant { data } => {
                    values.insert(node.id(), HostData::decode(&node.outputs()[0], data)?);
                }
                NodeKind::Operation { .. } => {
                    let started = timed.then(Instant::now);
                    let kernel = Kernel::select(node).ok_or_else(|| {
                        Error::execution(format!("no kernel for {}", node.friendly_name()))
                    })?;
                    let operands = node
                        .inputs()
                        .iter()
                        .map(|input| {
                            values.get(&input.node().id()).ok_or_else(|| {
                                Error::execution(format!(
                                    "{} has no value",
                                    input.node().friendly_name()
                                ))
                            })
                        })
                        .collect::<Result<Vec<_>>>()?;
                    let value = kernel.run(&operands).map_err(|err| {
                        Error::execution(format!("{}: {err}", node.friendly_name()))
                    })?;
                    values.insert(node.id(), value);
                    if let Some(started) = started {
                        durations.push(started.elapsed());
                    }
                }
            }
        }

        for (result, tensor) in function.results().iter().zip(outputs) {
            let value = values.get(&result.node().id()).ok_or_else(|| {
                Error::execution(format!("result {result:?} has no value"))
            })?;
            tensor.with_bytes_mut(|bytes| value.encode_into(bytes))?;
        }
        if timed {
            entry.perf.record(&durations);
        }
        Ok(())
    }

    fn remove_compiled_function(&self, handle: Handle) -> Result<()> {
        self.handles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(handle)
            .map(drop)
    }

    fn parameter_descriptors(&self, handle: Handle) -> Result<Vec<TensorDesc>> {
        Ok(self.entry(handle)?.function.parameter_descriptors())
    }

    fn result_descriptors(&self, handle: Handle) -> Result<Vec<TensorDesc>> {
        Ok(self.entry(handle)?.function.result_descriptors())
    }

    fn enable_performance_data(&self, enable: bool) {
        self.perf_enabled.store(enable, Ordering::Relaxed);
    }

    fn get_performance_data(&self, handle: Handle) -> Result<Vec<PerformanceCounter>> {
        let entry = self.entry(handle)?;
        if !self.perf_enabled.load(Ordering::Relaxed) {
            return Ok(Vec::new());
        }
        Ok(entry.perf.snapshot())
    }

    fn is_supported(&self, node: &Node) -> bool {
        node.is_parameter() || node.is_constant() || Kernel::select(node).is_some()
    }

    fn thread_safe_calls(&self) -> bool {
        true
    }
}
