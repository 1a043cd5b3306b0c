use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use graph_rt::backend::persist::{read_archive, write_archive};
use graph_rt::backend::{
    Backend, BackendId, BackendOptions, Handle, HandleTable, PerfRecorder, PerformanceCounter,
};
use graph_rt::graph::serialize::SerializedFunction;
use graph_rt::graph::{Function, Node};
use graph_rt::tensor::{ElementType, Shape, Tensor, TensorDesc};
use graph_rt::{Error, Result};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::kernels::Kernel;
use crate::plan::CompiledPlan;

const PLAN_MAGIC: &[u8; 8] = b"GRTCPUPL";
const PLAN_VERSION: u32 = 1;

/// On-disk form of a compiled CPU function. Plans are re-lowered on load.
#[derive(Serialize, Deserialize)]
struct SavedPlan {
    fingerprint: u64,
    function: SerializedFunction,
}

/// One handle's state. The plan may be shared with other handles compiled from structurally
/// equal functions; `function` is always the one this handle was compiled from.
struct CompiledEntry {
    function: Function,
    plan: Arc<CompiledPlan>,
    perf: PerfRecorder,
}

/// Reference CPU backend that lowers functions into step plans.
///
/// Compiled plans are memoized by function structure, so compiling the same graph twice reuses
/// one plan behind two independent handles. Calls only take a read lock on the handle table and
/// keep all intermediate values call-local, which makes concurrent calls on one handle safe.
/// Inputs are decoded before any output is written; a tensor passed as both input and output
/// observes the input value.
pub struct CpuBackend {
    id: BackendId,
    handles: RwLock<HandleTable<Arc<CompiledEntry>>>,
    plan_cache: Option<Mutex<LruCache<u64, Arc<CompiledPlan>>>>,
    perf_enabled: AtomicBool,
}

impl CpuBackend {
    pub const NAME: &'static str = "CPU";

    pub fn new(options: BackendOptions) -> Self {
        let id = BackendId::next();
        Self {
            id,
            handles: RwLock::new(HandleTable::new(id)),
            plan_cache: NonZeroUsize::new(options.plan_cache_capacity)
                .map(|capacity| Mutex::new(LruCache::new(capacity))),
            perf_enabled: AtomicBool::new(options.performance_data),
        }
    }

    /// Registry factory. The CPU family exposes a single device, index 0.
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

    /// Number of plans currently memoized.
    pub fn cached_plan_count(&self) -> usize {
        self.plan_cache
            .as_ref()
            .map(|cache| cache.lock().unwrap_or_else(PoisonError::into_inner).len())
            .unwrap_or(0)
    }

    fn entry(&self, handle: Handle) -> Result<Arc<CompiledEntry>> {
        self.handles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(handle)
            .cloned()
    }

    fn plan_for(&self, function: &Function) -> Result<Arc<CompiledPlan>> {
        let Some(cache) = &self.plan_cache else {
            return Ok(Arc::new(CompiledPlan::lower(self, function)?));
        };
        let key = function.fingerprint();
        let cached = cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned();
        if let Some(plan) = cached {
            if plan.graph == function.to_serialized()?.graph {
                debug!(fingerprint = key, "plan cache hit");
                return Ok(plan);
            }
        }
        debug!(fingerprint = key, "plan cache miss");
        let plan = Arc::new(CompiledPlan::lower(self, function)?);
        cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(key, Arc::clone(&plan));
        Ok(plan)
    }

    fn install(&self, function: &Function, plan: Arc<CompiledPlan>) -> Handle {
        let entry = Arc::new(CompiledEntry {
            function: function.clone(),
            perf: PerfRecorder::new(plan.perf_counters()),
            plan,
        });
        self.handles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entry)
    }
}

impl Backend for CpuBackend {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn id(&self) -> BackendId {
        self.id
    }

    fn create_tensor(&self, element_type: ElementType, shape: Shape) -> Result<Tensor> {
        Tensor::allocate(self.id, element_type, shape)
    }

    #[tracing::instrument(skip_all, fields(function = function.name()))]
    fn compile(&self, function: &Function) -> Result<Handle> {
        let plan = self.plan_for(function)?;
        debug!(
            steps = plan.steps.len(),
            slots = plan.slot_count,
            fingerprint = function.fingerprint(),
            "compiled"
        );
        Ok(self.install(function, plan))
    }

    fn call(&self, handle: Handle, outputs: &[Tensor], inputs: &[Tensor]) -> Result<()> {
        let entry = self.entry(handle)?;
        let timed = self.perf_enabled.load(Ordering::Relaxed);
        trace!(?handle, function = entry.function.name(), timed, "call");
        let durations = entry.plan.execute(outputs, inputs, timed)?;
        if timed {
            entry.perf.record(&durations);
        }
        Ok(())
    }

    fn remove_compiled_function(&self, handle: Handle) -> Result<()> {
        self.handles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(handle)?;
        debug!(?handle, "removed compiled function");
        Ok(())
    }

    fn parameter_descriptors(&self, handle: Handle) -> Result<Vec<TensorDesc>> {
        Ok(self.entry(handle)?.plan.parameters.clone())
    }

    fn result_descriptors(&self, handle: Handle) -> Result<Vec<TensorDesc>> {
        Ok(self
            .entry(handle)?
            .plan
            .results
            .iter()
            .map(|(_, desc)| desc.clone())
            .collect())
    }

    fn save(&self, handle: Handle, path: &Path) -> Result<()> {
        let entry = self.entry(handle)?;
        let function = &entry.function;
        let saved = SavedPlan {
            fingerprint: function.fingerprint(),
            function: function
                .to_serialized()
                .map_err(|err| Error::save(path, err))?,
        };
        write_archive(path, PLAN_MAGIC, PLAN_VERSION, &saved)?;
        debug!(path = %path.display(), function = function.name(), "saved compiled function");
        Ok(())
    }

    fn load(&self, path: &Path) -> Result<Handle> {
        let saved: SavedPlan = read_archive(path, PLAN_MAGIC, PLAN_VERSION)?;
        let function = saved
            .function
            .into_function()
            .map_err(|err| Error::load(path, err))?;
        if function.fingerprint() != saved.fingerprint {
            return Err(Error::load(path, "function fingerprint mismatch"));
        }
        let plan = self.plan_for(&function).map_err(|err| Error::load(path, err))?;
        debug!(path = %path.display(), function = function.name(), "loaded compiled function");
        Ok(self.install(&function, plan))
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

#[cfg(test)]
mod tests {
    use super::*;
    use graph_rt::graph::builders::{multiply, parameter};
    use std::env;
    use std::fs;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn square(name: &str) -> Function {
        let x = parameter(ElementType::F32, [2]).unwrap();
        let squared = multiply(&x, &x).unwrap();
        Function::with_name(name, [&squared], [x]).unwrap()
    }

    #[test]
    fn shared_plan_keeps_each_handle_function() {
        let backend = CpuBackend::new(BackendOptions::default());
        let alpha = backend.compile(&square("alpha")).unwrap();
        let beta = backend.compile(&square("beta")).unwrap();
        assert_eq!(backend.cached_plan_count(), 1);

        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let path = env::temp_dir().join(format!("graph_rt_cpu_named_{nanos}.plan"));
        backend.save(beta, &path).unwrap();
        let saved: SavedPlan = read_archive(&path, PLAN_MAGIC, PLAN_VERSION).unwrap();
        assert_eq!(saved.function.name, "beta");

        backend.save(alpha, &path).unwrap();
        let saved: SavedPlan = read_archive(&path, PLAN_MAGIC, PLAN_VERSION).unwrap();
        assert_eq!(saved.function.name, "alpha");
        fs::remove_file(&path).unwrap();
    }
}
