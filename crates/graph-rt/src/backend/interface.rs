//! The backend contract: tensor allocation, compilation, execution, and persistence.

use std::path::Path;
use std::ptr::NonNull;

use crate::backend::handle::{BackendId, Handle};
use crate::backend::perf::PerformanceCounter;
use crate::backend::validate::validate_call;
use crate::error::{Error, Result};
use crate::graph::{Function, Node};
use crate::tensor::{ElementType, NativeElement, Shape, Tensor, TensorDesc};

/// Construction options handed to backend factories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendOptions {
    /// Sub-device index parsed from `FAMILY:<index>`; 0 when the name has no suffix.
    pub device_index: usize,
    /// Whether performance counters are collected from the start.
    pub performance_data: bool,
    /// Capacity of the compiled-plan memo, for backends that keep one. 0 disables it.
    pub plan_cache_capacity: usize,
}

impl BackendOptions {
    /// Defaults overridden by `GRAPHRT_PERF_DATA` and `GRAPHRT_PLAN_CACHE`.
    pub fn from_env() -> Self {
        Self {
            device_index: 0,
            performance_data: crate::env::perf_data_enabled(),
            plan_cache_capacity: crate::env::plan_cache_capacity(),
        }
    }
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            device_index: 0,
            performance_data: false,
            plan_cache_capacity: 64,
        }
    }
}

/// A pluggable compiler and executor for one hardware target.
///
/// All methods take `&self`; implementations keep their compiled state behind interior
/// locking so a backend can be shared as `Arc<dyn Backend>`.
///
/// # Handles
///
/// [`compile`](Backend::compile) and [`load`](Backend::load) move a function into the
/// compiled state and return a [`Handle`].
/// [`remove_compiled_function`](Backend::remove_compiled_function) moves it to the removed state.
/// Every operation that takes a handle fails with [`Error::InvalidHandle`] for removed handles,
/// unknown handles, and handles issued by another backend instance.
///
/// # Concurrency
///
/// [`thread_safe_calls`](Backend::thread_safe_calls) states whether concurrent `call`s on one
/// handle are safe. When it returns `false`, callers must serialize calls per handle.
pub trait Backend: Send + Sync {
    /// Registered family name, e.g. `"CPU"`.
    fn name(&self) -> &str;

    /// Identity stamped into every handle and owned tensor this instance issues.
    fn id(&self) -> BackendId;

    /// Allocates a backend-owned tensor of `element_count(shape) * size_in_bytes(type)` bytes.
    fn create_tensor(&self, element_type: ElementType, shape: Shape) -> Result<Tensor>;

    /// Wraps caller-owned memory. The backend never frees it.
    ///
    /// # Safety
    ///
    /// Same contract as [`Tensor::from_external`]: `ptr` must stay valid for `len` bytes for
    /// the whole lifetime of the returned tensor and every clone of it.
    unsafe fn create_tensor_with_memory(
        &self,
        element_type: ElementType,
        shape: Shape,
        ptr: NonNull<u8>,
        len: usize,
    ) -> Result<Tensor> {
        Tensor::from_external(element_type, shape, ptr, len)
    }

    /// Lowers `function` into an executable artifact.
    ///
    /// Fails with [`Error::CompilationError`] when any node is rejected by
    /// [`is_supported`](Backend::is_supported); no handle is produced in that case.
    fn compile(&self, function: &Function) -> Result<Handle>;

    /// Executes a compiled function. Arguments are positional: `inputs` follow the function's
    /// parameter order, `outputs` its result order.
    ///
    /// Backends may skip argument checks here; passing mismatched tensors is the caller's
    /// responsibility. Use [`call_with_validate`](Backend::call_with_validate) for checked calls.
    fn call(&self, handle: Handle, outputs: &[Tensor], inputs: &[Tensor]) -> Result<()>;

    /// Checks argument counts, element types, and shapes against the compiled signature, then
    /// calls. Nothing executes and no output is touched when validation fails.
    fn call_with_validate(
        &self,
        handle: Handle,
        outputs: &[Tensor],
        inputs: &[Tensor],
    ) -> Result<()> {
        let parameters = self.parameter_descriptors(handle)?;
        let results = self.result_descriptors(handle)?;
        validate_call(&parameters, &results, outputs, inputs)?;
        self.call(handle, outputs, inputs)
    }

    /// Releases the compiled state behind `handle`.
    fn remove_compiled_function(&self, handle: Handle) -> Result<()>;

    fn parameter_descriptors(&self, handle: Handle) -> Result<Vec<TensorDesc>>;

    fn result_descriptors(&self, handle: Handle) -> Result<Vec<TensorDesc>>;

    /// Persists the compiled artifact. Backends without persistence report [`Error::SaveError`].
    fn save(&self, handle: Handle, path: &Path) -> Result<()> {
        self.parameter_descriptors(handle)?;
        Err(Error::save(
            path,
            format!("{} does not support saving", self.name()),
        ))
    }

    /// Restores an artifact written by [`save`](Backend::save) into a fresh handle.
    fn load(&self, path: &Path) -> Result<Handle> {
        Err(Error::load(
            path,
            format!("{} does not support loading", self.name()),
        ))
    }

    /// Turns per-operation timing on or off for subsequent calls.
    fn enable_performance_data(&self, enable: bool);

    /// Counters accumulated for `handle`; empty while collection is disabled.
    fn get_performance_data(&self, handle: Handle) -> Result<Vec<PerformanceCounter>>;

    /// Whether this backend can execute `node`. Pure query.
    fn is_supported(&self, node: &Node) -> bool;

    /// Whether concurrent `call`s on the same handle are safe without external locking.
    fn thread_safe_calls(&self) -> bool {
        false
    }
}

/// Generic conveniences layered over any [`Backend`].
pub trait BackendExt: Backend {
    /// Allocates a tensor whose element type is derived from `T`.
    fn create_tensor_for<T: NativeElement>(&self, shape: impl Into<Shape>) -> Result<Tensor> {
        self.create_tensor(T::ELEMENT_TYPE, shape.into())
    }

    /// Allocates a tensor of `T` and fills it with `values`.
    fn tensor_from_slice<T: NativeElement>(
        &self,
        shape: impl Into<Shape>,
        values: &[T],
    ) -> Result<Tensor> {
        let tensor = self.create_tensor_for::<T>(shape)?;
        tensor.write_slice(values)?;
        Ok(tensor)
    }

    /// Allocates one output tensor per result of a compiled function.
    fn create_result_tensors(&self, handle: Handle) -> Result<Vec<Tensor>> {
        self.result_descriptors(handle)?
            .into_iter()
            .map(|desc| self.create_tensor(desc.element_type, desc.shape))
            .collect()
    }
}

impl<B: Backend + ?Sized> BackendExt for B {}
