//! Reference host backends for graph-rt.
//!
//! * `CPU` lowers each function into a step plan once and memoizes plans by structure.
//! * `INTERPRETER` walks the graph on every call.
//!
//! Both register themselves with the graph-rt device registry when this crate is linked.

pub mod cpu;
pub mod interpreter;
pub mod kernels;
pub mod plan;

pub use cpu::CpuBackend;
pub use interpreter::InterpreterBackend;

/// Register the `CPU` and `INTERPRETER` families with the global backend registry.
///
/// This runs automatically the first time the registry is queried, but can also be called
/// manually; registering twice replaces the factories with identical ones.
pub fn register_cpu_backends() {
    graph_rt::backend::register_backend(CpuBackend::NAME, CpuBackend::create);
    graph_rt::backend::register_backend(InterpreterBackend::NAME, InterpreterBackend::create);
}

// Auto-register on first registry access
#[linkme::distributed_slice(graph_rt::backend::registry::BACKEND_REGISTRARS)]
static REGISTER_CPU_BACKENDS: fn() = register_cpu_backends;
