use std::sync::Arc;

use graph_rt::backend::BackendOptions;
use graph_rt_backend_ref_cpu::{CpuBackend, InterpreterBackend};

fn cpu() -> Arc<CpuBackend> {
    Arc::new(CpuBackend::new(BackendOptions::default()))
}

fn cpu_without_plan_cache() -> Arc<CpuBackend> {
    Arc::new(CpuBackend::new(BackendOptions {
        plan_cache_capacity: 0,
        ..BackendOptions::default()
    }))
}

fn interpreter() -> Arc<InterpreterBackend> {
    Arc::new(InterpreterBackend::new(BackendOptions::default()))
}

fn registered_cpu() -> Arc<dyn graph_rt::Backend> {
    graph_rt_backend_ref_cpu::register_cpu_backends();
    graph_rt::create_backend("CPU").unwrap()
}

graph_rt_backend_tests::define_backend_tests!(cpu_suite, cpu);
graph_rt_backend_tests::define_backend_tests!(cpu_uncached_suite, cpu_without_plan_cache);
graph_rt_backend_tests::define_backend_tests!(interpreter_suite, interpreter);
graph_rt_backend_tests::define_backend_tests!(registered_cpu_suite, registered_cpu);
