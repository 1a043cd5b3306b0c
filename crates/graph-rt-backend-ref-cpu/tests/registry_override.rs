//! Kept in its own test binary: the registry must not have been queried before the override.

use std::sync::Arc;

use graph_rt::backend::{get_registered_devices, register_backend, BackendOptions};
use graph_rt::{create_backend, Backend};
use graph_rt_backend_ref_cpu::{CpuBackend, InterpreterBackend};

#[test]
fn explicit_registration_before_first_lookup_survives_builtin_registrars() {
    register_backend(CpuBackend::NAME, |options: &BackendOptions| {
        Ok(Arc::new(InterpreterBackend::new(options.clone())) as Arc<dyn Backend>)
    });

    assert_eq!(create_backend("CPU").unwrap().name(), InterpreterBackend::NAME);
    assert!(get_registered_devices().contains(&CpuBackend::NAME.to_string()));
    assert_eq!(create_backend("cpu:0").unwrap().name(), InterpreterBackend::NAME);
}
