use std::sync::Arc;

use graph_rt::backend::{
    create_backend_with_options, get_registered_devices, has_backend, register_backend,
    BackendOptions,
};
use graph_rt::graph::builders::{add, parameter};
use graph_rt::{create_backend, Backend, BackendExt, ElementType, Error, Function};
use graph_rt_backend_ref_cpu::{register_cpu_backends, CpuBackend, InterpreterBackend};

fn doubling_function() -> Function {
    let x = parameter(ElementType::F32, [3]).unwrap();
    let doubled = add(&x, &x).unwrap();
    Function::new([&doubled], [x]).unwrap()
}

#[test]
fn linked_backends_are_registered() {
    register_cpu_backends();
    let devices = get_registered_devices();
    assert!(devices.contains(&CpuBackend::NAME.to_string()), "{devices:?}");
    assert!(
        devices.contains(&InterpreterBackend::NAME.to_string()),
        "{devices:?}"
    );
    let mut sorted = devices.clone();
    sorted.sort();
    assert_eq!(devices, sorted);
}

#[test]
fn device_names_resolve_case_insensitively() {
    register_cpu_backends();
    for (name, expected) in [
        ("CPU", "CPU"),
        ("cpu", "CPU"),
        ("Cpu:0", "CPU"),
        (" interpreter ", "INTERPRETER"),
    ] {
        assert!(has_backend(name), "{name}");
        assert_eq!(create_backend(name).unwrap().name(), expected);
    }
}

#[test]
fn unknown_devices_are_not_found() {
    register_cpu_backends();
    for name in ["TPU", "CPU:1", "INTERPRETER:2", "", "CPU:x", ":0"] {
        let err = create_backend(name).err();
        assert!(matches!(err, Some(Error::NotFound(_))), "{name}: {err:?}");
    }
    assert!(!has_backend("TPU"));
}

#[test]
fn each_create_yields_an_independent_instance() {
    register_cpu_backends();
    let first = create_backend("CPU").unwrap();
    let second = create_backend("CPU").unwrap();
    assert_ne!(first.id(), second.id());

    let handle = first.compile(&doubling_function()).unwrap();
    assert_eq!(
        second.parameter_descriptors(handle),
        Err(Error::InvalidHandle)
    );
}

#[test]
fn registered_factories_receive_parsed_options() {
    register_backend("ECHO", |options: &BackendOptions| {
        let mut options = options.clone();
        options.device_index = 0;
        Ok(Arc::new(InterpreterBackend::new(options)) as Arc<dyn Backend>)
    });
    assert!(has_backend("echo:7"));
    let backend = create_backend_with_options(
        "echo:7",
        BackendOptions {
            performance_data: true,
            ..BackendOptions::default()
        },
    )
    .unwrap();

    let handle = backend.compile(&doubling_function()).unwrap();
    let input = backend.tensor_from_slice([3], &[1.0f32, 2.0, 3.0]).unwrap();
    let outputs = backend.create_result_tensors(handle).unwrap();
    backend.call_with_validate(handle, &outputs, &[input]).unwrap();
    assert_eq!(outputs[0].to_vec::<f32>().unwrap(), vec![2.0, 4.0, 6.0]);
    assert_eq!(backend.get_performance_data(handle).unwrap().len(), 1);
}

#[test]
fn structurally_equal_functions_share_a_cached_plan() {
    let backend = CpuBackend::new(BackendOptions::default());
    let first = backend.compile(&doubling_function()).unwrap();
    let second = backend.compile(&doubling_function()).unwrap();
    assert_ne!(first, second);
    assert_eq!(backend.cached_plan_count(), 1);

    let x = parameter(ElementType::F32, [4]).unwrap();
    let other = Function::new([&add(&x, &x).unwrap()], [x]).unwrap();
    backend.compile(&other).unwrap();
    assert_eq!(backend.cached_plan_count(), 2);

    backend.remove_compiled_function(first).unwrap();
    let input = backend.tensor_from_slice([3], &[0.5f32; 3]).unwrap();
    let outputs = backend.create_result_tensors(second).unwrap();
    backend.call_with_validate(second, &outputs, &[input]).unwrap();
    assert_eq!(outputs[0].to_vec::<f32>().unwrap(), vec![1.0; 3]);
}

#[test]
fn plan_cache_can_be_disabled() {
    let backend = CpuBackend::new(BackendOptions {
        plan_cache_capacity: 0,
        ..BackendOptions::default()
    });
    backend.compile(&doubling_function()).unwrap();
    backend.compile(&doubling_function()).unwrap();
    assert_eq!(backend.cached_plan_count(), 0);
}

#[test]
fn cpu_outputs_may_alias_inputs() {
    let backend = CpuBackend::new(BackendOptions::default());
    let handle = backend.compile(&doubling_function()).unwrap();
    let tensor = backend.tensor_from_slice([3], &[1.0f32, -2.0, 3.5]).unwrap();
    backend
        .call_with_validate(handle, &[tensor.clone()], &[tensor.clone()])
        .unwrap();
    assert_eq!(tensor.to_vec::<f32>().unwrap(), vec![2.0, -4.0, 7.0]);
}

#[test]
fn interpreter_outputs_may_alias_inputs() {
    let backend = InterpreterBackend::new(BackendOptions::default());
    let handle = backend.compile(&doubling_function()).unwrap();
    let tensor = backend.tensor_from_slice([3], &[1.0f32, -2.0, 3.5]).unwrap();
    backend
        .call_with_validate(handle, &[tensor.clone()], &[tensor.clone()])
        .unwrap();
    assert_eq!(tensor.to_vec::<f32>().unwrap(), vec![2.0, -4.0, 7.0]);
}
