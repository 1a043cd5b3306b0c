//! Behaviour every backend must share, written against the public contract only.

use std::ptr::NonNull;
use std::sync::Arc;
use std::thread;

use graph_rt::graph::builders::{
    abs, add, constant_fill, convert, divide, maximum, multiply, negative, parameter, reshape,
    sqrt, subtract,
};
use graph_rt::graph::op::infer_unary_elementwise;
use graph_rt::graph::{register_op, Attrs, Node, OpDef};
use graph_rt::{Backend, BackendExt, ElementType, Error, Function, Shape, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::all_close::{all_close_f, first_mismatch};
use crate::recording_backend::RecordingBackend;

const SCENARIO_SHAPE: [usize; 4] = [2, 2, 2, 2];

/// `(0.5 + a) * (0.5 + b)` over two `f32[2,2,2,2]` parameters.
pub fn add_multiply_function() -> Function {
    let tensor0 = constant_fill(SCENARIO_SHAPE, 0.5f32).unwrap();
    let tensor1 = parameter(ElementType::F32, SCENARIO_SHAPE).unwrap();
    let tensor2 = constant_fill(SCENARIO_SHAPE, 0.5f32).unwrap();
    let tensor3 = parameter(ElementType::F32, SCENARIO_SHAPE).unwrap();
    let add0 = add(&tensor0, &tensor1).unwrap();
    let add1 = add(&tensor2, &tensor3).unwrap();
    let mul = multiply(&add0, &add1).unwrap();
    Function::with_name("add_multiply", [&mul], [tensor1, tensor3]).unwrap()
}

fn filled<B: Backend + ?Sized>(backend: &Arc<B>, shape: [usize; 4], value: f32) -> Tensor {
    backend
        .tensor_from_slice(shape, &vec![value; shape.iter().product()])
        .unwrap()
}

fn assert_all_close(expected: &[f32], actual: &[f32]) {
    assert!(
        all_close_f(expected, actual, 24, 2),
        "first mismatch at {:?}: expected {expected:?}, got {actual:?}",
        first_mismatch(expected, actual, 24, 2)
    );
}

pub fn add_multiply_end_to_end<B: Backend + ?Sized>(backend: &Arc<B>) {
    let function = add_multiply_function();
    let handle = backend.compile(&function).unwrap();

    let input0 = filled(backend, SCENARIO_SHAPE, 1.0);
    let input1 = filled(backend, SCENARIO_SHAPE, 2.0);
    let output = backend
        .create_tensor(ElementType::F32, Shape::from(SCENARIO_SHAPE))
        .unwrap();
    backend
        .call_with_validate(handle, &[output.clone()], &[input0, input1])
        .unwrap();

    let values = output.to_vec::<f32>().unwrap();
    assert_eq!(values.len(), 16);
    assert_all_close(&[3.75; 16], &values);
}

pub fn descriptors_match_function<B: Backend + ?Sized>(backend: &Arc<B>) {
    let function = add_multiply_function();
    let handle = backend.compile(&function).unwrap();
    assert_eq!(
        backend.parameter_descriptors(handle).unwrap(),
        function.parameter_descriptors()
    );
    assert_eq!(
        backend.result_descriptors(handle).unwrap(),
        function.result_descriptors()
    );

    let outputs = backend.create_result_tensors(handle).unwrap();
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].desc(), &function.result_descriptors()[0]);
    assert_eq!(outputs[0].to_vec::<f32>().unwrap(), vec![0.0; 16]);
}

pub fn validation_rejects_mismatched_arguments<B: Backend + ?Sized>(backend: &Arc<B>) {
    let function = add_multiply_function();
    let handle = backend.compile(&function).unwrap();
    let good = filled(backend, SCENARIO_SHAPE, 1.0);
    let output = filled(backend, SCENARIO_SHAPE, 7.0);

    let wrong_shape = backend
        .tensor_from_slice([2, 2], &[1.0f32; 4])
        .unwrap();
    let err = backend
        .call_with_validate(handle, &[output.clone()], &[good.clone(), wrong_shape])
        .unwrap_err();
    assert!(matches!(err, Error::ArgumentMismatch(_)), "{err}");

    let wrong_type = backend
        .create_tensor(ElementType::I32, Shape::from(SCENARIO_SHAPE))
        .unwrap();
    let err = backend
        .call_with_validate(handle, &[output.clone()], &[wrong_type, good.clone()])
        .unwrap_err();
    assert!(matches!(err, Error::ArgumentMismatch(_)), "{err}");

    let err = backend
        .call_with_validate(handle, &[output.clone()], &[good.clone()])
        .unwrap_err();
    assert!(matches!(err, Error::ArgumentMismatch(_)), "{err}");

    let bad_output = backend.create_tensor(ElementType::F32, Shape::new([16])).unwrap();
    let err = backend
        .call_with_validate(handle, &[bad_output], &[good.clone(), good])
        .unwrap_err();
    assert!(matches!(err, Error::ArgumentMismatch(_)), "{err}");

    assert_eq!(output.to_vec::<f32>().unwrap(), vec![7.0; 16]);
}

pub fn rejected_validation_never_executes<B: Backend + ?Sized>(backend: &Arc<B>) {
    let recording = RecordingBackend::new(Arc::clone(backend));
    let handle = recording.compile(&add_multiply_function()).unwrap();
    let input = recording
        .tensor_from_slice(SCENARIO_SHAPE, &[1.0f32; 16])
        .unwrap();
    let wrong = recording.tensor_from_slice([4, 4], &[1.0f32; 16]).unwrap();
    let output = recording.create_result_tensors(handle).unwrap();

    assert!(recording
        .call_with_validate(handle, &output, &[input.clone(), wrong])
        .is_err());
    assert_eq!(recording.call_count(), 0);

    recording
        .call_with_validate(handle, &output, &[input.clone(), input])
        .unwrap();
    assert_eq!(recording.call_count(), 1);
    assert_eq!(
        recording.last_inputs().unwrap(),
        vec![output[0].desc().clone(), output[0].desc().clone()]
    );
}

/// `sqrt(|max(a + b, a * b) - b|)`, a small graph mixing every float elementwise family.
fn mixed_float_function() -> Function {
    let a = parameter(ElementType::F32, [3, 5]).unwrap();
    let b = parameter(ElementType::F32, [3, 5]).unwrap();
    let sum = add(&a, &b).unwrap();
    let product = multiply(&a, &b).unwrap();
    let larger = maximum(&sum, &product).unwrap();
    let shifted = subtract(&larger, &b).unwrap();
    let root = sqrt(abs(&shifted).unwrap()).unwrap();
    Function::new([&root], [a, b]).unwrap()
}

pub fn compile_is_idempotent<B: Backend + ?Sized>(backend: &Arc<B>) {
    let function = mixed_float_function();
    let first = backend.compile(&function).unwrap();
    let second = backend.compile(&function).unwrap();
    assert_ne!(first, second);

    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..3 {
        let a: Vec<f32> = (0..15).map(|_| rng.gen_range(-4.0..4.0)).collect();
        let b: Vec<f32> = (0..15).map(|_| rng.gen_range(-4.0..4.0)).collect();
        let inputs = [
            backend.tensor_from_slice([3, 5], &a).unwrap(),
            backend.tensor_from_slice([3, 5], &b).unwrap(),
        ];
        let out_first = backend.create_result_tensors(first).unwrap();
        let out_second = backend.create_result_tensors(second).unwrap();
        backend.call_with_validate(first, &out_first, &inputs).unwrap();
        backend.call_with_validate(second, &out_second, &inputs).unwrap();

        let expected: Vec<f32> = a
            .iter()
            .zip(&b)
            .map(|(&x, &y)| ((x + y).max(x * y) - y).abs().sqrt())
            .collect();
        assert_eq!(out_first[0].snapshot(), out_second[0].snapshot());
        assert_all_close(&expected, &out_first[0].to_vec::<f32>().unwrap());
    }
}

pub fn removed_handle_is_invalid<B: Backend + ?Sized>(backend: &Arc<B>) {
    let function = add_multiply_function();
    let kept = backend.compile(&function).unwrap();
    let removed = backend.compile(&function).unwrap();
    backend.remove_compiled_function(removed).unwrap();

    let inputs = [
        filled(backend, SCENARIO_SHAPE, 1.0),
        filled(backend, SCENARIO_SHAPE, 2.0),
    ];
    let outputs = backend.create_result_tensors(kept).unwrap();

    assert_eq!(
        backend.call(removed, &outputs, &inputs),
        Err(Error::InvalidHandle)
    );
    assert_eq!(
        backend.call_with_validate(removed, &outputs, &inputs),
        Err(Error::InvalidHandle)
    );
    assert_eq!(
        backend.parameter_descriptors(removed),
        Err(Error::InvalidHandle)
    );
    assert_eq!(
        backend.get_performance_data(removed),
        Err(Error::InvalidHandle)
    );
    assert_eq!(
        backend.remove_compiled_function(removed),
        Err(Error::InvalidHandle)
    );

    backend.call_with_validate(kept, &outputs, &inputs).unwrap();
    assert_all_close(&[3.75; 16], &outputs[0].to_vec::<f32>().unwrap());
}

/// Handles are scoped to the backend instance that issued them.
pub fn foreign_handle_is_invalid<B: Backend + ?Sized>(backend: &Arc<B>, other: &Arc<B>) {
    let function = add_multiply_function();
    let foreign = other.compile(&function).unwrap();
    let inputs = [
        filled(backend, SCENARIO_SHAPE, 1.0),
        filled(backend, SCENARIO_SHAPE, 2.0),
    ];
    let outputs = [filled(backend, SCENARIO_SHAPE, 0.0)];

    assert_eq!(
        backend.call(foreign, &outputs, &inputs),
        Err(Error::InvalidHandle)
    );
    assert_eq!(
        backend.result_descriptors(foreign),
        Err(Error::InvalidHandle)
    );
    assert_eq!(
        backend.remove_compiled_function(foreign),
        Err(Error::InvalidHandle)
    );
    other.call(foreign, &outputs, &inputs).unwrap();
}

pub fn performance_data_follows_toggle<B: Backend + ?Sized>(backend: &Arc<B>) {
    backend.enable_performance_data(false);
    let handle = backend.compile(&add_multiply_function()).unwrap();
    let inputs = [
        filled(backend, SCENARIO_SHAPE, 1.0),
        filled(backend, SCENARIO_SHAPE, 2.0),
    ];
    let outputs = backend.create_result_tensors(handle).unwrap();

    backend.call(handle, &outputs, &inputs).unwrap();
    assert!(backend.get_performance_data(handle).unwrap().is_empty());

    backend.enable_performance_data(true);
    backend.call(handle, &outputs, &inputs).unwrap();
    backend.call(handle, &outputs, &inputs).unwrap();
    let counters = backend.get_performance_data(handle).unwrap();
    backend.enable_performance_data(false);

    assert_eq!(counters.len(), 3);
    assert_eq!(
        counters.iter().filter(|counter| counter.op() == "Add").count(),
        2
    );
    assert_eq!(
        counters.iter().filter(|counter| counter.op() == "Multiply").count(),
        1
    );
    for counter in &counters {
        assert_eq!(counter.call_count(), 2, "{}", counter.name());
        assert!(counter.name().starts_with(counter.op()));
    }
}

pub fn unsupported_nodes_fail_compilation<B: Backend + ?Sized>(backend: &Arc<B>) {
    let flags = parameter(ElementType::BOOLEAN, [4]).unwrap();
    let sum = add(&flags, &flags).unwrap();
    assert!(!backend.is_supported(&sum));
    let function = Function::new([&sum], [flags]).unwrap();
    let err = backend.compile(&function).unwrap_err();
    assert!(matches!(err, Error::CompilationError(_)), "{err}");

    // Ops registered after the backend was built have no kernel anywhere.
    register_op(OpDef::new("ConformanceIdentity", 1, infer_unary_elementwise));
    let input = parameter(ElementType::F32, [2]).unwrap();
    let custom = Node::operation("ConformanceIdentity", vec![input.clone().into()], Attrs::new())
        .unwrap();
    assert!(!backend.is_supported(&custom));
    let function = Function::new([&custom], [input]).unwrap();
    let err = backend.compile(&function).unwrap_err();
    assert!(matches!(err, Error::CompilationError(_)), "{err}");
}

pub fn integer_and_structural_ops<B: Backend + ?Sized>(backend: &Arc<B>) {
    let a = parameter(ElementType::I32, [4]).unwrap();
    let b = parameter(ElementType::I32, [4]).unwrap();
    let x = parameter(ElementType::F32, [4]).unwrap();
    let quotient = divide(&a, &b).unwrap();
    let larger = maximum(&a, &negative(&b).unwrap()).unwrap();
    let truncated = reshape(convert(&x, ElementType::I32).unwrap(), [2, 2]).unwrap();
    let function = Function::new([&quotient, &larger, &truncated], [a, b, x]).unwrap();
    let handle = backend.compile(&function).unwrap();

    let inputs = [
        backend.tensor_from_slice([4], &[7i32, -3, 10, 4]).unwrap(),
        backend.tensor_from_slice([4], &[2i32, 2, -5, 3]).unwrap(),
        backend
            .tensor_from_slice([4], &[1.7f32, -2.9, 0.2, 41.0])
            .unwrap(),
    ];
    let outputs = backend.create_result_tensors(handle).unwrap();
    assert_eq!(outputs[2].shape(), &Shape::new([2, 2]));
    backend.call_with_validate(handle, &outputs, &inputs).unwrap();

    assert_eq!(outputs[0].to_vec::<i32>().unwrap(), vec![3, -1, -2, 1]);
    assert_eq!(outputs[1].to_vec::<i32>().unwrap(), vec![7, -2, 10, 4]);
    assert_eq!(outputs[2].to_vec::<i32>().unwrap(), vec![1, -2, 0, 41]);

    inputs[1].write_slice(&[1i32, 0, 1, 1]).unwrap();
    let err = backend.call(handle, &outputs, &inputs).unwrap_err();
    assert!(matches!(err, Error::Execution(_)), "{err}");
}

pub fn unused_parameters_still_take_a_slot<B: Backend + ?Sized>(backend: &Arc<B>) {
    let used = parameter(ElementType::F64, [3]).unwrap();
    let unused = parameter(ElementType::U8, [1]).unwrap();
    let negated = negative(&used).unwrap();
    let function = Function::new([&negated], [unused, used]).unwrap();
    let handle = backend.compile(&function).unwrap();

    let inputs = [
        backend.tensor_from_slice([1], &[9u8]).unwrap(),
        backend.tensor_from_slice([3], &[1.5f64, -2.0, 0.0]).unwrap(),
    ];
    let outputs = backend.create_result_tensors(handle).unwrap();
    backend.call_with_validate(handle, &outputs, &inputs).unwrap();
    assert_eq!(outputs[0].to_vec::<f64>().unwrap(), vec![-1.5, 2.0, -0.0]);
}

pub fn external_memory_tensors<B: Backend + ?Sized>(backend: &Arc<B>) {
    let input = parameter(ElementType::F32, [4]).unwrap();
    let negated = negative(&input).unwrap();
    let handle = backend
        .compile(&Function::new([&negated], [input]).unwrap())
        .unwrap();

    let mut storage = vec![0.0f32; 4];
    let ptr = NonNull::new(storage.as_mut_ptr().cast::<u8>()).unwrap();
    // SAFETY: `storage` outlives `output`, which is dropped before the vector is read.
    let output = unsafe {
        backend.create_tensor_with_memory(ElementType::F32, Shape::new([4]), ptr, 16)
    }
    .unwrap();
    assert!(output.is_external());

    let source = backend.tensor_from_slice([4], &[1.0f32, 2.0, 3.0, 4.0]).unwrap();
    backend
        .call_with_validate(handle, &[output.clone()], &[source])
        .unwrap();
    drop(output);
    assert_eq!(storage, vec![-1.0, -2.0, -3.0, -4.0]);

    // SAFETY: the tensor is rejected before it could be used.
    let undersized = unsafe {
        backend.create_tensor_with_memory(ElementType::F32, Shape::new([8]), ptr, 16)
    };
    assert!(matches!(undersized, Err(Error::ArgumentMismatch(_))));
}

pub fn tensor_byte_ranges<B: Backend + ?Sized>(backend: &Arc<B>) {
    let tensor = backend.create_tensor_for::<f32>([4]).unwrap();
    assert_eq!(tensor.byte_len(), 16);

    tensor.write(4, &2.5f32.to_le_bytes()).unwrap();
    let mut bytes = [0u8; 8];
    tensor.read(0, &mut bytes).unwrap();
    assert_eq!(&bytes[..4], &0.0f32.to_le_bytes());
    assert_eq!(&bytes[4..], &2.5f32.to_le_bytes());

    assert_eq!(
        tensor.write(12, &[0u8; 8]),
        Err(Error::OutOfRange {
            offset: 12,
            end: 20,
            len: 16
        })
    );
    let mut too_long = [0u8; 17];
    assert!(matches!(
        tensor.read(0, &mut too_long),
        Err(Error::OutOfRange { .. })
    ));
    assert!(matches!(
        tensor.to_vec::<i32>(),
        Err(Error::ArgumentMismatch(_))
    ));

    let alias = tensor.clone();
    alias.write_slice(&[1.0f32, 2.0, 3.0, 4.0]).unwrap();
    assert!(alias.ptr_eq(&tensor));
    assert_eq!(tensor.to_vec::<f32>().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
}

/// Only exercised for backends that advertise thread-safe calls.
pub fn concurrent_calls_share_a_handle<B: Backend + ?Sized>(backend: &Arc<B>) {
    if !backend.thread_safe_calls() {
        return;
    }
    let handle = backend.compile(&add_multiply_function()).unwrap();
    thread::scope(|scope| {
        for worker in 0..4u8 {
            scope.spawn(move || {
                let a = f32::from(worker);
                let inputs = [
                    filled(backend, SCENARIO_SHAPE, a),
                    filled(backend, SCENARIO_SHAPE, 1.0),
                ];
                let outputs = backend.create_result_tensors(handle).unwrap();
                for _ in 0..8 {
                    backend.call_with_validate(handle, &outputs, &inputs).unwrap();
                    let expected = (0.5 + a) * 1.5;
                    assert_all_close(&[expected; 16], &outputs[0].to_vec::<f32>().unwrap());
                }
            });
        }
    });
}
