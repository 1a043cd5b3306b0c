//! Builds `(0.5 + a) * (0.5 + b)`, compiles it on the CPU backend, and prints the result.
//!
//! Run with `cargo run -p graph-rt-backend-ref-cpu --example simple`.

use anyhow::{Context, Result};
use graph_rt::graph::builders::{add, constant_fill, multiply, parameter};
use graph_rt::{create_backend, get_registered_devices, BackendExt, ElementType, Function};
use graph_rt_backend_ref_cpu::register_cpu_backends;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();
    register_cpu_backends();

    let shape = [2usize, 2, 2, 2];
    let tensor0 = constant_fill(shape, 0.5f32)?;
    let tensor1 = parameter(ElementType::F32, shape)?;
    let tensor2 = constant_fill(shape, 0.5f32)?;
    let tensor3 = parameter(ElementType::F32, shape)?;
    let add0 = add(&tensor0, &tensor1)?;
    let add1 = add(&tensor2, &tensor3)?;
    let mul = multiply(&add0, &add1)?;
    let function = Function::with_name("simple", [&mul], [tensor1, tensor3])?;

    println!("devices: {:?}", get_registered_devices());
    let backend = create_backend("CPU").context("CPU backend is not registered")?;
    backend.enable_performance_data(true);
    let handle = backend.compile(&function)?;

    let input0 = backend.tensor_from_slice(shape, &[1.0f32; 16])?;
    let input1 = backend.tensor_from_slice(shape, &[2.0f32; 16])?;
    let outputs = backend.create_result_tensors(handle)?;
    backend.call_with_validate(handle, &outputs, &[input0, input1])?;

    println!("result: {:?}", outputs[0].to_vec::<f32>()?);
    for counter in backend.get_performance_data(handle)? {
        println!(
            "{:<16} {:<10} calls={} total={:?}",
            counter.name(),
            counter.op(),
            counter.call_count(),
            counter.total_time()
        );
    }
    Ok(())
}
