//! Argument and support checks shared by every backend.

use crate::backend::interface::Backend;
use crate::error::{Error, Result};
use crate::graph::Function;
use crate::tensor::{Tensor, TensorDesc};

/// Compares call arguments with a compiled signature. All checks complete before the caller
/// performs any side effect.
pub fn validate_call(
    parameters: &[TensorDesc],
    results: &[TensorDesc],
    outputs: &[Tensor],
    inputs: &[Tensor],
) -> Result<()> {
    check_group("input", parameters, inputs)?;
    check_group("output", results, outputs)
}

fn check_group(role: &str, expected: &[TensorDesc], tensors: &[Tensor]) -> Result<()> {
    if expected.len() != tensors.len() {
        return Err(Error::argument(format!(
            "expected {} {role} tensors, got {}",
            expected.len(),
            tensors.len()
        )));
    }
    for (position, (desc, tensor)) in expected.iter().zip(tensors).enumerate() {
        if tensor.element_type() != desc.element_type {
            return Err(Error::argument(format!(
                "{role} {position}: expected element type {}, got {}",
                desc.element_type,
                tensor.element_type()
            )));
        }
        if tensor.shape() != &desc.shape {
            return Err(Error::argument(format!(
                "{role} {position}: expected shape {}, got {}",
                desc.shape,
                tensor.shape()
            )));
        }
    }
    Ok(())
}

/// Runs `is_supported` over every node of `function`, naming the first rejected node.
pub fn check_supported<B: Backend + ?Sized>(backend: &B, function: &Function) -> Result<()> {
    match function
        .ordered_nodes()
        .iter()
        .find(|node| !backend.is_supported(node))
    {
        Some(node) => Err(Error::compilation(format!(
            "{} does not support {} ({})",
            backend.name(),
            node.friendly_name(),
            node.outputs()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        ))),
        None => Ok(()),
    }
}
