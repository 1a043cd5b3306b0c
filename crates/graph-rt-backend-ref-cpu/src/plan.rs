//! Lowering of a [`Function`] into a linear step plan with reusable value slots.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use graph_rt::backend::validate::check_supported;
use graph_rt::backend::{Backend, PerformanceCounter};
use graph_rt::graph::serialize::SerializedGraph;
use graph_rt::graph::{Function, NodeId, NodeKind};
use graph_rt::tensor::{Tensor, TensorDesc};
use graph_rt::{Error, Result};

use crate::kernels::{HostData, Kernel};

/// Where a step reads a value from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Parameter(usize),
    Constant(usize),
    Slot(usize),
}

#[derive(Debug, Clone)]
pub struct Step {
    pub name: String,
    pub op: String,
    pub kernel: Kernel,
    pub inputs: Vec<Source>,
    pub output: usize,
    /// Slots whose last reader is this step; they are released once it finishes.
    pub release: Vec<usize>,
}

/// Executable form of a function for the CPU backend.
#[derive(Debug)]
pub struct CompiledPlan {
    /// Serialized body of the lowered graph, used to confirm memo hits.
    pub graph: SerializedGraph,
    pub parameters: Vec<TensorDesc>,
    pub results: Vec<(Source, TensorDesc)>,
    pub constants: Vec<HostData>,
    pub steps: Vec<Step>,
    pub slot_count: usize,
}

impl CompiledPlan {
    /// Lowers `function`. Constants are decoded once here; every op node becomes one step
    /// whose output slot is recycled after the value's last use.
    pub fn lower<B: Backend + ?Sized>(backend: &B, function: &Function) -> Result<Self> {
        check_supported(backend, function)?;

        let nodes = function.ordered_nodes();
        let mut last_use: HashMap<NodeId, usize> = HashMap::new();
        for (position, node) in nodes.iter().enumerate() {
            for input in node.inputs() {
                last_use.insert(input.node().id(), position);
            }
        }
        for result in function.results() {
            last_use.insert(result.node().id(), usize::MAX);
        }

        let mut sources: HashMap<NodeId, Source> = HashMap::new();
        let mut constants = Vec::new();
        let mut steps = Vec::new();
        let mut free_slots: Vec<usize> = Vec::new();
        let mut slot_count = 0;

        for (position, node) in nodes.iter().enumerate() {
            let source = match node.kind() {
                NodeKind::Parameter => {
                    let index = function.parameter_index(node.id()).ok_or_else(|| {
                        Error::compilation(format!("{} is not listed", node.friendly_name()))
                    })?;
                    Source::Parameter(index)
                }
                NodeKind::Constant { data } => {
                    constants.push(HostData::decode(&node.outputs()[0], data)?);
                    Source::Constant(constants.len() - 1)
                }
                NodeKind::Operation { op, .. } => {
                    let kernel = Kernel::select(node).ok_or_else(|| {
                        Error::compilation(format!("no CPU kernel for {}", node.friendly_name()))
                    })?;
                    let inputs = node
                        .inputs()
                        .iter()
                        .map(|input| {
                            sources.get(&input.node().id()).copied().ok_or_else(|| {
                                Error::compilation(format!(
                                    "{} read before it was lowered",
                                    input.node().friendly_name()
                                ))
                            })
                        })
                        .collect::<Result<Vec<_>>>()?;

                    let mut release: Vec<usize> = node
                        .inputs()
                        .iter()
                        .zip(&inputs)
                        .filter(|(input, _)| {
                            last_use.get(&input.node().id()) == Some(&position)
                        })
                        .filter_map(|(_, source)| match source {
                            Source::Slot(slot) => Some(*slot),
                            _ => None,
                        })
                        .collect();
                    release.sort_unstable();
                    release.dedup();

                    let output = free_slots.pop().unwrap_or_else(|| {
                        slot_count += 1;
                        slot_count - 1
                    });
                    steps.push(Step {
                        name: node.friendly_name(),
                        op: op.clone(),
                        kernel,
                        inputs,
                        output,
                        release: release.clone(),
                    });
                    free_slots.extend(release);
                    Source::Slot(output)
                }
            };
            sources.insert(node.id(), source);
        }

        let results = function
            .results()
            .iter()
            .map(|result| {
                let source = sources.get(&result.node().id()).copied().ok_or_else(|| {
                    Error::compilation(format!("result {result:?} was not lowered"))
                })?;
                Ok((source, result.desc().clone()))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(CompiledPlan {
            graph: function.to_serialized()?.graph,
            parameters: function.parameter_descriptors(),
            results,
            constants,
            steps,
            slot_count,
        })
    }

    pub fn perf_counters(&self) -> Vec<PerformanceCounter> {
        self.steps
            .iter()
            .map(|step| PerformanceCounter::new(&step.name, &step.op))
            .collect()
    }

    /// Runs the plan. Inputs are decoded up front, so outputs may alias inputs.
    ///
    /// Returns per-step durations when `timed` is set.
    pub fn execute(
        &self,
        outputs: &[Tensor],
        inputs: &[Tensor],
        timed: bool,
    ) -> Result<Vec<Duration>> {
        if inputs.len() != self.parameters.len() || outputs.len() != self.results.len() {
            return Err(Error::argument(format!(
                "expected {} inputs and {} outputs, got {} and {}",
                self.parameters.len(),
                self.results.len(),
                inputs.len(),
                outputs.len()
            )));
        }
        let args = inputs
            .iter()
            .zip(&self.parameters)
            .map(|(tensor, desc)| tensor.with_bytes(|bytes| HostData::decode(desc, bytes)))
            .collect::<Result<Vec<_>>>()?;

        let mut slots: Vec<Option<HostData>> = vec![None; self.slot_count];
        let mut durations = Vec::with_capacity(if timed { self.steps.len() } else { 0 });

        for step in &self.steps {
            let started = timed.then(Instant::now);
            let value = {
                let operands = step
                    .inputs
                    .iter()
                    .map(|source| read_source(*source, &args, &self.constants, &slots))
                    .collect::<Result<Vec<_>>>()?;
                step.kernel
                    .run(&operands)
                    .map_err(|err| Error::execution(format!("{}: {err}", step.name)))?
            };
            for slot in &step.release {
                slots[*slot] = None;
            }
            slots[step.output] = Some(value);
            if let Some(started) = started {
                durations.push(started.elapsed());
            }
        }

        for ((source, _), tensor) in self.results.iter().zip(outputs) {
            let value = read_source(*source, &args, &self.constants, &slots)?;
            tensor.with_bytes_mut(|bytes| value.encode_into(bytes))?;
        }
        Ok(durations)
    }
}

fn read_source<'a>(
    source: Source,
    args: &'a [HostData],
    constants: &'a [HostData],
    slots: &'a [Option<HostData>],
) -> Result<&'a HostData> {
    match source {
        Source::Parameter(index) => args.get(index),
        Source::Constant(index) => constants.get(index),
        Source::Slot(index) => slots.get(index).and_then(Option::as_ref),
    }
    .ok_or_else(|| Error::execution(format!("{source:?} holds no value")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CpuBackend;
    use graph_rt::backend::BackendOptions;
    use graph_rt::graph::builders::{add, constant_fill, multiply, negative, parameter};
    use graph_rt::ElementType;

    #[test]
    fn dead_values_free_their_slots_for_reuse() {
        let backend = CpuBackend::new(BackendOptions::default());
        let p = parameter(ElementType::F32, [4]).unwrap();
        let a = negative(&p).unwrap();
        let b = negative(&a).unwrap();
        let c = negative(&b).unwrap();
        let d = negative(&c).unwrap();
        let function = Function::new([&d], [p]).unwrap();

        let plan = CompiledPlan::lower(&backend, &function).unwrap();
        assert_eq!(plan.steps.len(), 4);
        assert_eq!(plan.slot_count, 2);
    }

    #[test]
    fn constants_are_decoded_once() {
        let backend = CpuBackend::new(BackendOptions::default());
        let c = constant_fill([2], 3i32).unwrap();
        let p = parameter(ElementType::I32, [2]).unwrap();
        let sum = add(&c, &p).unwrap();
        let product = multiply(&sum, &c).unwrap();
        let function = Function::new([&product], [p]).unwrap();

        let plan = CompiledPlan::lower(&backend, &function).unwrap();
        assert_eq!(plan.constants, vec![HostData::I32(vec![3, 3])]);
        assert_eq!(plan.steps[1].inputs[1], Source::Constant(0));
    }
}
