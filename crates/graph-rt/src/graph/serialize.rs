//! Position-indexed, serde-friendly encoding of a [`Function`].
//!
//! Nodes are stored in topological order and reference their inputs by position, so the
//! encoding never depends on process-local node ids. Decoding re-runs every inference rule and
//! the function checks, which means a decoded graph is held to the same rules as a built one.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::graph::function::{Function, FunctionView};
use crate::graph::node::{Node, NodeId, NodeKind, Output};
use crate::graph::op::Attrs;
use crate::tensor::TensorDesc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedOutput {
    pub node: usize,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SerializedKind {
    Constant {
        data: Vec<u8>,
    },
    Parameter,
    Operation {
        op: String,
        attrs: Attrs,
        inputs: Vec<SerializedOutput>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedNode {
    pub kind: SerializedKind,
    pub outputs: Vec<TensorDesc>,
}

/// Graph body without the function name; this is what the fingerprint covers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedGraph {
    pub nodes: Vec<SerializedNode>,
    pub parameters: Vec<usize>,
    pub results: Vec<SerializedOutput>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedFunction {
    pub name: String,
    pub graph: SerializedGraph,
}

impl SerializedFunction {
    pub(crate) fn from_function(view: &FunctionView<'_>) -> Result<Self> {
        Ok(SerializedFunction {
            name: view.name.to_string(),
            graph: Self::graph_of(view)?,
        })
    }

    pub(crate) fn graph_of(view: &FunctionView<'_>) -> Result<SerializedGraph> {
        let mut positions: HashMap<NodeId, usize> = HashMap::new();
        let mut nodes = Vec::with_capacity(view.ordered.len() + view.parameters.len());
        let unused = view
            .parameters
            .iter()
            .filter(|param| !view.ordered.contains(param));

        for node in view.ordered.iter().chain(unused) {
            let output_ref = |output: &Output| -> Result<SerializedOutput> {
                let node = positions
                    .get(&output.node().id())
                    .copied()
                    .ok_or_else(|| Error::NotFound(output.node().friendly_name()))?;
                Ok(SerializedOutput {
                    node,
                    index: output.index(),
                })
            };
            let kind = match node.kind() {
                NodeKind::Constant { data } => SerializedKind::Constant {
                    data: data.to_vec(),
                },
                NodeKind::Parameter => SerializedKind::Parameter,
                NodeKind::Operation { op, attrs, inputs } => SerializedKind::Operation {
                    op: op.clone(),
                    attrs: attrs.clone(),
                    inputs: inputs.iter().map(output_ref).collect::<Result<_>>()?,
                },
            };
            positions.insert(node.id(), nodes.len());
            nodes.push(SerializedNode {
                kind,
                outputs: node.outputs().to_vec(),
            });
        }

        let lookup = |node: &Node| {
            positions
                .get(&node.id())
                .copied()
                .ok_or_else(|| Error::NotFound(node.friendly_name()))
        };
        let parameters = view.parameters.iter().map(lookup).collect::<Result<_>>()?;
        let results = view
            .results
            .iter()
            .map(|result| {
                Ok(SerializedOutput {
                    node: lookup(result.node())?,
                    index: result.index(),
                })
            })
            .collect::<Result<_>>()?;

        Ok(SerializedGraph {
            nodes,
            parameters,
            results,
        })
    }

    /// Rebuilds the function, re-validating every node.
    pub fn into_function(self) -> Result<Function> {
        let mut built: Vec<Node> = Vec::with_capacity(self.graph.nodes.len());
        let output_at = |built: &[Node], reference: SerializedOutput| -> Result<Output> {
            built
                .get(reference.node)
                .ok_or_else(|| Error::NotFound(format!("node #{}", reference.node)))?
                .output(reference.index)
        };

        for (position, node) in self.graph.nodes.into_iter().enumerate() {
            let recorded = node.outputs;
            let rebuilt = match node.kind {
                SerializedKind::Constant { data } => {
                    let desc = single_output(position, &recorded)?;
                    Node::constant_from_bytes(
                        desc.element_type,
                        desc.shape.clone(),
                        Arc::<[u8]>::from(data),
                    )?
                }
                SerializedKind::Parameter => {
                    let desc = single_output(position, &recorded)?;
                    Node::parameter(desc.element_type, desc.shape.clone())?
                }
                SerializedKind::Operation { op, attrs, inputs } => {
                    let inputs = inputs
                        .into_iter()
                        .map(|reference| output_at(&built, reference))
                        .collect::<Result<Vec<_>>>()?;
                    Node::operation(&op, inputs, attrs)?
                }
            };
            if rebuilt.outputs() != recorded.as_slice() {
                return Err(Error::compilation(format!(
                    "node #{position} records outputs {recorded:?} but infers {:?}",
                    rebuilt.outputs()
                )));
            }
            built.push(rebuilt);
        }

        let parameters = self
            .graph
            .parameters
            .iter()
            .map(|&position| {
                built
                    .get(position)
                    .cloned()
                    .ok_or_else(|| Error::NotFound(format!("parameter node #{position}")))
            })
            .collect::<Result<Vec<_>>>()?;
        let results = self
            .graph
            .results
            .iter()
            .map(|&reference| output_at(&built, reference))
            .collect::<Result<Vec<_>>>()?;

        Function::with_name(self.name, results, parameters)
    }
}

fn single_output(position: usize, outputs: &[TensorDesc]) -> Result<&TensorDesc> {
    match outputs {
        [desc] => Ok(desc),
        _ => Err(Error::InvalidOutput {
            node: format!("node #{position}"),
            index: outputs.len(),
        }),
    }
}
