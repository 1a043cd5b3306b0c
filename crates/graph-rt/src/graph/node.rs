//! Graph nodes: constants, parameters, and registry-dispatched operations.
//!
//! Nodes are immutable and shared through `Arc`. An operation can only reference nodes that
//! already exist, so every graph is acyclic by construction.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::graph::op::{lookup_op, Attrs, OpContext};
use crate::tensor::{ElementType, NativeElement, Shape, TensorDesc};

/// Construction-order identity. Every input of a node has a strictly smaller id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u64);

impl NodeId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        NodeId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

#[derive(Debug)]
pub enum NodeKind {
    Constant { data: Arc<[u8]> },
    Parameter,
    Operation {
        op: String,
        attrs: Attrs,
        inputs: Vec<Output>,
    },
}

#[derive(Debug)]
struct NodeInner {
    id: NodeId,
    kind: NodeKind,
    outputs: Vec<TensorDesc>,
}

/// Shared reference to an immutable graph node.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

/// One output of one node; operation inputs are expressed as outputs.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Output {
    node: Node,
    index: usize,
}

impl Node {
    /// Builds a constant from raw little-endian element bytes.
    pub fn constant_from_bytes(
        element_type: ElementType,
        shape: impl Into<Shape>,
        bytes: impl Into<Arc<[u8]>>,
    ) -> Result<Node> {
        let shape = shape.into();
        let bytes = bytes.into();
        let expected = shape.element_count()?;
        let width = element_type.size_in_bytes();
        if bytes.len() != expected * width {
            return Err(Error::ConstantSizeMismatch {
                shape,
                expected,
                actual: bytes.len().div_ceil(width),
            });
        }
        Ok(Node::build(
            NodeKind::Constant { data: bytes },
            vec![TensorDesc::new(element_type, shape)],
        ))
    }

    /// Builds a constant holding exactly `element_count(shape)` values.
    pub fn constant<T: NativeElement>(shape: impl Into<Shape>, values: &[T]) -> Result<Node> {
        let shape = shape.into();
        let expected = shape.element_count()?;
        if values.len() != expected {
            return Err(Error::ConstantSizeMismatch {
                shape,
                expected,
                actual: values.len(),
            });
        }
        let bytes = crate::tensor::encode_values(values);
        Node::constant_from_bytes(T::ELEMENT_TYPE, shape, bytes)
    }

    /// Builds a constant with every element set to `value`.
    pub fn constant_fill<T: NativeElement>(shape: impl Into<Shape>, value: T) -> Result<Node> {
        let shape = shape.into();
        let values = vec![value; shape.element_count()?];
        Node::constant(shape, &values)
    }

    pub fn parameter(element_type: ElementType, shape: impl Into<Shape>) -> Result<Node> {
        let shape = shape.into();
        shape.byte_size(element_type)?;
        Ok(Node::build(
            NodeKind::Parameter,
            vec![TensorDesc::new(element_type, shape)],
        ))
    }

    /// Builds an operation by registry name, inferring its output types and shapes.
    ///
    /// Inference failures surface here; a node that exists has passed type checking.
    pub fn operation(op: &str, inputs: Vec<Output>, attrs: Attrs) -> Result<Node> {
        let def = lookup_op(op)?;
        if inputs.len() != def.arity {
            return Err(Error::ArityMismatch {
                op: op.to_string(),
                expected: def.arity,
                actual: inputs.len(),
            });
        }
        let descs: Vec<TensorDesc> = inputs.iter().map(|input| input.desc().clone()).collect();
        let outputs = (def.infer)(&OpContext {
            op,
            inputs: &descs,
            attrs: &attrs,
        })?;
        if outputs.is_empty() {
            return Err(Error::InvalidOutput {
                node: op.to_string(),
                index: 0,
            });
        }
        for desc in &outputs {
            desc.byte_size()?;
        }
        Ok(Node::build(
            NodeKind::Operation {
                op: op.to_string(),
                attrs,
                inputs,
            },
            outputs,
        ))
    }

    fn build(kind: NodeKind, outputs: Vec<TensorDesc>) -> Node {
        Node {
            inner: Arc::new(NodeInner {
                id: NodeId::next(),
                kind,
                outputs,
            }),
        }
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    pub fn kind(&self) -> &NodeKind {
        &self.inner.kind
    }

    /// Operation name, `"Constant"`, or `"Parameter"`.
    pub fn type_name(&self) -> &str {
        match &self.inner.kind {
            NodeKind::Constant { .. } => "Constant",
            NodeKind::Parameter => "Parameter",
            NodeKind::Operation { op, .. } => op,
        }
    }

    /// Human-readable label such as `Add_12`.
    pub fn friendly_name(&self) -> String {
        format!("{}_{}", self.type_name(), self.inner.id.0)
    }

    pub fn is_parameter(&self) -> bool {
        matches!(self.inner.kind, NodeKind::Parameter)
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.inner.kind, NodeKind::Constant { .. })
    }

    pub fn inputs(&self) -> &[Output] {
        match &self.inner.kind {
            NodeKind::Operation { inputs, .. } => inputs,
            _ => &[],
        }
    }

    pub fn constant_data(&self) -> Option<&Arc<[u8]>> {
        match &self.inner.kind {
            NodeKind::Constant { data } => Some(data),
            _ => None,
        }
    }

    pub fn attrs(&self) -> Option<&Attrs> {
        match &self.inner.kind {
            NodeKind::Operation { attrs, .. } => Some(attrs),
            _ => None,
        }
    }

    pub fn outputs(&self) -> &[TensorDesc] {
        &self.inner.outputs
    }

    pub fn output_count(&self) -> usize {
        self.inner.outputs.len()
    }

    pub fn output(&self, index: usize) -> Result<Output> {
        if index >= self.output_count() {
            return Err(Error::InvalidOutput {
                node: self.friendly_name(),
                index,
            });
        }
        Ok(Output {
            node: self.clone(),
            index,
        })
    }

    /// Element type of output 0.
    pub fn element_type(&self) -> ElementType {
        self.inner.outputs[0].element_type
    }

    /// Shape of output 0.
    pub fn shape(&self) -> &Shape {
        &self.inner.outputs[0].shape
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Node {}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let outputs: Vec<String> = self.outputs().iter().map(ToString::to_string).collect();
        write!(f, "{} -> {}", self.friendly_name(), outputs.join(", "))
    }
}

impl Output {
    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn desc(&self) -> &TensorDesc {
        &self.node.inner.outputs[self.index]
    }
}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node.friendly_name(), self.index)
    }
}

impl From<Node> for Output {
    fn from(node: Node) -> Self {
        Output { node, index: 0 }
    }
}

impl From<&Node> for Output {
    fn from(node: &Node) -> Self {
        Output {
            node: node.clone(),
            index: 0,
        }
    }
}
