//! Immutable compilation units: ordered results over ordered parameters.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::backend::hashing::hash_serializable;
use crate::error::{Error, Result};
use crate::graph::node::{Node, NodeId, Output};
use crate::graph::serialize::SerializedFunction;
use crate::tensor::TensorDesc;

struct FunctionInner {
    name: String,
    results: Vec<Output>,
    parameters: Vec<Node>,
    ordered: Vec<Node>,
    fingerprint: u64,
}

/// Named graph with positional parameters and results. Cheap to clone.
#[derive(Clone)]
pub struct Function {
    inner: Arc<FunctionInner>,
}

fn next_default_name() -> String {
    static NEXT: AtomicUsize = AtomicUsize::new(0);
    format!("Function_{}", NEXT.fetch_add(1, Ordering::Relaxed))
}

impl Function {
    /// Builds a function with an automatically assigned name.
    pub fn new<R, P>(results: R, parameters: P) -> Result<Self>
    where
        R: IntoIterator,
        R::Item: Into<Output>,
        P: IntoIterator<Item = Node>,
    {
        Self::build(next_default_name(), results, parameters)
    }

    pub fn with_name<R, P>(name: impl Into<String>, results: R, parameters: P) -> Result<Self>
    where
        R: IntoIterator,
        R::Item: Into<Output>,
        P: IntoIterator<Item = Node>,
    {
        Self::build(name.into(), results, parameters)
    }

    fn build<R, P>(name: String, results: R, parameters: P) -> Result<Self>
    where
        R: IntoIterator,
        R::Item: Into<Output>,
        P: IntoIterator<Item = Node>,
    {
        let results: Vec<Output> = results.into_iter().map(Into::into).collect();
        let parameters: Vec<Node> = parameters.into_iter().collect();

        let mut seen_results = HashSet::new();
        for result in &results {
            if !seen_results.insert((result.node().id(), result.index())) {
                return Err(Error::DuplicateNode(format!("{result:?}")));
            }
        }
        let mut listed = HashSet::new();
        for param in &parameters {
            if !param.is_parameter() {
                return Err(Error::NotAParameter(param.friendly_name()));
            }
            if !listed.insert(param.id()) {
                return Err(Error::DuplicateNode(param.friendly_name()));
            }
        }

        let ordered = topological_order(&results);
        if let Some(free) = ordered
            .iter()
            .find(|node| node.is_parameter() && !listed.contains(&node.id()))
        {
            return Err(Error::UngroupedParameter(free.friendly_name()));
        }

        let mut function = FunctionInner {
            name,
            results,
            parameters,
            ordered,
            fingerprint: 0,
        };
        function.fingerprint =
            hash_serializable(&SerializedFunction::graph_of(&function.view())?)?;
        Ok(Function {
            inner: Arc::new(function),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn results(&self) -> &[Output] {
        &self.inner.results
    }

    pub fn parameters(&self) -> &[Node] {
        &self.inner.parameters
    }

    /// Every node reachable from the results, inputs before users.
    ///
    /// The order is a pure function of the graph structure, so two functions built from the
    /// same construction sequence yield the same order.
    pub fn ordered_nodes(&self) -> &[Node] {
        &self.inner.ordered
    }

    /// Structural hash over node kinds, attributes, constant data, descriptors, and the
    /// parameter and result order. The name is not included.
    pub fn fingerprint(&self) -> u64 {
        self.inner.fingerprint
    }

    pub fn parameter_descriptors(&self) -> Vec<TensorDesc> {
        self.inner
            .parameters
            .iter()
            .map(|param| param.outputs()[0].clone())
            .collect()
    }

    pub fn result_descriptors(&self) -> Vec<TensorDesc> {
        self.inner
            .results
            .iter()
            .map(|result| result.desc().clone())
            .collect()
    }

    /// Position of a parameter node in the call-argument order.
    pub fn parameter_index(&self, id: NodeId) -> Option<usize> {
        self.inner.parameters.iter().position(|param| param.id() == id)
    }

    pub fn to_serialized(&self) -> Result<SerializedFunction> {
        SerializedFunction::from_function(&self.inner.view())
    }

    /// Rebuilds a function from its persisted form, re-running every construction check.
    pub fn from_serialized(serialized: SerializedFunction) -> Result<Self> {
        serialized.into_function()
    }

    pub fn to_json_string(&self) -> Result<String> {
        let serialized = self.to_serialized()?;
        serde_json::to_string_pretty(&serialized)
            .map_err(|err| Error::execution(format!("json encoding failed: {err}")))
    }
}

/// Borrowed view used by the serializer before the `Arc` exists.
pub(crate) struct FunctionView<'a> {
    pub(crate) name: &'a str,
    pub(crate) results: &'a [Output],
    pub(crate) parameters: &'a [Node],
    pub(crate) ordered: &'a [Node],
}

impl FunctionInner {
    fn view(&self) -> FunctionView<'_> {
        FunctionView {
            name: &self.name,
            results: &self.results,
            parameters: &self.parameters,
            ordered: &self.ordered,
        }
    }
}

/// Iterative post-order walk from the results, visiting inputs left to right.
fn topological_order(results: &[Output]) -> Vec<Node> {
    let mut ordered = Vec::new();
    let mut done: HashSet<NodeId> = HashSet::new();
    let mut stack: Vec<(Node, bool)> = results
        .iter()
        .rev()
        .map(|result| (result.node().clone(), false))
        .collect();

    while let Some((node, expanded)) = stack.pop() {
        if done.contains(&node.id()) {
            continue;
        }
        if expanded {
            done.insert(node.id());
            ordered.push(node);
            continue;
        }
        stack.push((node.clone(), true));
        for input in node.inputs().iter().rev() {
            if !done.contains(&input.node().id()) {
                stack.push((input.node().clone(), false));
            }
        }
    }
    ordered
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.inner.name)
            .field("parameters", &self.inner.parameters)
            .field("results", &self.inner.results)
            .field("fingerprint", &format_args!("{:#018x}", self.inner.fingerprint))
            .finish()
    }
}
