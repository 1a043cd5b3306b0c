//! Operation catalog: each op advertises its arity and an output inference rule.
//!
//! The catalog is an open registry keyed by op name. Built-in ops are installed when the
//! registry is first touched; additional ops can be registered at any time with
//! [`register_op`] and then built through [`Node::operation`](crate::graph::Node::operation).

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::tensor::{ElementType, Shape, TensorDesc};

/// Static operation attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Attr {
    Int(i64),
    Float(f64),
    Str(String),
    Shape(Shape),
    ElementType(ElementType),
}

/// Attributes keyed by name; ordered so encodings and fingerprints are deterministic.
pub type Attrs = BTreeMap<String, Attr>;

/// Inputs to an inference rule.
pub struct OpContext<'a> {
    pub op: &'a str,
    pub inputs: &'a [TensorDesc],
    pub attrs: &'a Attrs,
}

impl OpContext<'_> {
    pub fn attr(&self, name: &str) -> Result<&Attr> {
        self.attrs
            .get(name)
            .ok_or_else(|| Error::attribute(self.op, name, "missing"))
    }

    pub fn attr_shape(&self, name: &str) -> Result<&Shape> {
        match self.attr(name)? {
            Attr::Shape(shape) => Ok(shape),
            other => Err(Error::attribute(
                self.op,
                name,
                format!("expected a shape, got {other:?}"),
            )),
        }
    }

    pub fn attr_element_type(&self, name: &str) -> Result<ElementType> {
        match self.attr(name)? {
            Attr::ElementType(ty) => Ok(*ty),
            other => Err(Error::attribute(
                self.op,
                name,
                format!("expected an element type, got {other:?}"),
            )),
        }
    }
}

pub type InferFn = fn(&OpContext<'_>) -> Result<Vec<TensorDesc>>;

/// Registry entry for one operation kind.
#[derive(Clone)]
pub struct OpDef {
    pub name: String,
    pub arity: usize,
    pub infer: InferFn,
}

impl OpDef {
    pub fn new(name: impl Into<String>, arity: usize, infer: InferFn) -> Self {
        Self {
            name: name.into(),
            arity,
            infer,
        }
    }
}

pub const BINARY_ELEMENTWISE: [&str; 6] =
    ["Add", "Subtract", "Multiply", "Divide", "Maximum", "Minimum"];
pub const UNARY_ELEMENTWISE: [&str; 2] = ["Negative", "Abs"];
pub const UNARY_FLOAT: [&str; 3] = ["Exp", "Log", "Sqrt"];

static OP_REGISTRY: Lazy<RwLock<HashMap<String, Arc<OpDef>>>> = Lazy::new(|| {
    let mut ops = HashMap::new();
    let mut install = |def: OpDef| {
        ops.insert(def.name.clone(), Arc::new(def));
    };
    for name in BINARY_ELEMENTWISE {
        install(OpDef::new(name, 2, infer_binary_elementwise));
    }
    for name in UNARY_ELEMENTWISE {
        install(OpDef::new(name, 1, infer_unary_elementwise));
    }
    for name in UNARY_FLOAT {
        install(OpDef::new(name, 1, infer_unary_float));
    }
    install(OpDef::new("Reshape", 1, infer_reshape));
    install(OpDef::new("Convert", 1, infer_convert));
    RwLock::new(ops)
});

/// Adds an op to the catalog. Returns `false` and leaves the catalog untouched when the name
/// is already taken.
pub fn register_op(def: OpDef) -> bool {
    let mut ops = OP_REGISTRY.write().unwrap_or_else(PoisonError::into_inner);
    if ops.contains_key(&def.name) {
        return false;
    }
    ops.insert(def.name.clone(), Arc::new(def));
    true
}

pub fn lookup_op(name: &str) -> Result<Arc<OpDef>> {
    OP_REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(name)
        .cloned()
        .ok_or_else(|| Error::UnknownOp(name.to_string()))
}

/// Names of every registered op, sorted.
pub fn registered_ops() -> Vec<String> {
    let mut names: Vec<String> = OP_REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .keys()
        .cloned()
        .collect();
    names.sort();
    names
}

/// Both operands share one element type and one shape; the output inherits them.
pub fn infer_binary_elementwise(ctx: &OpContext<'_>) -> Result<Vec<TensorDesc>> {
    let (lhs, rhs) = (&ctx.inputs[0], &ctx.inputs[1]);
    if lhs.element_type != rhs.element_type {
        return Err(Error::TypeMismatch {
            op: ctx.op.to_string(),
            lhs: lhs.element_type.to_string(),
            rhs: rhs.element_type.to_string(),
        });
    }
    if lhs.shape != rhs.shape {
        return Err(Error::ShapeMismatch {
            op: ctx.op.to_string(),
            lhs: lhs.shape.clone(),
            rhs: rhs.shape.clone(),
        });
    }
    Ok(vec![lhs.clone()])
}

pub fn infer_unary_elementwise(ctx: &OpContext<'_>) -> Result<Vec<TensorDesc>> {
    Ok(vec![ctx.inputs[0].clone()])
}

fn infer_unary_float(ctx: &OpContext<'_>) -> Result<Vec<TensorDesc>> {
    let input = &ctx.inputs[0];
    if !input.element_type.is_float() {
        return Err(Error::TypeMismatch {
            op: ctx.op.to_string(),
            lhs: input.element_type.to_string(),
            rhs: "floating point".to_string(),
        });
    }
    Ok(vec![input.clone()])
}

fn infer_reshape(ctx: &OpContext<'_>) -> Result<Vec<TensorDesc>> {
    let input = &ctx.inputs[0];
    let target = ctx.attr_shape("shape")?;
    if input.shape.element_count()? != target.element_count()? {
        return Err(Error::ShapeMismatch {
            op: ctx.op.to_string(),
            lhs: input.shape.clone(),
            rhs: target.clone(),
        });
    }
    Ok(vec![TensorDesc::new(input.element_type, target.clone())])
}

fn infer_convert(ctx: &OpContext<'_>) -> Result<Vec<TensorDesc>> {
    let target = ctx.attr_element_type("element_type")?;
    Ok(vec![TensorDesc::new(target, ctx.inputs[0].shape.clone())])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(ty: ElementType, dims: &[usize]) -> TensorDesc {
        TensorDesc::new(ty, dims.to_vec())
    }

    #[test]
    fn binary_inference_rejects_mismatched_operands() {
        let attrs = Attrs::new();
        let inputs = [desc(ElementType::F32, &[2, 2]), desc(ElementType::F32, &[3, 3])];
        let ctx = OpContext {
            op: "Add",
            inputs: &inputs,
            attrs: &attrs,
        };
        assert!(matches!(
            infer_binary_elementwise(&ctx),
            Err(Error::ShapeMismatch { .. })
        ));

        let inputs = [desc(ElementType::F32, &[2]), desc(ElementType::I32, &[2])];
        let ctx = OpContext {
            op: "Add",
            inputs: &inputs,
            attrs: &attrs,
        };
        assert!(matches!(
            infer_binary_elementwise(&ctx),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn reshape_requires_shape_attribute() {
        let inputs = [desc(ElementType::F32, &[2, 3])];
        let attrs = Attrs::new();
        let ctx = OpContext {
            op: "Reshape",
            inputs: &inputs,
            attrs: &attrs,
        };
        assert!(matches!(
            infer_reshape(&ctx),
            Err(Error::InvalidAttribute { .. })
        ));

        let mut attrs = Attrs::new();
        attrs.insert("shape".into(), Attr::Shape(Shape::new([3, 2])));
        let ctx = OpContext {
            op: "Reshape",
            inputs: &inputs,
            attrs: &attrs,
        };
        assert_eq!(
            infer_reshape(&ctx).unwrap(),
            vec![desc(ElementType::F32, &[3, 2])]
        );
    }

    #[test]
    fn user_ops_can_be_registered_once() {
        assert!(register_op(OpDef::new(
            "TestIdentity",
            1,
            infer_unary_elementwise
        )));
        assert!(!register_op(OpDef::new("TestIdentity", 1, infer_unary_float)));
        assert!(!register_op(OpDef::new("Add", 2, infer_binary_elementwise)));
        assert_eq!(lookup_op("TestIdentity").unwrap().arity, 1);
        assert!(registered_ops().contains(&"Multiply".to_string()));
    }
}
