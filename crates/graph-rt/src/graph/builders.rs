//! Free-function graph builders for the built-in ops.

use crate::error::Result;
use crate::graph::node::{Node, Output};
use crate::graph::op::{Attr, Attrs};
use crate::tensor::{ElementType, NativeElement, Shape};

pub fn parameter(element_type: ElementType, shape: impl Into<Shape>) -> Result<Node> {
    Node::parameter(element_type, shape)
}

pub fn constant<T: NativeElement>(shape: impl Into<Shape>, values: &[T]) -> Result<Node> {
    Node::constant(shape, values)
}

pub fn constant_fill<T: NativeElement>(shape: impl Into<Shape>, value: T) -> Result<Node> {
    Node::constant_fill(shape, value)
}

fn binary(op: &str, lhs: impl Into<Output>, rhs: impl Into<Output>) -> Result<Node> {
    Node::operation(op, vec![lhs.into(), rhs.into()], Attrs::new())
}

fn unary(op: &str, input: impl Into<Output>) -> Result<Node> {
    Node::operation(op, vec![input.into()], Attrs::new())
}

pub fn add(lhs: impl Into<Output>, rhs: impl Into<Output>) -> Result<Node> {
    binary("Add", lhs, rhs)
}

pub fn subtract(lhs: impl Into<Output>, rhs: impl Into<Output>) -> Result<Node> {
    binary("Subtract", lhs, rhs)
}

pub fn multiply(lhs: impl Into<Output>, rhs: impl Into<Output>) -> Result<Node> {
    binary("Multiply", lhs, rhs)
}

pub fn divide(lhs: impl Into<Output>, rhs: impl Into<Output>) -> Result<Node> {
    binary("Divide", lhs, rhs)
}

pub fn maximum(lhs: impl Into<Output>, rhs: impl Into<Output>) -> Result<Node> {
    binary("Maximum", lhs, rhs)
}

pub fn minimum(lhs: impl Into<Output>, rhs: impl Into<Output>) -> Result<Node> {
    binary("Minimum", lhs, rhs)
}

pub fn negative(input: impl Into<Output>) -> Result<Node> {
    unary("Negative", input)
}

pub fn abs(input: impl Into<Output>) -> Result<Node> {
    unary("Abs", input)
}

pub fn exp(input: impl Into<Output>) -> Result<Node> {
    unary("Exp", input)
}

pub fn log(input: impl Into<Output>) -> Result<Node> {
    unary("Log", input)
}

pub fn sqrt(input: impl Into<Output>) -> Result<Node> {
    unary("Sqrt", input)
}

pub fn reshape(input: impl Into<Output>, shape: impl Into<Shape>) -> Result<Node> {
    let mut attrs = Attrs::new();
    attrs.insert("shape".to_string(), Attr::Shape(shape.into()));
    Node::operation("Reshape", vec![input.into()], attrs)
}

pub fn convert(input: impl Into<Output>, element_type: ElementType) -> Result<Node> {
    let mut attrs = Attrs::new();
    attrs.insert("element_type".to_string(), Attr::ElementType(element_type));
    Node::operation("Convert", vec![input.into()], attrs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn add_of_mismatched_shapes_fails_at_construction() {
        let lhs = parameter(ElementType::F32, [2, 2]).unwrap();
        let rhs = parameter(ElementType::F32, [3, 3]).unwrap();
        let err = add(&lhs, &rhs).unwrap_err();
        assert_eq!(
            err,
            Error::ShapeMismatch {
                op: "Add".to_string(),
                lhs: Shape::new([2, 2]),
                rhs: Shape::new([3, 3]),
            }
        );
    }

    #[test]
    fn multiply_of_mismatched_types_fails_at_construction() {
        let lhs = parameter(ElementType::F32, [4]).unwrap();
        let rhs = parameter(ElementType::I32, [4]).unwrap();
        assert!(matches!(
            multiply(&lhs, &rhs),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn elementwise_output_inherits_operand_desc() {
        let lhs = constant_fill([2, 3], 1i64).unwrap();
        let rhs = parameter(ElementType::I64, [2, 3]).unwrap();
        let diff = subtract(&lhs, &rhs).unwrap();
        assert_eq!(diff.element_type(), ElementType::I64);
        assert_eq!(diff.shape(), &Shape::new([2, 3]));
        assert_eq!(diff.inputs().len(), 2);
    }

    #[test]
    fn float_only_ops_reject_integers() {
        let input = parameter(ElementType::I32, [3]).unwrap();
        assert!(matches!(sqrt(&input), Err(Error::TypeMismatch { .. })));
        assert!(abs(&input).is_ok());
    }

    #[test]
    fn reshape_and_convert_infer_new_descs() {
        let input = parameter(ElementType::F32, [2, 3]).unwrap();
        let reshaped = reshape(&input, [6]).unwrap();
        assert_eq!(reshaped.shape(), &Shape::new([6]));
        assert!(matches!(
            reshape(&input, [4]),
            Err(Error::ShapeMismatch { .. })
        ));

        let converted = convert(&reshaped, ElementType::F64).unwrap();
        assert_eq!(converted.element_type(), ElementType::F64);
        assert_eq!(converted.shape(), &Shape::new([6]));
    }
}
