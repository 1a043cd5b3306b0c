//! Element types, shapes, and the runtime tensor buffers backends hand to callers.

mod buffer;
pub mod element_type;
pub mod shape;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use buffer::Tensor;
pub use element_type::{
    all_element_types, decode_values, element_type_of, encode_values, type_of, ElementType,
    NativeElement,
};
pub use shape::Shape;

/// Static `(element type, shape)` pair describing a node output or a call argument.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorDesc {
    pub element_type: ElementType,
    pub shape: Shape,
}

impl TensorDesc {
    pub fn new(element_type: ElementType, shape: impl Into<Shape>) -> Self {
        TensorDesc {
            element_type,
            shape: shape.into(),
        }
    }

    pub fn byte_size(&self) -> crate::Result<usize> {
        self.shape.byte_size(self.element_type)
    }
}

impl fmt::Display for TensorDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.element_type, self.shape)
    }
}
