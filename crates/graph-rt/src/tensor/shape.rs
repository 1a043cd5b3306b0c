//! Static tensor shapes and element-count bookkeeping.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::tensor::ElementType;

/// Ordered list of dimension sizes. Rank 0 describes a scalar.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    pub fn new<D: Into<Vec<usize>>>(dims: D) -> Self {
        Shape { dims: dims.into() }
    }

    pub fn scalar() -> Self {
        Shape { dims: Vec::new() }
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Product of the dimensions: 1 for a scalar, 0 when any dimension is 0.
    ///
    /// Fails with [`Error::ShapeOverflow`] instead of wrapping when the product does not fit
    /// in a `u64` or in the platform's address space.
    pub fn element_count(&self) -> Result<usize> {
        let count = self
            .dims
            .iter()
            .try_fold(1u64, |acc, &dim| acc.checked_mul(dim as u64))
            .ok_or_else(|| Error::ShapeOverflow(self.dims.clone()))?;
        usize::try_from(count).map_err(|_| Error::ShapeOverflow(self.dims.clone()))
    }

    /// Number of bytes a dense buffer of this shape and element type occupies.
    pub fn byte_size(&self, element_type: ElementType) -> Result<usize> {
        self.element_count()?
            .checked_mul(element_type.size_in_bytes())
            .ok_or_else(|| Error::ShapeOverflow(self.dims.clone()))
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape::new(dims)
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Shape::new(dims.to_vec())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (idx, dim) in self.dims.iter().enumerate() {
            if idx > 0 {
                f.write_str(",")?;
            }
            write!(f, "{dim}")?;
        }
        f.write_str("]")
    }
}
