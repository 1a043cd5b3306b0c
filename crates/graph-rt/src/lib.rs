//! Typed computation graphs and the contract for compiling and running them on pluggable
//! backends.
//!
//! Graphs are built from [`Node`]s whose output types and shapes are inferred and checked at
//! construction, grouped into an immutable [`Function`], and handed to a [`Backend`] selected
//! by device name through [`create_backend`]. Compiling yields an opaque [`Handle`]; calls
//! exchange data through refcounted [`Tensor`]s.

pub mod backend;
mod env;
pub mod error;
pub mod graph;
pub mod tensor;

pub use backend::{create_backend, get_registered_devices, Backend, BackendExt, Handle};
pub use error::{Error, Result};
pub use graph::{Function, Node, Output};
pub use tensor::{type_of, ElementType, Shape, Tensor, TensorDesc};
