//! Graph intermediate representation: nodes, the op catalog, and functions.

pub mod builders;
mod function;
mod node;
pub mod op;
pub mod serialize;

pub use function::Function;
pub use node::{Node, NodeId, NodeKind, Output};
pub use op::{register_op, Attr, Attrs, OpContext, OpDef};
