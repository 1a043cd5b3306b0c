use std::path::PathBuf;

use thiserror::Error;

use crate::tensor::Shape;

/// Errors surfaced by graph construction, compilation, and execution.
///
/// Every variant is recoverable; nothing in this crate aborts on caller error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("unknown element type `{0}`")]
    UnknownType(String),

    #[error("element count of shape {0:?} overflows u64")]
    ShapeOverflow(Vec<usize>),

    #[error("{op}: element type mismatch ({lhs} vs {rhs})")]
    TypeMismatch {
        op: String,
        lhs: String,
        rhs: String,
    },

    #[error("{op}: shape mismatch ({lhs} vs {rhs})")]
    ShapeMismatch { op: String, lhs: Shape, rhs: Shape },

    #[error("constant of shape {shape} expects {expected} values, got {actual}")]
    ConstantSizeMismatch {
        shape: Shape,
        expected: usize,
        actual: usize,
    },

    #[error("parameter {0} is reachable from the results but not listed")]
    UngroupedParameter(String),

    #[error("node {0} appears more than once")]
    DuplicateNode(String),

    #[error("node {0} is not a parameter")]
    NotAParameter(String),

    #[error("{op} expects {expected} inputs, got {actual}")]
    ArityMismatch {
        op: String,
        expected: usize,
        actual: usize,
    },

    #[error("node {node} has no output {index}")]
    InvalidOutput { node: String, index: usize },

    #[error("unknown operation `{0}`")]
    UnknownOp(String),

    #[error("{op}: invalid attribute `{name}`: {reason}")]
    InvalidAttribute {
        op: String,
        name: String,
        reason: String,
    },

    #[error("{0} not found")]
    NotFound(String),

    #[error("compilation failed: {0}")]
    CompilationError(String),

    #[error("argument mismatch: {0}")]
    ArgumentMismatch(String),

    #[error("invalid or removed handle")]
    InvalidHandle,

    #[error("failed to load {path}: {reason}")]
    LoadError { path: PathBuf, reason: String },

    #[error("failed to save {path}: {reason}")]
    SaveError { path: PathBuf, reason: String },

    #[error("byte range {offset}..{end} out of bounds for tensor of {len} bytes")]
    OutOfRange {
        offset: usize,
        end: usize,
        len: usize,
    },

    #[error("execution failure: {0}")]
    Execution(String),
}

impl Error {
    pub fn compilation(message: impl Into<String>) -> Self {
        Error::CompilationError(message.into())
    }

    pub fn argument(message: impl Into<String>) -> Self {
        Error::ArgumentMismatch(message.into())
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Error::Execution(message.into())
    }

    pub fn load(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::LoadError {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn save(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::SaveError {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn attribute(op: &str, name: &str, reason: impl Into<String>) -> Self {
        Error::InvalidAttribute {
            op: op.to_string(),
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
