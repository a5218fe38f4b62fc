//! Error kinds a heap operation can raise. `sparrow-vm` wraps these into its
//! own top-level `SparrowError` (see that crate's `error.rs`) alongside the
//! kinds that only make sense at the interpreter-loop level.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HeapError {
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: &'static str, found: &'static str },

    #[error("index {index} out of range for size {size}")]
    IndexOutOfRange { index: i64, size: usize },

    #[error("size would overflow: {0}")]
    SizeOverflow(String),

    #[error("attribute not found: {0}")]
    AttributeNotFound(String),

    #[error("attribute access invalid for type {0}")]
    AttributeTypeInvalid(&'static str),

    #[error("no MetaOps hook registered for operation {0}")]
    MetaOpsMissing(&'static str),

    #[error("MetaOps hook for {op} returned a value of the wrong type")]
    MetaOpsHookFailed { op: &'static str },

    #[error("division by zero")]
    DivideByZero,

    #[error("modulo operand out of 32-bit integer range")]
    ModOutOfRange,

    #[error("too many constants in one Proto's pool")]
    TooManyConstants,
}

pub type HeapResult<T> = std::result::Result<T, HeapError>;
