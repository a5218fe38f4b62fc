//! Errors raised while lifting a Proto's bytecode into a [`sparrow_ir::Graph`].

use sparrow_heap::HeapError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("heap error while building IR: {0}")]
    Heap(#[from] HeapError),

    #[error("malformed bytecode at pc {pc}: {reason}")]
    Malformed { pc: usize, reason: String },

    /// A control shape this builder's first pass doesn't reconstruct yet —
    /// notably `break`/`continue` jumping out of a nested `if` inside a loop
    /// body. The bytecode itself is well-formed; the builder just bails
    /// rather than guess at a merge point it can't derive structurally.
    #[error("unsupported control shape at pc {pc}: {reason}")]
    UnsupportedControlFlow { pc: usize, reason: String },
}

pub type BuildResult<T> = Result<T, BuildError>;
