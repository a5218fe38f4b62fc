//! Small error types shared by more than one crate in the workspace.
//!
//! Each crate that owns a distinct failure domain (the heap, the bytecode
//! buffer, the VM, the IR builder) defines its own `thiserror` enum next to
//! the code that raises it. This module holds only the handful of error
//! kinds that don't belong to any single component.

use thiserror::Error;

/// Errors arising from [`crate::index_vec::IndexVec`] misuse.
#[derive(Debug, Error)]
pub enum IndexVecError {
    #[error("index out of bounds: index {index}, length {length}")]
    OutOfBounds { index: usize, length: usize },
}

pub type IndexVecResult<T> = std::result::Result<T, IndexVecError>;
