//! Shared, small, ambient utilities used across the Sparrow workspace:
//! typed-index arenas (`index_vec`), the handful of error/trace types with
//! no single-crate owner, and nothing else — anything specific to a single
//! component lives in that component's own crate.

pub mod error;
pub mod index_vec;
pub mod trace;

pub use error::{IndexVecError, IndexVecResult};
pub use index_vec::{Idx, IndexVec};
pub use trace::{render_unwind, FrameKind, FrameTrace};
