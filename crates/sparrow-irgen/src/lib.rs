//! Component H: the bytecode-to-IR builder. Lifts a single
//! [`sparrow_heap::ObjProto`] into a [`sparrow_ir::Graph`] by walking its
//! code linearly and reconstructing branch/loop structure purely from the
//! opcodes that actually transfer control at runtime (`Brt`/`Brf`/`Jump`/
//! `Loop`/`ForPrep`/`ForLoop`) — `If`/`EndIf`/`Brk`/`Cont` are inert
//! structural markers the interpreter itself skips over, so this builder
//! does too.

mod builder;
mod error;
mod frame;

pub use builder::build_graph;
pub use error::{BuildError, BuildResult};
pub use frame::Frame;
