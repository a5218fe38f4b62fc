//! Component G: the sea-of-nodes SSA graph (§4.G, §6.2). Deliberately
//! carries no knowledge of `sparrow-heap`/`sparrow-bc` — a `Graph` is pure
//! data; `sparrow-irgen` is the only crate that knows how to build one from
//! a Proto's bytecode.

pub mod dump;
pub mod graph;
pub mod node;

pub use dump::dump;
pub use graph::Graph;
pub use node::{AttrKey, Family, Mark, Node, NodeId, NodeKind};
