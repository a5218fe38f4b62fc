//! The object model, string interning pool, collections, and garbage
//! collector shared by every other Sparrow crate.
//!
//! These four concerns live in one crate rather than four because the
//! collector needs private layout knowledge of every heap subtype to mark
//! and sweep it, and the string pool needs arena access to compare interned
//! candidates by content — splitting them apart would just reintroduce that
//! coupling through `pub(crate)` escape hatches.

pub mod error;
pub mod gc;
pub mod heap;
pub mod list;
pub mod map;
pub mod metaops;
pub mod object;
pub mod sparrow;
pub mod string_pool;
pub mod value;

pub use error::{HeapError, HeapResult};
pub use gc::{GcConfig, GcTrigger};
pub use heap::{Heap, LARGE_STRING_SIZE};
pub use list::ObjList;
pub use map::ObjMap;
pub use metaops::{Hook, MetaOps, NativeHook};
pub use object::{
    CallFn, HeapObject, MarkFn, NativeFn, ObjClosure, ObjComponent, ObjIterator, ObjLoop, ObjLoopIterator, ObjMethod,
    ObjModule, ObjProto, ObjString, ObjUdata, UpvalueCell, UpvalueDesc, UpvalueState,
};
pub use sparrow::Sparrow;
pub use value::{GcRef, Value, ValueKind};
