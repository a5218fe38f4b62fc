//! Component A: heap object subtype layouts (§3.2).
//!
//! [`HeapObject`] is the tagged union every arena slot in [`crate::heap::Heap`]
//! holds. The GC header the original prefixes every object with (next
//! pointer, mark bit, subtype tag) is not duplicated per-variant here: the
//! "next pointer" is implicit in the arena (sweeping walks the whole arena
//! rather than a hand-rolled linked list) and the mark bit lives on the
//! arena slot wrapper, uniformly, for every subtype.

use sparrow_bc::CodeBuffer;

use crate::list::ObjList;
use crate::map::ObjMap;
use crate::metaops::MetaOps;
use crate::value::{GcRef, Value};

/// Where an upvalue descriptor resolves its cell from (§3.2, §4.F.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpvalueState {
    /// Resolved from the creating frame's stack slot at closure-construction
    /// time.
    Embed,
    /// Aliased from a slot in the enclosing closure's own upvalue array.
    Detach,
}

#[derive(Debug, Clone, Copy)]
pub struct UpvalueDesc {
    pub index: u32,
    pub state: UpvalueState,
}

/// An interned (or, past the 512-byte cutoff, heap-unique) immutable byte
/// string (§4.B).
#[derive(Debug, Clone)]
pub struct ObjString {
    pub(crate) bytes: Box<[u8]>,
    pub(crate) hash: u32,
    /// True if this string is registered in the owning `Sparrow`'s string
    /// pool (i.e. it is short enough to intern and was not created via the
    /// large-string bypass).
    pub(crate) interned: bool,
}

impl ObjString {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes).unwrap_or("<invalid utf8>")
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn hash(&self) -> u32 {
        self.hash
    }
}

/// A compiled function: code plus constant pools plus upvalue descriptors
/// (§3.2).
#[derive(Debug, Clone)]
pub struct ObjProto {
    pub code: CodeBuffer,
    pub numbers: Vec<f64>,
    /// Interned `GcRef`s into the owning Module's `Sparrow` heap.
    pub strings: Vec<GcRef>,
    pub upvalues: Vec<UpvalueDesc>,
    pub narg: u32,
    pub name: String,
    /// Index of this Proto within its owning Module.
    pub proto_index: u32,
    pub module: GcRef,
}

/// A runtime binding of a [`ObjProto`] with its captured upvalue cells.
/// Upvalue cells are shared mutable storage: writing through one closure's
/// upvalue slot is visible to every closure that captured the same cell
/// (§4.F.8). Represented as `Vec<Value>` owned by the *defining* closure;
/// a `Detach` descriptor in a nested closure just stores the enclosing
/// closure's `GcRef` and an index, so both logically own the same cell by
/// indirection through that shared owner.
#[derive(Debug, Clone)]
pub struct ObjClosure {
    pub proto: GcRef,
    pub upvalues: Vec<UpvalueCell>,
}

/// One upvalue cell as captured by a `Closure`.
#[derive(Debug, Clone, Copy)]
pub enum UpvalueCell {
    /// The value lives directly in this closure's own array.
    Owned(Value),
    /// The value is aliased from slot `index` of the enclosing closure
    /// `owner`.
    Aliased { owner: GcRef, index: u32 },
}

pub type NativeFn = std::rc::Rc<dyn Fn(&mut crate::heap::Heap, &[Value]) -> crate::error::HeapResult<Value>>;

/// A native function pointer bound to a receiver, plus a display name, used
/// both for intrinsics and for host-registered methods (§3.2).
#[derive(Clone)]
pub struct ObjMethod {
    pub func: NativeFn,
    pub receiver: Value,
    pub name: String,
}

impl std::fmt::Debug for ObjMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjMethod").field("name", &self.name).finish()
    }
}

pub type MarkFn = Box<dyn FnMut(&Value)>;
pub type DestroyFn = Box<dyn FnMut()>;
pub type CallFn = std::rc::Rc<dyn Fn(&mut crate::heap::Heap, &[Value]) -> crate::error::HeapResult<Value>>;

/// Host-provided opaque value: name, destructor, GC mark callback, callable
/// hook, and an optional MetaOps table (§3.2).
pub struct ObjUdata {
    pub name: String,
    pub call: Option<CallFn>,
    pub metaops: Option<MetaOps>,
    mark_roots: Vec<Value>,
}

impl ObjUdata {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), call: None, metaops: None, mark_roots: Vec::new() }
    }

    /// Values the host wants the collector to treat as reachable through
    /// this Udata (the Rust analogue of the original's mark callback: we
    /// cannot invoke an arbitrary host closure safely during the mark
    /// phase, so the host instead registers the `Value`s to keep alive up
    /// front and updates them as its own state changes).
    pub fn set_mark_roots(&mut self, roots: Vec<Value>) {
        self.mark_roots = roots;
    }

    pub fn mark_roots(&self) -> &[Value] {
        &self.mark_roots
    }
}

impl std::fmt::Debug for ObjUdata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjUdata").field("name", &self.name).finish()
    }
}

/// Polymorphic cursor over String/List/Map/Loop/Udata (§4.F.7).
#[derive(Debug, Clone)]
pub enum ObjIterator {
    List { target: GcRef, index: usize },
    String { target: GcRef, index: usize },
    Map { target: GcRef, slot: usize },
    Loop { target: GcRef, current: i64 },
    /// Driven entirely through the target Udata's `iter` MetaOps hook;
    /// `state` is an opaque cursor value the hook itself defines.
    Udata { target: GcRef, state: Value },
}

/// A compiled module: its Protos, source text/path, and links in the
/// process-wide module ring (§3.2).
#[derive(Debug, Clone)]
pub struct ObjModule {
    pub protos: Vec<GcRef>,
    pub source_path: String,
    pub prev: Option<GcRef>,
    pub next: Option<GcRef>,
}

/// A Module bound to an environment — the runtime unit of execution (§3.2).
#[derive(Debug, Clone)]
pub struct ObjComponent {
    pub module: GcRef,
    pub env: GcRef,
}

/// An integer range `{start, end, step}` (§3.2), produced by the `loop`
/// intrinsic and consumed by `for`.
#[derive(Debug, Clone, Copy)]
pub struct ObjLoop {
    pub start: i64,
    pub end: i64,
    pub step: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct ObjLoopIterator {
    pub loop_ref: GcRef,
    pub index: i64,
}

/// The tagged union of every heap-object subtype (§3.2).
pub enum HeapObject {
    String(ObjString),
    List(ObjList),
    Map(ObjMap),
    Proto(ObjProto),
    Closure(ObjClosure),
    Method(ObjMethod),
    Udata(ObjUdata),
    Iterator(ObjIterator),
    Module(ObjModule),
    Component(ObjComponent),
    Loop(ObjLoop),
    LoopIterator(ObjLoopIterator),
}

impl HeapObject {
    pub fn type_name(&self) -> &'static str {
        match self {
            HeapObject::String(_) => "string",
            HeapObject::List(_) => "list",
            HeapObject::Map(_) => "map",
            HeapObject::Proto(_) => "proto",
            HeapObject::Closure(_) => "closure",
            HeapObject::Method(_) => "method",
            HeapObject::Udata(_) => "udata",
            HeapObject::Iterator(_) => "iterator",
            HeapObject::Module(_) => "module",
            HeapObject::Component(_) => "component",
            HeapObject::Loop(_) => "loop",
            HeapObject::LoopIterator(_) => "loop_iterator",
        }
    }
}

impl std::fmt::Debug for HeapObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HeapObject::{}", self.type_name())
    }
}
