//! Node identities and the closed opcode set a [`crate::graph::Graph`] node
//! can carry (§4.G, §6.2). Modeled directly on the original `IrNode`: a
//! small fixed header (kind, id, effect bits, mark state) plus a generic
//! input list, with any node-specific immediate (a constant's value, a
//! global's name, an intrinsic's index) folded into the `NodeKind` payload
//! rather than a separate out-of-line union.

use sparrow_util::define_idx;

define_idx! {
    /// Dense index into a [`crate::graph::Graph`]'s node arena.
    pub struct NodeId
}

/// Which of the five families (§6.2) a node belongs to. Mirrors the
/// original's `IrGetKindCode` byte-range partition, but as a Rust enum
/// discriminant rather than an opcode-range check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Control,
    Shared,
    Constant,
    Primitive,
    HighIr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    // ---- control (§4.G) ----------------------------------------------------
    Start,
    End,
    Region,
    /// The unique control node that may carry Phis; bound by every Phi it
    /// hosts (§4.G).
    Merge,
    If,
    IfTrue,
    IfFalse,
    Loop,
    LoopExit,
    Ret,
    Jump,

    // ---- shared --------------------------------------------------------------
    /// Inputs: `[on_true, on_false]`, bound to its owning Merge.
    Phi,
    /// Selects one result out of a multi-result node (currently unused by the
    /// builder but kept as a first-class kind per §6.2's node family table,
    /// for a future multi-return Call).
    Projection { index: u32 },

    // ---- constants (not bound to any region) ---------------------------------
    Int32(i32),
    Int64(i64),
    Real64(f64),
    Str(String),
    Boolean(bool),
    Null,

    // ---- primitives ------------------------------------------------------------
    /// Inputs: element nodes, in order.
    PrimitiveList,
    /// Inputs: `Pair` nodes, in order.
    PrimitiveMap,
    /// Inputs: `[key, value]`.
    Pair,
    Closure { proto_index: u32 },
    /// A `Detach`-kind upvalue descriptor captured by a `Closure` primitive;
    /// inputs: none (the enclosing closure itself is implicit — it's always
    /// "self" at IR-build time).
    UpvalueDetach { index: u32 },
    Argument(u32),

    // ---- high-level ops (one-to-one with a bytecode family, §4.H) -------------
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Mod,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    Neg,
    Not,
    /// Boolean coercion without consuming the operand from the value stack
    /// (mirrors `Opcode::Test`).
    Test,
    /// Inputs: none; the upvalue index lives in the payload (effect-free —
    /// upvalue reads never run a hook).
    UGet { index: u32 },
    /// Inputs: `[value]`.
    USet { index: u32 },
    /// Inputs: `[receiver]` (`AGetN`/`AGetS`) or `[receiver, key]` (`AGet`).
    AGet { key: AttrKey },
    /// Inputs: `[receiver, value]` or `[receiver, key, value]`.
    ASet { key: AttrKey },
    /// Inputs: none; resolved by name at execution time (effectful — may
    /// observe the Component environment or trigger host state).
    GGet { name: String },
    /// Inputs: `[value]`.
    GSet { name: String },
    /// Inputs: `[iterator]`. Produces the key for `IdRefK`.
    IterKey,
    /// Inputs: `[iterator]`. Produces a 2-valued (key, value) result —
    /// modeled as a single node whose consumers route through `Projection`.
    IterKeyValue,
    /// Inputs: `[container]`. Builds an Iterator object (`ForPrep`).
    IterNew,
    /// Inputs: `[iterator]`. Boolean: whether the loop should continue
    /// (`ForLoop`'s test half).
    IterTest,
    /// Inputs: `[callee, args...]`.
    Call,
    /// Inputs: `args...`; the fixed intrinsic index lives in the payload.
    CallIntrinsic { index: u32 },
}

/// How an `AGet`/`ASet` resolves its key, mirroring the four bytecode
/// addressing modes (§4.F.5): immediate numeric index, immediate interned
/// string, a bound intrinsic-attribute slot, or a fully dynamic key popped
/// from the stack (carried as an extra `inputs` entry, not here).
#[derive(Debug, Clone, PartialEq)]
pub enum AttrKey {
    Numeric(u32),
    Named(String),
    Intrinsic(u32),
    Dynamic,
}

impl NodeKind {
    pub fn family(&self) -> Family {
        use NodeKind::*;
        match self {
            Start | End | Region | Merge | If | IfTrue | IfFalse | Loop | LoopExit | Ret | Jump => Family::Control,
            Phi | Projection { .. } => Family::Shared,
            Int32(_) | Int64(_) | Real64(_) | Str(_) | Boolean(_) | Null => Family::Constant,
            PrimitiveList | PrimitiveMap | Pair | Closure { .. } | UpvalueDetach { .. } | Argument(_) => Family::Primitive,
            Add | Sub | Mul | Div | Pow | Mod | Lt | Le | Gt | Ge | Eq | Ne | Neg | Not | Test | UGet { .. }
            | USet { .. } | AGet { .. } | ASet { .. } | GGet { .. } | GSet { .. } | IterKey | IterKeyValue
            | IterNew | IterTest | Call | CallIntrinsic { .. } => Family::HighIr,
        }
    }

    /// Whether evaluating this node can have an observable side effect
    /// (§4.G: "a statement has an effect iff `effect ∨ prop-effect`"). This
    /// is the node's *own* effect bit; `Graph::link` ORs in prop-effect from
    /// its inputs.
    pub fn has_own_effect(&self) -> bool {
        use NodeKind::*;
        matches!(
            self,
            USet { .. } | GGet { .. } | GSet { .. } | Call | CallIntrinsic { .. } | IterNew
        ) || matches!(self, AGet { key } if !matches!(key, AttrKey::Numeric(_)))
            || matches!(self, ASet { .. })
    }

    /// Min/max input arity, `-1` meaning unlimited (§4.G).
    pub fn input_arity(&self) -> (i32, i32) {
        use NodeKind::*;
        match self {
            Start | Int32(_) | Int64(_) | Real64(_) | Str(_) | Boolean(_) | Null | UGet { .. }
            | UpvalueDetach { .. } | Argument(_) | GGet { .. } => (0, 0),
            Ret | Jump | Neg | Not | Test | USet { .. } | IterKey | IterKeyValue | IterNew | IterTest
            | GSet { .. } => (1, 1),
            Pair | Add | Sub | Mul | Div | Pow | Mod | Lt | Le | Gt | Ge | Eq | Ne | Phi | If => (2, 2),
            // A predecessor control edge plus however many effectful
            // statements are bound to this region (§4.G).
            Region | IfTrue | IfFalse | Loop | LoopExit | Projection { .. } => (1, -1),
            // One input per `Ret` reached anywhere in the function.
            End => (1, -1),
            // Two control predecessors (If-true/If-false) plus bound Phis
            // and statements.
            Merge => (2, -1),
            Closure { .. } => (0, -1),
            AGet { key } => match key {
                AttrKey::Dynamic => (2, 2),
                _ => (1, 1),
            },
            ASet { key } => match key {
                AttrKey::Dynamic => (3, 3),
                _ => (2, 2),
            },
            PrimitiveList | PrimitiveMap | Call | CallIntrinsic { .. } => (0, -1),
        }
    }
}

/// Three-colour mark used for graph traversal (reachability, dump
/// ordering). Rather than reset every node before each walk, the graph
/// keeps a monotonic epoch and rotates White/Grey/Black by +2 per
/// traversal (§4.G) — a node's absolute `mark` value only means "Black"
/// relative to the epoch it was last visited under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mark {
    White,
    Grey,
    Black,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    /// Use-def chain: operands, plus (for control nodes) the statements
    /// bound to this region.
    pub inputs: Vec<NodeId>,
    /// Def-use chain: every node that has `self` as an input.
    pub outputs: Vec<NodeId>,
    /// This node's own effect bit.
    pub effect: bool,
    /// OR of every input's (effect ∨ prop_effect) — "one input has an
    /// effect" (§4.G).
    pub prop_effect: bool,
    /// Downstream of an unconditional jump within its region; set by the
    /// builder's dead-region stubs (§4.H.3), never by a later DCE pass.
    pub dead: bool,
    /// The region this node is bound to, for effectful statements only.
    pub bounded: Option<NodeId>,
    mark: u64,
}

impl Node {
    pub fn has_effect(&self) -> bool {
        self.effect || self.prop_effect
    }
}

pub(crate) fn new_node(id: NodeId, kind: NodeKind) -> Node {
    let effect = kind.has_own_effect();
    Node { id, kind, inputs: Vec::new(), outputs: Vec::new(), effect, prop_effect: false, dead: false, bounded: None, mark: 0 }
}

impl Node {
    pub(crate) fn mark_raw(&self) -> u64 {
        self.mark
    }

    pub(crate) fn set_mark_raw(&mut self, value: u64) {
        self.mark = value;
    }
}
