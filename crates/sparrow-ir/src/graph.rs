//! The sea-of-nodes graph itself (§4.G): a node arena plus the Start/End
//! anchors and the dedup tables for immutable constants, grounded on the
//! original `IrGraph` (`num_table`/`spnum_table`/`str_table` plus cached
//! `true_node`/`false_node`/`null_node`).

use rustc_hash::FxHashMap;
use sparrow_util::IndexVec;

use crate::node::{new_node, Mark, Node, NodeId, NodeKind};

/// Number literals in this range get a single shared Constant node per
/// graph rather than one per occurrence, matching the original's
/// `spnum_table` fast path for the bytecode's own micro-immediate range.
const SMALL_INT_RANGE: std::ops::RangeInclusive<i32> = -5..=5;

pub struct Graph {
    nodes: IndexVec<NodeId, Node>,
    pub start: NodeId,
    pub end: NodeId,
    small_ints: [Option<NodeId>; 11],
    numbers: FxHashMap<u64 /* f64 bits */, NodeId>,
    strings: FxHashMap<String, NodeId>,
    true_node: Option<NodeId>,
    false_node: Option<NodeId>,
    null_node: Option<NodeId>,
    /// Monotonic traversal epoch; bumped by 2 per walk so a node's stored
    /// mark either matches the current epoch (Black), the previous one
    /// (Grey, mid-walk only — never observed between walks), or neither
    /// (White) without ever rewriting every node up front.
    epoch: u64,
}

impl Graph {
    pub fn new() -> Self {
        let mut nodes = IndexVec::new();
        let start = nodes.next_index();
        nodes.push(new_node(start, NodeKind::Start));
        let end = nodes.next_index();
        nodes.push(new_node(end, NodeKind::End));
        Self {
            nodes,
            start,
            end,
            small_ints: [None; 11],
            numbers: FxHashMap::default(),
            strings: FxHashMap::default(),
            true_node: None,
            false_node: None,
            null_node: None,
            epoch: 2,
        }
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.indices()
    }

    /// Allocates a bare node with no inputs and no region binding. Callers
    /// wire inputs with [`Graph::link`] and, for effectful statements, bind
    /// the owning region with [`Graph::bind`].
    pub fn new_node(&mut self, kind: NodeKind) -> NodeId {
        let id = self.nodes.next_index();
        self.nodes.push(new_node(id, kind))
    }

    /// Adds `input` to `node`'s use-def chain and atomically records the
    /// reverse def-use edge, then recomputes `node`'s prop-effect bit
    /// (§4.G: "adding an input atomically adds the reverse output").
    pub fn link(&mut self, node: NodeId, input: NodeId) {
        self.nodes[node].inputs.push(input);
        self.nodes[input].outputs.push(node);
        let input_has_effect = self.nodes[input].has_effect();
        if input_has_effect {
            self.nodes[node].prop_effect = true;
        }
    }

    /// Convenience for building a node with its full input list in one call.
    pub fn new_linked(&mut self, kind: NodeKind, inputs: &[NodeId]) -> NodeId {
        let id = self.new_node(kind);
        for &input in inputs {
            self.link(id, input);
        }
        id
    }

    /// Binds an effectful statement node to the region that dominates it
    /// (§4.G): the statement is recorded as the region's bound node and, per
    /// the input chain also covering "bound statements" for control nodes,
    /// linked as one of the region's inputs. A no-op for pure nodes — the
    /// builder may call this unconditionally and let it be ignored.
    pub fn bind(&mut self, node: NodeId, region: NodeId) {
        if self.nodes[node].has_effect() {
            self.nodes[node].bounded = Some(region);
            self.link(region, node);
        }
    }

    /// Binds a node to a region regardless of its effect bit. Used for
    /// `Phi` (§4.G's invariant that "a Phi's bounded node is exactly its
    /// Merge" holds whether or not the Phi's inputs are themselves
    /// effectful) and for `Ret` (a return always terminates its region, even
    /// one returning a plain constant).
    pub fn bind_unconditional(&mut self, node: NodeId, region: NodeId) {
        self.nodes[node].bounded = Some(region);
        self.link(region, node);
    }

    /// Redirects every occurrence of `old` in `node`'s inputs to `new`,
    /// keeping the def-use chain in sync. Used by the loop builder to patch
    /// in-body uses of a pre-loop value over to the Phi inserted once the
    /// body's net effect on that slot is known (§4.H.3's two-pass
    /// loop-carried-value pass).
    pub fn rewrite_input(&mut self, node: NodeId, old: NodeId, new: NodeId) {
        let mut changed = false;
        for slot in self.nodes[node].inputs.iter_mut() {
            if *slot == old {
                *slot = new;
                changed = true;
            }
        }
        if changed {
            self.nodes[old].outputs.retain(|&o| o != node);
            self.nodes[new].outputs.push(node);
        }
    }

    // ---- constant interning (§4.G: num_table / spnum_table / str_table) -----

    pub fn const_int32(&mut self, n: i32) -> NodeId {
        if SMALL_INT_RANGE.contains(&n) {
            let slot = (n - SMALL_INT_RANGE.start()) as usize;
            if let Some(id) = self.small_ints[slot] {
                return id;
            }
            let id = self.new_node(NodeKind::Int32(n));
            self.small_ints[slot] = Some(id);
            return id;
        }
        self.new_node(NodeKind::Int32(n))
    }

    pub fn const_real64(&mut self, value: f64) -> NodeId {
        if value.fract() == 0.0 && value >= i32::MIN as f64 && value <= i32::MAX as f64 {
            return self.const_int32(value as i32);
        }
        let bits = value.to_bits();
        if let Some(&id) = self.numbers.get(&bits) {
            return id;
        }
        let id = self.new_node(NodeKind::Real64(value));
        self.numbers.insert(bits, id);
        id
    }

    pub fn const_string(&mut self, s: impl Into<String>) -> NodeId {
        let s = s.into();
        if let Some(&id) = self.strings.get(&s) {
            return id;
        }
        let id = self.new_node(NodeKind::Str(s.clone()));
        self.strings.insert(s, id);
        id
    }

    pub fn const_bool(&mut self, value: bool) -> NodeId {
        let cached = if value { &mut self.true_node } else { &mut self.false_node };
        if let Some(id) = cached {
            return *id;
        }
        let id = self.new_node(NodeKind::Boolean(value));
        *cached = Some(id);
        id
    }

    pub fn const_null(&mut self) -> NodeId {
        if let Some(id) = self.null_node {
            return id;
        }
        let id = self.new_node(NodeKind::Null);
        self.null_node = Some(id);
        id
    }

    // ---- traversal (§4.G three-colour mark) ----------------------------------

    /// Starts a fresh traversal: every node not visited this walk reads as
    /// White without having been touched.
    fn next_epoch(&mut self) -> u64 {
        self.epoch += 2;
        self.epoch
    }

    fn color_of(&self, id: NodeId, epoch: u64) -> Mark {
        match self.nodes[id].mark_raw() {
            m if m == epoch => Mark::Black,
            m if m == epoch - 1 => Mark::Grey,
            _ => Mark::White,
        }
    }

    /// Depth-first walk over the def-use (output) chain starting at `End`,
    /// following `bounded` region links for effectful statements as well as
    /// direct inputs. Visits every node reachable backward from `End` — by
    /// §4.H's DCE-by-construction invariant, an unreferenced constant is
    /// simply absent from this set.
    pub fn reachable_from_end(&mut self) -> Vec<NodeId> {
        let epoch = self.next_epoch();
        let mut order = Vec::new();
        let mut stack = vec![self.end];
        while let Some(id) = stack.pop() {
            if self.color_of(id, epoch) == Mark::Black {
                continue;
            }
            self.nodes[id].set_mark_raw(epoch);
            order.push(id);
            for &input in &self.nodes[id].inputs {
                if self.color_of(input, epoch) != Mark::Black {
                    stack.push(input);
                }
            }
            if let Some(region) = self.nodes[id].bounded {
                if self.color_of(region, epoch) != Mark::Black {
                    stack.push(region);
                }
            }
        }
        order
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_ints_are_deduped() {
        let mut g = Graph::new();
        let a = g.const_int32(3);
        let b = g.const_int32(3);
        assert_eq!(a, b);
        let c = g.const_int32(4);
        assert_ne!(a, c);
    }

    #[test]
    fn linking_records_both_directions() {
        let mut g = Graph::new();
        let lhs = g.const_int32(1);
        let rhs = g.const_int32(2);
        let add = g.new_linked(NodeKind::Add, &[lhs, rhs]);
        assert_eq!(g.node(add).inputs, vec![lhs, rhs]);
        assert!(g.node(lhs).outputs.contains(&add));
        assert!(g.node(rhs).outputs.contains(&add));
    }

    #[test]
    fn unused_constant_is_unreachable_from_end() {
        let mut g = Graph::new();
        let used = g.const_int32(1);
        let _unused = g.const_int32(42);
        let ret = g.new_linked(NodeKind::Ret, &[used]);
        g.link(g.end, ret);
        let reachable = g.reachable_from_end();
        assert!(reachable.contains(&used));
        assert!(!reachable.contains(&_unused));
    }

    #[test]
    fn true_and_false_are_singletons() {
        let mut g = Graph::new();
        assert_eq!(g.const_bool(true), g.const_bool(true));
        assert_ne!(g.const_bool(true), g.const_bool(false));
    }
}
