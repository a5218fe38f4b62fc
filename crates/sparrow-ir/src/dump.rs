//! Text rendering of a [`Graph`], in the same "one line per node" spirit as
//! `sparrow_bc::CodeBuffer::dump`, used by the CLI's `dump-ir` subcommand and
//! by tests that want a readable graph snapshot without a `dot` viewer.

use crate::graph::Graph;
use crate::node::{NodeId, NodeKind};

fn kind_label(kind: &NodeKind) -> String {
    use NodeKind::*;
    match kind {
        Int32(n) => format!("Int32({n})"),
        Int64(n) => format!("Int64({n})"),
        Real64(n) => format!("Real64({n})"),
        Str(s) => format!("Str({s:?})"),
        Boolean(b) => format!("Boolean({b})"),
        Null => "Null".to_string(),
        Closure { proto_index } => format!("Closure(proto={proto_index})"),
        UpvalueDetach { index } => format!("UpvalueDetach({index})"),
        Argument(n) => format!("Argument({n})"),
        Projection { index } => format!("Projection({index})"),
        UGet { index } => format!("UGet({index})"),
        USet { index } => format!("USet({index})"),
        AGet { key } => format!("AGet({key:?})"),
        ASet { key } => format!("ASet({key:?})"),
        GGet { name } => format!("GGet({name:?})"),
        GSet { name } => format!("GSet({name:?})"),
        CallIntrinsic { index } => format!("CallIntrinsic({index})"),
        other => format!("{other:?}"),
    }
}

/// Renders every node reachable from `End`, in the order [`Graph::reachable_from_end`]
/// visits them, as `%id = Kind(inputs...)`.
pub fn dump(graph: &mut Graph) -> String {
    let mut order = graph.reachable_from_end();
    order.reverse();
    let mut out = String::new();
    for id in order {
        out.push_str(&render_line(graph, id));
        out.push('\n');
    }
    out
}

fn render_line(graph: &Graph, id: NodeId) -> String {
    let node = graph.node(id);
    let inputs: Vec<String> = node.inputs.iter().map(|i| format!("%{}", i.index_for_dump())).collect();
    let effect = if node.has_effect() { " [effect]" } else { "" };
    let dead = if node.dead { " [dead]" } else { "" };
    format!("%{} = {}({}){}{}", id.index_for_dump(), kind_label(&node.kind), inputs.join(", "), effect, dead)
}

impl NodeId {
    /// A stable, debug-friendly numeric form for dumps; not the same thing
    /// as arena reuse after a hypothetical compaction pass (none exists yet).
    fn index_for_dump(self) -> usize {
        use sparrow_util::Idx;
        self.index()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeKind;

    #[test]
    fn dump_includes_linked_nodes_only() {
        let mut g = Graph::new();
        let a = g.const_int32(1);
        let b = g.const_int32(2);
        let add = g.new_linked(NodeKind::Add, &[a, b]);
        let ret = g.new_linked(NodeKind::Ret, &[add]);
        g.link(g.end, ret);
        let text = dump(&mut g);
        assert!(text.contains("Add"));
        assert!(text.contains("Ret"));
    }
}
