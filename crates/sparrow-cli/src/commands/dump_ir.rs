//! `sparrow dump-ir <FILE>`: build the IR graph for each Proto in the
//! assembled module and print enough of its shape to eyeball during
//! development — node count, a histogram of node kinds, and the ids of
//! Start/End. Not the full Graphviz/textual node dump; that's out of scope
//! for this command (§4.M).

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use sparrow_heap::GcConfig;
use sparrow_irgen::build_graph;
use sparrow_util::Idx;

use crate::assemble::assemble;

pub fn dump_ir(path: &Path) -> Result<()> {
    let source = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let name = path.display().to_string();

    let mut heap = sparrow_heap::Heap::new(GcConfig::default());
    let assembled = assemble(&mut heap, &name, &source)?;

    let graph = build_graph(&heap, assembled.proto_ref).with_context(|| format!("building IR for {name}"))?;

    println!("proto: {name}");
    println!("nodes: {}", graph.len());
    println!("start: %{}", graph.start.index());
    println!("end:   %{}", graph.end.index());

    let mut histogram: BTreeMap<String, usize> = BTreeMap::new();
    for id in graph.ids() {
        let label = kind_family_name(&graph.node(id).kind);
        *histogram.entry(label).or_insert(0) += 1;
    }
    println!("kind histogram:");
    for (kind, count) in histogram {
        println!("  {kind:<16} {count}");
    }
    Ok(())
}

/// A node kind's bare variant name, stripping any payload — good enough for
/// a histogram grouping without a match arm per payload-bearing variant.
fn kind_family_name(kind: &sparrow_ir::NodeKind) -> String {
    let debug = format!("{kind:?}");
    debug.split(['(', ' ', '{']).next().unwrap_or("?").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reports_start_end_and_a_nonzero_node_count() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, ".narg 0\nLoadN1\nRet\n").unwrap();
        dump_ir(file.path()).unwrap();
    }
}
