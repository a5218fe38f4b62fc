//! No front-end lexer/parser for Sparrow source syntax exists anywhere in
//! the workspace — §4.A–§4.I cover the heap, the bytecode format, the VM,
//! and the IR builder, never a text-to-bytecode compiler. `run`/`dump-ir`
//! still need *something* to turn a `FILE` argument into an `ObjProto`, so
//! this module is that something: a minimal, line-oriented bytecode
//! assembly text format, understood only here, never by a library crate.
//!
//! Grammar, one directive or instruction per line (blank lines and `#`
//! comments ignored):
//!
//! ```text
//! .narg <u32>          # argument count of the single top-level Proto
//! .num <f64>           # appends to the Proto's number constant pool
//! .str "text"          # interns `text` and appends to the string pool
//! <OPCODE> [<u32>]      # one instruction; operand required iff the opcode
//!                       # carries one (Opcode::has_operand)
//! ```
//!
//! Only a single Proto is produced — there is no directive for declaring
//! nested Protos, so `LoadCls` is accepted syntactically but will fail at
//! run time (`Opcode::LoadCls` needs a populated `Module::protos`, which a
//! single-Proto module never has). Closures are out of scope for this
//! format; see DESIGN.md.

use anyhow::{anyhow, bail, Context, Result};
use sparrow_bc::{CodeBuffer, Opcode};
use sparrow_heap::{GcRef, Heap, ObjModule, ObjProto};

pub struct AssembledProto {
    pub proto_ref: GcRef,
}

/// Assembles `source` into a single Proto owned by a freshly allocated,
/// single-member Module, returning the Proto's `GcRef`.
pub fn assemble(heap: &mut Heap, name: &str, source: &str) -> Result<AssembledProto> {
    let module_ref = heap.alloc_module(ObjModule { protos: Vec::new(), source_path: name.to_string(), prev: None, next: None });

    let mut code = CodeBuffer::new();
    let mut numbers = Vec::new();
    let mut strings = Vec::new();
    let mut narg = 0u32;

    for (line_no, raw_line) in source.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let lineno = (line_no + 1) as u32;
        if let Some(rest) = line.strip_prefix(".narg") {
            narg = rest.trim().parse().with_context(|| format!("line {lineno}: bad .narg operand"))?;
        } else if let Some(rest) = line.strip_prefix(".num") {
            let value: f64 = rest.trim().parse().with_context(|| format!("line {lineno}: bad .num operand"))?;
            numbers.push(value);
        } else if let Some(rest) = line.strip_prefix(".str") {
            let text = parse_quoted(rest.trim()).with_context(|| format!("line {lineno}: bad .str operand"))?;
            strings.push(heap.intern_string(text.as_bytes()));
        } else {
            emit_instruction(&mut code, line, lineno)?;
        }
    }

    let proto = ObjProto {
        code,
        numbers,
        strings,
        upvalues: Vec::new(),
        narg,
        name: name.to_string(),
        proto_index: 0,
        module: module_ref,
    };
    let proto_ref = heap.alloc_proto(proto);
    Ok(AssembledProto { proto_ref })
}

fn emit_instruction(code: &mut CodeBuffer, line: &str, lineno: u32) -> Result<()> {
    let mut parts = line.split_whitespace();
    let mnemonic = parts.next().ok_or_else(|| anyhow!("line {lineno}: empty instruction"))?;
    let op = opcode_named(mnemonic).ok_or_else(|| anyhow!("line {lineno}: unknown opcode `{mnemonic}`"))?;
    if op.has_operand() {
        let arg_text = parts.next().ok_or_else(|| anyhow!("line {lineno}: `{mnemonic}` requires an operand"))?;
        let arg: u32 = arg_text.parse().with_context(|| format!("line {lineno}: bad operand for `{mnemonic}`"))?;
        code.emit_a(op, arg, lineno, 0).with_context(|| format!("line {lineno}: emitting `{mnemonic}`"))?;
    } else {
        if parts.next().is_some() {
            bail!("line {lineno}: `{mnemonic}` does not take an operand");
        }
        code.emit_op(op, lineno, 0);
    }
    Ok(())
}

fn opcode_named(name: &str) -> Option<Opcode> {
    Opcode::ALL.into_iter().find(|op| op.name() == name)
}

fn parse_quoted(text: &str) -> Result<String> {
    let inner = text.strip_prefix('"').and_then(|s| s.strip_suffix('"')).ok_or_else(|| anyhow!("expected a quoted string"))?;
    Ok(inner.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sparrow_heap::GcConfig;

    #[test]
    fn assembles_a_trivial_return() {
        let mut heap = Heap::new(GcConfig::default());
        let asm = assemble(&mut heap, "t.sasm", ".narg 0\nLoadN1\nRet\n").unwrap();
        let proto = heap.as_proto(asm.proto_ref).unwrap();
        assert_eq!(proto.narg, 0);
        assert_eq!(proto.code.instruction_count(), 2);
    }

    #[test]
    fn number_and_string_pools_fill_in_directive_order() {
        let mut heap = Heap::new(GcConfig::default());
        let asm = assemble(&mut heap, "t.sasm", ".num 3.5\n.str \"hi\"\nLoadNumber 0\nLoadString 0\nRet\n").unwrap();
        let proto = heap.as_proto(asm.proto_ref).unwrap();
        assert_eq!(proto.numbers, vec![3.5]);
        assert_eq!(proto.strings.len(), 1);
        assert_eq!(heap.string_bytes(proto.strings[0]), b"hi");
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        let mut heap = Heap::new(GcConfig::default());
        assert!(assemble(&mut heap, "t.sasm", "NotARealOp\n").is_err());
    }

    #[test]
    fn missing_required_operand_is_rejected() {
        let mut heap = Heap::new(GcConfig::default());
        assert!(assemble(&mut heap, "t.sasm", "LoadNumber\n").is_err());
    }
}
