//! `sparrow run <FILE>`: assemble, load, and execute a module, printing its
//! top-level result or reporting the structured error (§4.M).

use std::path::Path;

use anyhow::{Context, Result};
use sparrow_heap::{GcConfig, ObjClosure, Sparrow};
use sparrow_vm::{ExecContext, Interpreter, StackConfig};
use tracing::info;

use crate::assemble::assemble;

pub fn run(path: &Path, gc_config: GcConfig, stack_config: StackConfig) -> Result<()> {
    let source = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let name = path.display().to_string();

    let mut sparrow = Sparrow::new(gc_config);
    let assembled = assemble(sparrow.heap_mut(), &name, &source)?;
    let closure_ref = sparrow.heap_mut().alloc_closure(ObjClosure { proto: assembled.proto_ref, upvalues: Vec::new() });

    let mut interp = Interpreter::new(&stack_config);
    let ctx = ExecContext { env: sparrow.global_env() };

    info!(module = %name, "executing");
    match interp.call(&mut sparrow, ctx, closure_ref, &[]) {
        Ok(value) => {
            println!("{}", sparrow_vm::display_value(sparrow.heap(), value));
            Ok(())
        }
        Err(unwind) => {
            eprintln!("{unwind}");
            anyhow::bail!("script execution failed");
        }
    }
}
