//! Component F: the register-plus-stack bytecode interpreter (§4.F). One
//! `Interpreter` owns the `Runtime` (the call-thread/frame stack); the heap
//! and global state live in the `Sparrow` instance passed into every call so
//! the interpreter itself stays reentrancy-safe — `run_string`/`import` just
//! recurse into `run`.

use sparrow_bc::Opcode;
use sparrow_heap::{
    GcRef, Heap, HeapObject, Hook, MetaOps, ObjIterator, ObjLoopIterator, ObjMap, Sparrow, UpvalueCell, UpvalueDesc,
    UpvalueState, Value, ValueKind,
};

use crate::config::StackConfig;
use crate::error::{SparrowError, SparrowResult, Unwind};
use crate::frame::{CallFrame, CallThread, Runtime};
use crate::intrinsics::{self, ScriptCaller};

/// The running Component's environment Map — every frame's global
/// read/write resolves against this first (§4.F.9). The Module a given
/// frame's `LoadCls` resolves proto indices against is *not* carried here:
/// it is read straight off the executing closure's own Proto, since a
/// closure called across module boundaries (e.g. an imported callback)
/// must still resolve its own nested closures against the module that
/// defined it, not whichever module called it.
#[derive(Debug, Clone, Copy)]
pub struct ExecContext {
    pub env: GcRef,
}

pub struct Interpreter {
    runtime: Runtime,
}

impl Interpreter {
    pub fn new(stack: &StackConfig) -> Self {
        Self { runtime: Runtime::new(stack.initial_stack_size, stack.max_stack_size, stack.max_frames) }
    }

    /// Runs `closure` with `args` to completion, returning its result or an
    /// [`Unwind`] carrying the frame trace captured at the error site.
    pub fn call(
        &mut self,
        sparrow: &mut Sparrow,
        ctx: ExecContext,
        closure: GcRef,
        args: &[Value],
    ) -> Result<Value, Unwind> {
        self.invoke_value(sparrow, ctx, Value::heap(closure), args).map_err(|error| {
            let frames = self.runtime.current_thread().trace(sparrow.heap());
            Unwind { error, frames }
        })
    }

    // ---- call dispatch (§4.F.6) --------------------------------------------

    /// Routes a call through the callee's type, per §4.F.6: Closures push a
    /// real frame and enter the dispatch loop; Method/Udata invoke their
    /// native hook synchronously behind a one-frame push/pop (kept only so
    /// error traces show the call).
    fn invoke_value(
        &mut self,
        sparrow: &mut Sparrow,
        ctx: ExecContext,
        callee: Value,
        args: &[Value],
    ) -> SparrowResult<Value> {
        match callee.kind() {
            ValueKind::Heap(r) => match sparrow.heap().get(r) {
                HeapObject::Closure(_) => self.call_closure(sparrow, ctx, r, args),
                HeapObject::Method(_) => self.call_method(sparrow, r, args),
                HeapObject::Udata(_) => self.call_udata(sparrow, r, args),
                other => Err(SparrowError::NotCallable(other.type_name())),
            },
            _ => Err(SparrowError::NotCallable(callee.type_name())),
        }
    }

    fn call_method(&mut self, sparrow: &mut Sparrow, method_ref: GcRef, args: &[Value]) -> SparrowResult<Value> {
        let thread = self.runtime.current_thread_mut();
        thread.push_frame(CallFrame {
            base_ptr: thread.stack.len() as i64,
            pc: 0,
            closure: None,
            callable: Value::heap(method_ref),
            narg: args.len() as u32,
        })?;
        let method = sparrow.heap().as_method(method_ref)?.clone();
        let result = (method.func)(sparrow.heap_mut(), args).map_err(SparrowError::from);
        self.runtime.current_thread_mut().frames.pop();
        result
    }

    fn call_udata(&mut self, sparrow: &mut Sparrow, udata_ref: GcRef, args: &[Value]) -> SparrowResult<Value> {
        let thread = self.runtime.current_thread_mut();
        thread.push_frame(CallFrame {
            base_ptr: thread.stack.len() as i64,
            pc: 0,
            closure: None,
            callable: Value::heap(udata_ref),
            narg: args.len() as u32,
        })?;
        let call_fn = sparrow
            .heap()
            .as_udata(udata_ref)?
            .call
            .clone()
            .ok_or(SparrowError::NotCallable("udata"))?;
        let result = call_fn(sparrow.heap_mut(), args).map_err(SparrowError::from);
        self.runtime.current_thread_mut().frames.pop();
        result
    }

    /// Pushes a Closure's frame and drives the dispatch loop until that
    /// frame (and only that frame) returns.
    fn call_closure(
        &mut self,
        sparrow: &mut Sparrow,
        ctx: ExecContext,
        closure_ref: GcRef,
        args: &[Value],
    ) -> SparrowResult<Value> {
        let depth_before = self.runtime.current_thread().frames.len();
        let thread = self.runtime.current_thread_mut();
        let base_ptr = thread.stack.len() as i64;
        for arg in args {
            thread.push_value(*arg)?;
        }
        thread.push_frame(CallFrame { base_ptr, pc: 0, closure: Some(closure_ref), callable: Value::heap(closure_ref), narg: args.len() as u32 })?;
        self.run_until(sparrow, ctx, depth_before)
    }

    /// The main dispatch loop (§4.F.2). Runs until the call thread's frame
    /// count drops back to `target_depth`, i.e. until the frame pushed by
    /// the caller has returned.
    fn run_until(&mut self, sparrow: &mut Sparrow, ctx: ExecContext, target_depth: usize) -> SparrowResult<Value> {
        loop {
            if self.runtime.current_thread().frames.len() == target_depth {
                // The frame we were driving has already returned; its value
                // was left on the stack top by the Ret handler below.
                return Ok(self.runtime.current_thread_mut().pop_value());
            }
            self.step(sparrow, ctx)?;
        }
    }

    /// Every Value the collector must treat as reachable before running a
    /// cycle mid-execution (§4.D): the embedder-level roots `Sparrow` always
    /// keeps alive, plus whatever the interpreter itself is holding on the
    /// value stack and in in-flight call frames.
    fn gc_roots(&self, sparrow: &Sparrow) -> Vec<Value> {
        let mut roots = sparrow.permanent_roots();
        roots.extend(self.runtime.stack_roots());
        roots
    }

    /// Executes exactly one instruction in the thread's current frame.
    fn step(&mut self, sparrow: &mut Sparrow, ctx: ExecContext) -> SparrowResult<()> {
        if sparrow.heap().gc_pending() {
            let roots = self.gc_roots(sparrow);
            sparrow.heap_mut().maybe_collect(&roots);
        }
        let frame = *self.runtime.current_thread().current_frame();
        let closure_ref = frame.closure.expect("dispatch loop only steps script frames");
        let proto_ref = sparrow.heap().as_closure(closure_ref)?.proto;
        let pc = frame.pc;
        let (op, arg) = {
            let proto = sparrow.heap().as_proto(proto_ref)?;
            let op = proto
                .code
                .opcode_at(pc)
                .ok_or(SparrowError::MalformedBytecode { pc, reason: "pc past end of code".into() })?;
            let arg = if op.has_operand() { proto.code.decode_arg(pc) } else { 0 };
            (op, arg)
        };
        let width = {
            let proto = sparrow.heap().as_proto(proto_ref)?;
            proto.code.instruction_width(pc)
        };
        self.runtime.current_thread_mut().current_frame_mut().pc = pc + width;

        self.dispatch(sparrow, ctx, closure_ref, proto_ref, frame.base_ptr as usize, op, arg)
    }

    // ---- per-opcode dispatch ------------------------------------------------

    fn dispatch(
        &mut self,
        sparrow: &mut Sparrow,
        ctx: ExecContext,
        closure_ref: GcRef,
        proto_ref: GcRef,
        base: usize,
        op: Opcode,
        arg: u32,
    ) -> SparrowResult<()> {
        use Opcode::*;
        match op {
            // ---- literal loads --------------------------------------------
            LoadTrue => self.push(sparrow, Value::TRUE),
            LoadFalse => self.push(sparrow, Value::FALSE),
            LoadNull => self.push(sparrow, Value::NULL),
            LoadNN5 | LoadNN4 | LoadNN3 | LoadNN2 | LoadNN1 | LoadN0 | LoadN1 | LoadN2 | LoadN3 | LoadN4 | LoadN5 => {
                let n = sparrow_bc::small_int_for_opcode(op).expect("micro-immediate load");
                self.push(sparrow, Value::number(n as f64))
            }
            LoadNumber => {
                let n = sparrow.heap().as_proto(proto_ref)?.numbers[arg as usize];
                self.push(sparrow, Value::number(n))
            }
            LoadString => {
                let s = sparrow.heap().as_proto(proto_ref)?.strings[arg as usize];
                self.push(sparrow, Value::heap(s))
            }
            LoadV => {
                let v = self.read_slot(sparrow, base, arg as usize);
                self.push(sparrow, v)
            }

            // ---- moves ------------------------------------------------------
            MoveV => {
                let v = self.pop(sparrow);
                self.write_slot(sparrow, base, arg as usize, v);
            }
            MoveTrue => self.write_slot(sparrow, base, arg as usize, Value::TRUE),
            MoveFalse => self.write_slot(sparrow, base, arg as usize, Value::FALSE),
            MoveNull => self.write_slot(sparrow, base, arg as usize, Value::NULL),
            MoveNN5 | MoveNN4 | MoveNN3 | MoveNN2 | MoveNN1 | MoveN0 | MoveN1 | MoveN2 | MoveN3 | MoveN4 | MoveN5 => {
                let n = sparrow_bc::small_int_for_opcode(op).expect("micro-immediate move");
                self.write_slot(sparrow, base, arg as usize, Value::number(n as f64));
            }

            Pop => {
                self.pop(sparrow);
            }

            // ---- arithmetic --------------------------------------------------
            AddVV | AddNV | AddVN | AddSV | AddVS => {
                let (lhs, rhs) = self.binary_operands(sparrow, proto_ref, op, arg)?;
                let result = arith_add(sparrow.heap_mut(), lhs, rhs)?;
                self.push(sparrow, result);
            }
            SubVV | SubNV | SubVN => {
                let (lhs, rhs) = self.binary_operands(sparrow, proto_ref, op, arg)?;
                let result = arith_numeric(sparrow.heap(), lhs, rhs, |a, b| a - b)?;
                self.push(sparrow, result);
            }
            MulVV | MulNV | MulVN => {
                let (lhs, rhs) = self.binary_operands(sparrow, proto_ref, op, arg)?;
                let result = arith_numeric(sparrow.heap(), lhs, rhs, |a, b| a * b)?;
                self.push(sparrow, result);
            }
            DivVV | DivNV | DivVN => {
                let (lhs, rhs) = self.binary_operands(sparrow, proto_ref, op, arg)?;
                let result = arith_numeric(sparrow.heap(), lhs, rhs, |a, b| a / b)?;
                self.push(sparrow, result);
            }
            PowVV | PowNV | PowVN => {
                let (lhs, rhs) = self.binary_operands(sparrow, proto_ref, op, arg)?;
                let result = arith_numeric(sparrow.heap(), lhs, rhs, |a, b| a.powf(b))?;
                self.push(sparrow, result);
            }
            ModVV | ModNV | ModVN => {
                let (lhs, rhs) = self.binary_operands(sparrow, proto_ref, op, arg)?;
                let result = arith_mod(sparrow.heap(), lhs, rhs)?;
                self.push(sparrow, result);
            }
            Neg => {
                let v = self.pop(sparrow);
                let n = coerce_number(sparrow.heap(), v)?;
                self.push(sparrow, Value::number(-n));
            }
            Not => {
                let v = self.pop(sparrow);
                self.push(sparrow, Value::bool(!v.truthy()));
            }
            Test => {
                let v = *self.peek(sparrow);
                self.push(sparrow, Value::bool(v.truthy()));
            }

            // ---- comparisons --------------------------------------------------
            LtVV | LtNV | LtVN | LtSV | LtVS => self.compare(sparrow, proto_ref, op, arg, |o| o.is_lt())?,
            LeVV | LeNV | LeVN | LeSV | LeVS => self.compare(sparrow, proto_ref, op, arg, |o| o.is_le())?,
            GtVV | GtNV | GtVN | GtSV | GtVS => self.compare(sparrow, proto_ref, op, arg, |o| o.is_gt())?,
            GeVV | GeNV | GeVN | GeSV | GeVS => self.compare(sparrow, proto_ref, op, arg, |o| o.is_ge())?,
            EqVV | EqNV | EqVN | EqSV | EqVS => {
                let (lhs, rhs) = self.binary_operands(sparrow, proto_ref, op, arg)?;
                let eq = values_equal(sparrow.heap(), lhs, rhs);
                self.push(sparrow, Value::bool(eq));
            }
            NeVV | NeNV | NeVN | NeSV | NeVS => {
                let (lhs, rhs) = self.binary_operands(sparrow, proto_ref, op, arg)?;
                let eq = values_equal(sparrow.heap(), lhs, rhs);
                self.push(sparrow, Value::bool(!eq));
            }
            EqVNull => {
                let v = self.pop(sparrow);
                self.push(sparrow, Value::bool(v.is_null()));
            }
            EqNullV => {
                let v = self.pop(sparrow);
                self.push(sparrow, Value::bool(v.is_null()));
            }
            NeVNull => {
                let v = self.pop(sparrow);
                self.push(sparrow, Value::bool(!v.is_null()));
            }
            NeNullV => {
                let v = self.pop(sparrow);
                self.push(sparrow, Value::bool(!v.is_null()));
            }

            // ---- attribute / index access (§4.F.5) ---------------------------
            AGetN => {
                let receiver = self.pop(sparrow);
                let v = self.index_get(sparrow, receiver, Value::number(arg as f64))?;
                self.push(sparrow, v);
            }
            AGetS => {
                let key = sparrow.heap().as_proto(proto_ref)?.strings[arg as usize];
                let receiver = self.pop(sparrow);
                let v = self.attr_get(sparrow, receiver, key)?;
                self.push(sparrow, v);
            }
            AGetI => {
                let receiver = self.pop(sparrow);
                let method = bind_intrinsic_attribute(sparrow, arg as usize, receiver);
                self.push(sparrow, method);
            }
            AGet => {
                let key = self.pop(sparrow);
                let receiver = self.pop(sparrow);
                let v = self.index_get(sparrow, receiver, key)?;
                self.push(sparrow, v);
            }
            ASetN => {
                let value = self.pop(sparrow);
                let receiver = self.pop(sparrow);
                self.index_set(sparrow, receiver, Value::number(arg as f64), value)?;
            }
            ASetS => {
                let key = sparrow.heap().as_proto(proto_ref)?.strings[arg as usize];
                let value = self.pop(sparrow);
                let receiver = self.pop(sparrow);
                self.attr_set(sparrow, receiver, key, value)?;
            }
            ASet => {
                let value = self.pop(sparrow);
                let key = self.pop(sparrow);
                let receiver = self.pop(sparrow);
                self.index_set(sparrow, receiver, key, value)?;
            }
            ASetI => {
                let value = self.pop(sparrow);
                let receiver = self.pop(sparrow);
                intrinsics::call_intrinsic_attribute(arg as usize, sparrow.heap_mut(), receiver, &[value])?;
            }

            // ---- upvalues (§4.F.8) --------------------------------------------
            UGet => {
                let v = self.read_upvalue(sparrow, closure_ref, arg as usize)?;
                self.push(sparrow, v);
            }
            USet => {
                let v = self.pop(sparrow);
                self.write_upvalue(sparrow, closure_ref, arg as usize, v)?;
            }
            USetTrue => self.write_upvalue(sparrow, closure_ref, arg as usize, Value::TRUE)?,
            USetFalse => self.write_upvalue(sparrow, closure_ref, arg as usize, Value::FALSE)?,
            USetNull => self.write_upvalue(sparrow, closure_ref, arg as usize, Value::NULL)?,

            // ---- globals (§4.F.9) ----------------------------------------------
            GGet => {
                let name = sparrow.heap().as_proto(proto_ref)?.strings[arg as usize];
                let v = self.global_get(sparrow, ctx, name)?;
                self.push(sparrow, v);
            }
            GSet => {
                let name = sparrow.heap().as_proto(proto_ref)?.strings[arg as usize];
                let v = self.pop(sparrow);
                self.global_set(sparrow, ctx, name, v);
            }
            GSetTrue => {
                let name = sparrow.heap().as_proto(proto_ref)?.strings[arg as usize];
                self.global_set(sparrow, ctx, name, Value::TRUE);
            }
            GSetFalse => {
                let name = sparrow.heap().as_proto(proto_ref)?.strings[arg as usize];
                self.global_set(sparrow, ctx, name, Value::FALSE);
            }
            GSetNull => {
                let name = sparrow.heap().as_proto(proto_ref)?.strings[arg as usize];
                self.global_set(sparrow, ctx, name, Value::NULL);
            }

            // ---- iteration (§4.F.7) ---------------------------------------------
            ForPrep => self.for_prep(sparrow, arg as usize)?,
            ForLoop => self.for_loop(sparrow, arg as usize)?,
            IdRefK => {
                let iter_ref = self.peek(sparrow).as_heap().expect("FORPREP leaves an Iterator on the stack top");
                let key = self.iterator_key(sparrow, iter_ref)?;
                self.write_slot(sparrow, base, arg as usize, key);
            }
            IdRefKV => {
                let iter_ref = self.peek(sparrow).as_heap().expect("FORPREP leaves an Iterator on the stack top");
                let (key, value) = self.iterator_key_value(sparrow, iter_ref)?;
                self.write_slot(sparrow, base, arg as usize, key);
                self.write_slot(sparrow, base, arg as usize + 1, value);
            }

            // ---- control flow ---------------------------------------------------
            Brt => {
                let v = self.pop(sparrow);
                if v.truthy() {
                    self.jump(sparrow, arg as usize);
                }
            }
            Brf => {
                let v = self.pop(sparrow);
                if !v.truthy() {
                    self.jump(sparrow, arg as usize);
                }
            }
            If | EndIf | Brk | Cont => {
                // Structural markers only; the compiler resolves their
                // operand into the matching `Jump`/`Brt`/`Brf` targets, so
                // at execution time they are no-ops if reached directly.
            }
            Loop => self.jump(sparrow, arg as usize),
            Jump => self.jump(sparrow, arg as usize),

            // ---- calls (§4.F.6) --------------------------------------------------
            Call0 => self.do_call(sparrow, ctx, 0)?,
            Call1 => self.do_call(sparrow, ctx, 1)?,
            Call2 => self.do_call(sparrow, ctx, 2)?,
            Call3 => self.do_call(sparrow, ctx, 3)?,
            Call4 => self.do_call(sparrow, ctx, 4)?,
            Call => self.do_call(sparrow, ctx, arg as usize)?,

            // ---- returns ------------------------------------------------------
            Ret => {
                let v = self.pop(sparrow);
                self.do_return(sparrow, v);
            }
            RetNull => self.do_return(sparrow, Value::NULL),
            RetN0 => self.do_return(sparrow, Value::number(0.0)),
            RetN1 => self.do_return(sparrow, Value::number(1.0)),
            RetNN1 => self.do_return(sparrow, Value::number(-1.0)),
            RetN => self.do_return(sparrow, Value::number(arg as f64)),
            RetS => {
                let s = sparrow.heap().as_proto(proto_ref)?.strings[arg as usize];
                self.do_return(sparrow, Value::heap(s));
            }
            RetT => self.do_return(sparrow, Value::TRUE),
            RetF => self.do_return(sparrow, Value::FALSE),

            // ---- constructors ---------------------------------------------------
            NewL0 | NewL1 | NewL2 | NewL3 | NewL4 | NewL => {
                let n = match op {
                    NewL0 => 0,
                    NewL1 => 1,
                    NewL2 => 2,
                    NewL3 => 3,
                    NewL4 => 4,
                    _ => arg as usize,
                };
                let elements = self.pop_n(sparrow, n);
                let list_ref = sparrow.heap_mut().alloc_list(sparrow_heap::ObjList::from_values(elements));
                self.push(sparrow, Value::heap(list_ref));
            }
            NewM0 | NewM1 | NewM2 | NewM3 | NewM4 | NewM => {
                let pairs = match op {
                    NewM0 => 0,
                    NewM1 => 1,
                    NewM2 => 2,
                    NewM3 => 3,
                    NewM4 => 4,
                    _ => arg as usize,
                };
                let flat = self.pop_n(sparrow, pairs * 2);
                let map_ref = sparrow.heap_mut().alloc_map(ObjMap::new());
                for pair in flat.chunks_exact(2) {
                    let key_ref = pair[0].as_heap().ok_or(SparrowError::NotCallable("non-string map key"))?;
                    sparrow.heap_mut().map_insert(map_ref, key_ref, pair[1])?;
                }
                self.push(sparrow, Value::heap(map_ref));
            }

            // ---- closures (§4.F.8) ------------------------------------------------
            LoadCls => {
                let v = self.load_closure(sparrow, closure_ref, proto_ref, base, arg as usize)?;
                self.push(sparrow, v);
            }

            // ---- dedicated intrinsic fast paths (§4.I) ----------------------------
            ICallTypeOf | ICallIsBoolean | ICallIsString | ICallIsNumber | ICallIsNull | ICallIsList | ICallIsMap
            | ICallIsClosure | ICallToString | ICallToNumber | ICallToBoolean | ICallPrint | ICallError
            | ICallAssert | ICallImport | ICallSize | ICallRange | ICallLoop | ICallRunString | ICallMin
            | ICallMax | ICallSort | ICallSet | ICallGet | ICallExist | ICallMSec => {
                self.call_fast_intrinsic(sparrow, op, arg as usize)?;
            }

            Nop => {}
        }
        Ok(())
    }

    // ---- stack/slot helpers --------------------------------------------------

    fn push(&mut self, sparrow: &Sparrow, v: Value) {
        let _ = sparrow;
        self.runtime.current_thread_mut().stack.push(v);
    }

    fn pop(&mut self, sparrow: &Sparrow) -> Value {
        let _ = sparrow;
        self.runtime.current_thread_mut().pop_value()
    }

    fn pop_n(&mut self, sparrow: &Sparrow, n: usize) -> Vec<Value> {
        let _ = sparrow;
        let thread = self.runtime.current_thread_mut();
        let start = thread.stack.len() - n;
        thread.stack.split_off(start)
    }

    fn peek(&self, sparrow: &Sparrow) -> &Value {
        let _ = sparrow;
        self.runtime.current_thread().stack.last().expect("peek on empty stack")
    }

    /// Reads frame-relative slot `index`, tolerating a not-yet-written slot
    /// by producing `Null` (§4.F.3 — required so `var c = c;` compiles).
    fn read_slot(&mut self, _sparrow: &Sparrow, base: usize, index: usize) -> Value {
        self.runtime.current_thread().stack.get(base + index).copied().unwrap_or(Value::NULL)
    }

    fn write_slot(&mut self, _sparrow: &Sparrow, base: usize, index: usize, v: Value) {
        let thread = self.runtime.current_thread_mut();
        let slot = base + index;
        if slot >= thread.stack.len() {
            thread.stack.resize(slot + 1, Value::NULL);
        }
        thread.stack[slot] = v;
    }

    fn jump(&mut self, _sparrow: &Sparrow, target: usize) {
        self.runtime.current_thread_mut().current_frame_mut().pc = target;
    }

    // ---- arithmetic/comparison operand fetch ---------------------------------

    /// Resolves the two operands of a binary opcode: `VV` pops both from the
    /// stack, `NV`/`SV` fetch the left operand from the Proto's constant
    /// pool and pop the right from the stack, `VN`/`VS` the mirror.
    fn binary_operands(
        &mut self,
        sparrow: &mut Sparrow,
        proto_ref: GcRef,
        op: Opcode,
        arg: u32,
    ) -> SparrowResult<(Value, Value)> {
        use Opcode::*;
        let is_n_left = matches!(op, AddNV | SubNV | MulNV | DivNV | PowNV | ModNV | LtNV | LeNV | GtNV | GeNV | EqNV | NeNV);
        let is_n_right = matches!(op, AddVN | SubVN | MulVN | DivVN | PowVN | ModVN | LtVN | LeVN | GtVN | GeVN | EqVN | NeVN);
        let is_s_left = matches!(op, AddSV | LtSV | LeSV | GtSV | GeSV | EqSV | NeSV);
        let is_s_right = matches!(op, AddVS | LtVS | LeVS | GtVS | GeVS | EqVS | NeVS);
        if is_n_left {
            let n = sparrow.heap().as_proto(proto_ref)?.numbers[arg as usize];
            let rhs = self.pop(sparrow);
            Ok((Value::number(n), rhs))
        } else if is_n_right {
            let n = sparrow.heap().as_proto(proto_ref)?.numbers[arg as usize];
            let lhs = self.pop(sparrow);
            Ok((lhs, Value::number(n)))
        } else if is_s_left {
            let s = sparrow.heap().as_proto(proto_ref)?.strings[arg as usize];
            let rhs = self.pop(sparrow);
            Ok((Value::heap(s), rhs))
        } else if is_s_right {
            let s = sparrow.heap().as_proto(proto_ref)?.strings[arg as usize];
            let lhs = self.pop(sparrow);
            Ok((lhs, Value::heap(s)))
        } else {
            let rhs = self.pop(sparrow);
            let lhs = self.pop(sparrow);
            Ok((lhs, rhs))
        }
    }

    fn compare(
        &mut self,
        sparrow: &mut Sparrow,
        proto_ref: GcRef,
        op: Opcode,
        arg: u32,
        accept: impl Fn(std::cmp::Ordering) -> bool,
    ) -> SparrowResult<()> {
        let (lhs, rhs) = self.binary_operands(sparrow, proto_ref, op, arg)?;
        let ordering = compare_values(sparrow.heap(), lhs, rhs)?;
        self.push(sparrow, Value::bool(accept(ordering)));
        Ok(())
    }

    // ---- attribute / index access (§4.F.5) -----------------------------------

    fn index_get(&mut self, sparrow: &mut Sparrow, receiver: Value, key: Value) -> SparrowResult<Value> {
        match receiver.kind() {
            ValueKind::Heap(r) => match sparrow.heap().get(r) {
                HeapObject::List(_) => {
                    let index = coerce_number(sparrow.heap(), key)? as i64;
                    Ok(sparrow.heap().as_list(r)?.get(index)?)
                }
                HeapObject::String(_) => {
                    let index = coerce_number(sparrow.heap(), key)? as i64;
                    let bytes = sparrow.heap().string_bytes(r);
                    let byte = *bytes.get(index as usize).ok_or(sparrow_heap::HeapError::IndexOutOfRange { index, size: bytes.len() })?;
                    Ok(Value::heap(sparrow.heap_mut().intern_string(&[byte])))
                }
                HeapObject::Map(_) => {
                    if let Some(result) = self.invoke_optional_hook(sparrow, r, |m| &mut m.get, receiver, &[key])? {
                        return Ok(result);
                    }
                    let key_ref = key.as_heap().ok_or(SparrowError::NotCallable("non-string map key"))?;
                    Ok(sparrow.heap().map_get(r, key_ref)?.unwrap_or(Value::NULL))
                }
                HeapObject::Udata(_) => self
                    .invoke_optional_hook(sparrow, r, |m| &mut m.get, receiver, &[key])?
                    .ok_or(SparrowError::NotCallable("udata with no get hook")),
                other => Err(SparrowError::NotCallable(other.type_name())),
            },
            _ => Err(SparrowError::NotCallable(receiver.type_name())),
        }
    }

    fn attr_get(&mut self, sparrow: &mut Sparrow, receiver: Value, name: GcRef) -> SparrowResult<Value> {
        self.index_get(sparrow, receiver, Value::heap(name))
    }

    fn index_set(&mut self, sparrow: &mut Sparrow, receiver: Value, key: Value, value: Value) -> SparrowResult<()> {
        match receiver.kind() {
            ValueKind::Heap(r) => match sparrow.heap().get(r) {
                HeapObject::List(_) => {
                    let index = coerce_number(sparrow.heap(), key)? as i64;
                    sparrow.heap_mut().as_list_mut(r)?.set(index, value)?;
                    Ok(())
                }
                HeapObject::Map(_) => {
                    if self.invoke_optional_hook(sparrow, r, |m| &mut m.set, receiver, &[key, value])?.is_some() {
                        return Ok(());
                    }
                    let key_ref = key.as_heap().ok_or(SparrowError::NotCallable("non-string map key"))?;
                    sparrow.heap_mut().map_insert(r, key_ref, value)?;
                    Ok(())
                }
                HeapObject::Udata(_) => {
                    self.invoke_optional_hook(sparrow, r, |m| &mut m.set, receiver, &[key, value])?
                        .ok_or(SparrowError::NotCallable("udata with no set hook"))?;
                    Ok(())
                }
                other => Err(SparrowError::NotCallable(other.type_name())),
            },
            _ => Err(SparrowError::NotCallable(receiver.type_name())),
        }
    }

    fn attr_set(&mut self, sparrow: &mut Sparrow, receiver: Value, name: GcRef, value: Value) -> SparrowResult<()> {
        self.index_set(sparrow, receiver, Value::heap(name), value)
    }

    /// Extracts a Map/Udata's hook at `pick`, invokes it (scripted callables
    /// recurse into `call_value`, native ones run directly), and restores
    /// the slot. `Ok(None)` means no hook was registered.
    fn invoke_optional_hook(
        &mut self,
        sparrow: &mut Sparrow,
        r: GcRef,
        pick: impl Fn(&mut MetaOps) -> &mut Option<Hook> + Copy,
        receiver: Value,
        args: &[Value],
    ) -> SparrowResult<Option<Value>> {
        let taken = take_hook(sparrow.heap_mut(), r, pick)?;
        match taken {
            None => Ok(None),
            Some(Hook::Script(callable)) => {
                put_hook(sparrow.heap_mut(), r, pick, Hook::Script(callable));
                let mut call_args = Vec::with_capacity(args.len() + 1);
                call_args.push(receiver);
                call_args.extend_from_slice(args);
                let ctx = self.current_ctx(sparrow)?;
                Ok(Some(self.invoke_value(sparrow, ctx, callable, &call_args)?))
            }
            Some(Hook::Native(mut f)) => {
                let result = f(sparrow.heap_mut(), receiver, args);
                put_hook(sparrow.heap_mut(), r, pick, Hook::Native(f));
                Ok(Some(result?))
            }
        }
    }

    /// The environment a reentrant call (hook invocation, `ScriptCaller`)
    /// should resolve globals against: the single Component environment
    /// active for this whole interpreter invocation chain. `sparrow-vm`
    /// does not yet support nested Components within one `call`, so this is
    /// always the top-level global environment; a future `import` surface
    /// that spins up independent Components would thread the active one
    /// through `Runtime` instead.
    fn current_ctx(&self, sparrow: &Sparrow) -> SparrowResult<ExecContext> {
        Ok(ExecContext { env: sparrow.global_env() })
    }

    // ---- upvalues (§4.F.8) ---------------------------------------------------

    fn read_upvalue(&mut self, sparrow: &mut Sparrow, closure_ref: GcRef, index: usize) -> SparrowResult<Value> {
        match sparrow.heap().as_closure(closure_ref)?.upvalues[index] {
            UpvalueCell::Owned(v) => Ok(v),
            UpvalueCell::Aliased { owner, index } => self.read_upvalue(sparrow, owner, index as usize),
        }
    }

    fn write_upvalue(&mut self, sparrow: &mut Sparrow, closure_ref: GcRef, index: usize, value: Value) -> SparrowResult<()> {
        let cell = sparrow.heap().as_closure(closure_ref)?.upvalues[index];
        match cell {
            UpvalueCell::Owned(_) => {
                sparrow.heap_mut().as_closure_mut(closure_ref)?.upvalues[index] = UpvalueCell::Owned(value);
                Ok(())
            }
            UpvalueCell::Aliased { owner, index } => self.write_upvalue(sparrow, owner, index as usize, value),
        }
    }

    /// Instantiates the Proto at `proto_index` in the enclosing closure's own
    /// Module as a Closure, resolving each upvalue descriptor against either
    /// the creating frame's stack (Embed) or the enclosing closure's own
    /// upvalue array (Detach) (§4.F.8).
    fn load_closure(
        &mut self,
        sparrow: &mut Sparrow,
        enclosing: GcRef,
        enclosing_proto: GcRef,
        base: usize,
        proto_index: usize,
    ) -> SparrowResult<Value> {
        let module = sparrow.heap().as_proto(enclosing_proto)?.module;
        let target_proto = sparrow.heap().as_module(module)?.protos[proto_index];
        let descs: Vec<UpvalueDesc> = sparrow.heap().as_proto(target_proto)?.upvalues.clone();
        let mut cells = Vec::with_capacity(descs.len());
        for desc in descs {
            let cell = match desc.state {
                UpvalueState::Embed => UpvalueCell::Owned(self.read_slot(sparrow, base, desc.index as usize)),
                UpvalueState::Detach => UpvalueCell::Aliased { owner: enclosing, index: desc.index },
            };
            cells.push(cell);
        }
        let closure_ref = sparrow.heap_mut().alloc_closure(sparrow_heap::ObjClosure { proto: target_proto, upvalues: cells });
        Ok(Value::heap(closure_ref))
    }

    // ---- globals / components (§4.F.9) ---------------------------------------

    /// Component environment first, then the process-wide global Map.
    fn global_get(&mut self, sparrow: &mut Sparrow, ctx: ExecContext, name: GcRef) -> SparrowResult<Value> {
        if let Some(v) = sparrow.heap().map_get(ctx.env, name)? {
            return Ok(v);
        }
        sparrow
            .get_global(name)
            .ok_or_else(|| SparrowError::UndefinedGlobal(sparrow.heap().as_string(name).map(|s| s.as_str().to_string()).unwrap_or_default()))
    }

    fn global_set(&mut self, sparrow: &mut Sparrow, ctx: ExecContext, name: GcRef, value: Value) {
        sparrow.heap_mut().map_insert(ctx.env, name, value).expect("component environment is always a live Map");
    }

    // ---- calls / returns (§4.F.6) ---------------------------------------------

    fn do_call(&mut self, sparrow: &mut Sparrow, ctx: ExecContext, narg: usize) -> SparrowResult<()> {
        let args = self.pop_n(sparrow, narg);
        let callee = self.pop(sparrow);
        let result = self.invoke_value(sparrow, ctx, callee, &args)?;
        self.push(sparrow, result);
        Ok(())
    }

    /// Truncates the thread's stack back to the returning frame's base
    /// pointer, pops the frame, and leaves the result value on the caller's
    /// stack top (§4.F.6). `run_until` is the one that notices the host
    /// sentinel and stops the loop.
    fn do_return(&mut self, sparrow: &mut Sparrow, value: Value) {
        let _ = sparrow;
        let thread = self.runtime.current_thread_mut();
        let base = thread.current_frame().base_ptr.max(0) as usize;
        thread.stack.truncate(base);
        thread.frames.pop();
        thread.stack.push(value);
    }

    // ---- iteration (§4.F.7) ---------------------------------------------------

    fn for_prep(&mut self, sparrow: &mut Sparrow, skip_target: usize) -> SparrowResult<()> {
        let container = self.pop(sparrow);
        let (iterator, is_empty) = build_iterator(sparrow, container)?;
        if is_empty {
            self.jump(sparrow, skip_target);
        } else {
            self.push(sparrow, iterator);
        }
        Ok(())
    }

    fn for_loop(&mut self, sparrow: &mut Sparrow, header_target: usize) -> SparrowResult<()> {
        let iter_value = *self.peek(sparrow);
        let iter_ref = iter_value.as_heap().expect("FORLOOP runs with an Iterator on the stack top");
        if advance_iterator(sparrow, iter_ref)? {
            self.jump(sparrow, header_target);
        } else {
            self.pop(sparrow);
        }
        Ok(())
    }

    fn iterator_key(&mut self, sparrow: &mut Sparrow, iter_ref: GcRef) -> SparrowResult<Value> {
        Ok(iterator_key_value(sparrow, iter_ref)?.0)
    }

    fn iterator_key_value(&mut self, sparrow: &mut Sparrow, iter_ref: GcRef) -> SparrowResult<(Value, Value)> {
        iterator_key_value(sparrow, iter_ref)
    }

    // ---- dedicated intrinsic fast paths (§4.I) ---------------------------------

    fn call_fast_intrinsic(&mut self, sparrow: &mut Sparrow, op: Opcode, narg: usize) -> SparrowResult<()> {
        use Opcode::*;
        let index = match op {
            ICallTypeOf => 0,
            ICallIsBoolean => 1,
            ICallIsString => 2,
            ICallIsNumber => 3,
            ICallIsNull => 4,
            ICallIsList => 5,
            ICallIsMap => 6,
            ICallIsClosure => 7,
            ICallToString => 8,
            ICallToNumber => 9,
            ICallToBoolean => 10,
            ICallPrint => 11,
            ICallError => 12,
            ICallAssert => 13,
            ICallImport => 14,
            ICallSize => 15,
            ICallRange => 16,
            ICallLoop => 17,
            ICallRunString => 18,
            ICallMin => 19,
            ICallMax => 20,
            ICallSort => 21,
            ICallSet => 22,
            ICallGet => 23,
            ICallExist => 24,
            ICallMSec => 25,
            _ => unreachable!("call_fast_intrinsic only receives ICall* opcodes"),
        };
        let args = self.pop_n(sparrow, narg);
        let result = intrinsics::call_intrinsic(index, sparrow, self, &args)?;
        self.push(sparrow, result);
        Ok(())
    }
}

impl ScriptCaller for Interpreter {
    fn call_value(&mut self, sparrow: &mut Sparrow, callee: Value, args: &[Value]) -> SparrowResult<Value> {
        let ctx = self.current_ctx(sparrow)?;
        self.invoke_value(sparrow, ctx, callee, args)
    }

    fn run_source(&mut self, _sparrow: &mut Sparrow, _source: &str) -> SparrowResult<Value> {
        Err(SparrowError::ImportFailed("<string>".to_string(), "no front end registered to compile source".to_string()))
    }

    fn import_module(&mut self, _sparrow: &mut Sparrow, path: &str) -> SparrowResult<Value> {
        Err(SparrowError::ImportFailed(path.to_string(), "no module loader registered".to_string()))
    }
}

// ---- free helper functions (no interpreter state needed) --------------------

fn take_hook(heap: &mut Heap, r: GcRef, pick: impl Fn(&mut MetaOps) -> &mut Option<Hook>) -> SparrowResult<Option<Hook>> {
    match metaops_mut(heap, r)? {
        Some(metaops) => Ok(pick(metaops).take()),
        None => Ok(None),
    }
}

fn put_hook(heap: &mut Heap, r: GcRef, pick: impl Fn(&mut MetaOps) -> &mut Option<Hook>, hook: Hook) {
    if let Ok(Some(metaops)) = metaops_mut(heap, r) {
        *pick(metaops) = Some(hook);
    }
}

fn metaops_mut(heap: &mut Heap, r: GcRef) -> SparrowResult<&mut Option<MetaOps>> {
    match heap.get_mut(r) {
        HeapObject::Map(m) => Ok(&mut m.metaops),
        HeapObject::Udata(u) => Ok(&mut u.metaops),
        other => Err(SparrowError::NotCallable(other.type_name())),
    }
}

fn bind_intrinsic_attribute(sparrow: &mut Sparrow, index: usize, receiver: Value) -> Value {
    let name = format!("<{}>", sparrow_heap::sparrow::INTRINSIC_ATTRIBUTES[index]);
    let func: sparrow_heap::NativeFn = std::rc::Rc::new(move |heap, args| intrinsics::call_intrinsic_attribute(index, heap, receiver, args));
    let method_ref = sparrow.heap_mut().alloc_method(sparrow_heap::ObjMethod { func, receiver, name });
    Value::heap(method_ref)
}

fn coerce_number(heap: &Heap, v: Value) -> SparrowResult<f64> {
    match v.kind() {
        ValueKind::Number(n) => Ok(n),
        ValueKind::Bool(b) => Ok(if b { 1.0 } else { 0.0 }),
        ValueKind::Heap(r) => Err(SparrowError::ScriptRaised(format!("expected a number, found {}", heap.type_name_of(r)))),
        ValueKind::Null => Err(SparrowError::ScriptRaised("expected a number, found null".to_string())),
    }
}

fn arith_add(heap: &mut Heap, lhs: Value, rhs: Value) -> SparrowResult<Value> {
    if let (ValueKind::Heap(a), ValueKind::Heap(b)) = (lhs.kind(), rhs.kind()) {
        if let (HeapObject::String(_), HeapObject::String(_)) = (heap.get(a), heap.get(b)) {
            let mut bytes = heap.string_bytes(a).to_vec();
            bytes.extend_from_slice(heap.string_bytes(b));
            return Ok(Value::heap(heap.intern_string(&bytes)));
        }
    }
    arith_numeric(heap, lhs, rhs, |a, b| a + b)
}

fn arith_numeric(heap: &Heap, lhs: Value, rhs: Value, f: impl Fn(f64, f64) -> f64) -> SparrowResult<Value> {
    Ok(Value::number(f(coerce_number(heap, lhs)?, coerce_number(heap, rhs)?)))
}

fn arith_mod(heap: &Heap, lhs: Value, rhs: Value) -> SparrowResult<Value> {
    let a = coerce_number(heap, lhs)?;
    let b = coerce_number(heap, rhs)?;
    if !(i32::MIN as f64..=i32::MAX as f64).contains(&a) || !(i32::MIN as f64..=i32::MAX as f64).contains(&b) {
        return Err(SparrowError::ScriptRaised("modulo operands must fit in a 32-bit integer".to_string()));
    }
    let (ai, bi) = (a as i32, b as i32);
    if bi == 0 {
        return Err(SparrowError::ScriptRaised("modulo by zero".to_string()));
    }
    Ok(Value::number((ai % bi) as f64))
}

fn values_equal(heap: &Heap, a: Value, b: Value) -> bool {
    if a.raw_bits() == b.raw_bits() {
        return true;
    }
    match (a.kind(), b.kind()) {
        (ValueKind::Number(x), ValueKind::Number(y)) => x == y,
        (ValueKind::Heap(ra), ValueKind::Heap(rb)) => match (heap.get(ra), heap.get(rb)) {
            (HeapObject::String(_), HeapObject::String(_)) => heap.string_bytes(ra) == heap.string_bytes(rb),
            _ => false,
        },
        _ => false,
    }
}

fn compare_values(heap: &Heap, a: Value, b: Value) -> SparrowResult<std::cmp::Ordering> {
    if let (ValueKind::Heap(ra), ValueKind::Heap(rb)) = (a.kind(), b.kind()) {
        if let (HeapObject::String(_), HeapObject::String(_)) = (heap.get(ra), heap.get(rb)) {
            return Ok(heap.string_bytes(ra).cmp(heap.string_bytes(rb)));
        }
    }
    let (x, y) = (coerce_number(heap, a)?, coerce_number(heap, b)?);
    x.partial_cmp(&y).ok_or_else(|| SparrowError::ScriptRaised("cannot compare NaN".to_string()))
}

/// Builds an Iterator for `container` (§4.F.7), reporting whether it is
/// already empty (in which case `FORPREP` should skip the loop body).
fn build_iterator(sparrow: &mut Sparrow, container: Value) -> SparrowResult<(Value, bool)> {
    let r = container.as_heap().ok_or(SparrowError::NotCallable(container.type_name()))?;
    let (iter, empty) = match sparrow.heap().get(r) {
        HeapObject::List(list) => (ObjIterator::List { target: r, index: 0 }, list.is_empty()),
        HeapObject::String(s) => (ObjIterator::String { target: r, index: 0 }, s.is_empty()),
        HeapObject::Map(map) => (ObjIterator::Map { target: r, slot: 0 }, map.is_empty()),
        HeapObject::Loop(l) => {
            let empty = if l.step > 0 { l.start >= l.end } else { l.start <= l.end };
            let loop_iter = sparrow.heap_mut().alloc_loop_iterator(ObjLoopIterator { loop_ref: r, index: l.start });
            return Ok((Value::heap(loop_iter), empty));
        }
        HeapObject::Udata(_) => {
            return Err(SparrowError::ScriptRaised("udata iteration must be driven through its iter hook".to_string()));
        }
        other => return Err(SparrowError::NotCallable(other.type_name())),
    };
    let iter_ref = sparrow.heap_mut().alloc_iterator(iter);
    Ok((Value::heap(iter_ref), empty))
}

/// Advances `iter_ref` in place, returning whether it still has more
/// elements after advancing. `LoopIterator` is a distinct heap subtype from
/// `Iterator`, so it is handled first via a direct `HeapObject` match
/// rather than through `as_iterator`.
fn advance_iterator(sparrow: &mut Sparrow, iter_ref: GcRef) -> SparrowResult<bool> {
    if let HeapObject::LoopIterator(loop_it) = sparrow.heap().get(iter_ref) {
        let loop_it = *loop_it;
        let l = sparrow.heap().as_loop(loop_it.loop_ref)?;
        let next = loop_it.index + l.step;
        let has_more = if l.step > 0 { next < l.end } else { next > l.end };
        if let HeapObject::LoopIterator(cell) = sparrow.heap_mut().get_mut(iter_ref) {
            cell.index = next;
        }
        return Ok(has_more);
    }
    match sparrow.heap().as_iterator(iter_ref)?.clone() {
        ObjIterator::List { target, index } => {
            let next_index = index + 1;
            let len = sparrow.heap().as_list(target)?.len();
            if let ObjIterator::List { index, .. } = sparrow.heap_mut().as_iterator_mut(iter_ref)? {
                *index = next_index;
            }
            Ok(next_index < len)
        }
        ObjIterator::String { target, index } => {
            let next_index = index + 1;
            let len = sparrow.heap().string_bytes(target).len();
            if let ObjIterator::String { index, .. } = sparrow.heap_mut().as_iterator_mut(iter_ref)? {
                *index = next_index;
            }
            Ok(next_index < len)
        }
        ObjIterator::Map { target, slot } => {
            let map = sparrow.heap().as_map(target)?;
            let mut next_slot = slot + 1;
            while next_slot < map.slot_count() && map.entry_at_slot(next_slot).is_none() {
                next_slot += 1;
            }
            let has_more = next_slot < map.slot_count();
            if let ObjIterator::Map { slot, .. } = sparrow.heap_mut().as_iterator_mut(iter_ref)? {
                *slot = next_slot;
            }
            Ok(has_more)
        }
        ObjIterator::Loop { .. } => unreachable!("loop iteration always goes through the dedicated LoopIterator subtype"),
        ObjIterator::Udata { .. } => Err(SparrowError::ScriptRaised("udata iteration requires a driving iter hook, not FORLOOP".to_string())),
    }
}

fn iterator_key_value(sparrow: &mut Sparrow, iter_ref: GcRef) -> SparrowResult<(Value, Value)> {
    if let HeapObject::LoopIterator(loop_it) = sparrow.heap().get(iter_ref) {
        let n = Value::number(loop_it.index as f64);
        return Ok((n, n));
    }
    match sparrow.heap().as_iterator(iter_ref)?.clone() {
        ObjIterator::List { target, index } => {
            let v = sparrow.heap().as_list(target)?.get(index as i64)?;
            Ok((Value::number(index as f64), v))
        }
        ObjIterator::String { target, index } => {
            let byte = sparrow.heap().string_bytes(target)[index];
            let s = Value::heap(sparrow.heap_mut().intern_string(&[byte]));
            Ok((Value::number(index as f64), s))
        }
        ObjIterator::Map { target, slot } => {
            let (key_ref, value) = sparrow
                .heap()
                .as_map(target)?
                .entry_at_slot(slot)
                .ok_or(SparrowError::MalformedBytecode { pc: 0, reason: "iterator slot held no live entry".into() })?;
            Ok((Value::heap(key_ref), value))
        }
        ObjIterator::Udata { .. } => Err(SparrowError::ScriptRaised("udata iterators are not indexable here".to_string())),
        ObjIterator::Loop { .. } => unreachable!("Loop variant is superseded by LoopIterator"),
    }
}
