//! Component H: lifts one Proto's bytecode into a [`sparrow_ir::Graph`]
//! (§4.H). Walks the instruction stream linearly, keeping a symbolic
//! [`Frame`] that mirrors the interpreter's own stack addressing; `Brt`/`Brf`
//! and `ForPrep` fork it into sub-builders and reconcile the result with
//! Phis at the reconvergence point, exactly the shape `bc-ir-builder.c`'s
//! `build_branch`/loop pass describe, minus that design's sparse
//! per-region "stack tree" — one live arm at a time is enough here since
//! every fork is resolved (recursively) before its caller resumes.

use sparrow_bc::Opcode;
use sparrow_heap::{GcRef, Heap, ObjProto, UpvalueState};
use sparrow_ir::{Graph, NodeId, NodeKind};
use sparrow_util::Idx;

use crate::error::{BuildError, BuildResult};
use crate::frame::Frame;

/// How a straight-line run of instructions ended.
#[derive(Debug)]
enum Terminator {
    /// Ran off the end of the Proto's code without an explicit `Ret` — only
    /// valid at the outermost call.
    EndOfRange,
    /// An unconditional `Jump`/`Loop`, or a bounded walk reaching its
    /// `stop_at` pc.
    Goto(usize),
    /// A `ForLoop`, reporting its header target for the caller (`build_loop`)
    /// to match against the `ForPrep` it paired with.
    LoopBack(usize),
    Return,
}

enum BranchOutcome {
    Merged(usize),
    BothReturn,
}

pub fn build_graph(heap: &Heap, proto_ref: GcRef) -> BuildResult<Graph> {
    let proto = heap.as_proto(proto_ref)?;
    let mut builder = FnBuilder { heap, proto, graph: Graph::new() };
    let start = builder.graph.start;
    let entry = builder.graph.new_linked(NodeKind::Region, &[start]);
    let mut frame = Frame::new(entry);
    for i in 0..proto.narg {
        let node = builder.graph.new_node(NodeKind::Argument(i));
        frame.write(i as usize, node);
    }
    match builder.build_block(&mut frame, 0, None)? {
        Terminator::Return | Terminator::EndOfRange => {}
        Terminator::Goto(pc) => {
            return Err(BuildError::Malformed { pc, reason: "fell through to an unbound jump target at the end of a Proto".into() })
        }
        Terminator::LoopBack(pc) => {
            return Err(BuildError::Malformed { pc, reason: "ForLoop reached outside its own ForPrep region".into() })
        }
    }
    Ok(builder.graph)
}

struct FnBuilder<'h> {
    heap: &'h Heap,
    proto: &'h ObjProto,
    graph: Graph,
}

impl<'h> FnBuilder<'h> {
    fn string_const(&mut self, index: u32) -> NodeId {
        let gcref = self.proto.strings[index as usize];
        let text = self.heap.as_string(gcref).map(|s| s.as_str().to_string()).unwrap_or_default();
        self.graph.const_string(text)
    }

    fn string_owned(&self, index: u32) -> String {
        let gcref = self.proto.strings[index as usize];
        self.heap.as_string(gcref).map(|s| s.as_str().to_string()).unwrap_or_default()
    }

    // ---- the main walk --------------------------------------------------

    fn build_block(&mut self, frame: &mut Frame, start_pc: usize, stop_at: Option<usize>) -> BuildResult<Terminator> {
        let mut pc = start_pc;
        loop {
            if let Some(stop) = stop_at {
                if pc == stop {
                    return Ok(Terminator::Goto(stop));
                }
            }
            if pc >= self.proto.code.len() {
                return Ok(Terminator::EndOfRange);
            }
            let op = self
                .proto
                .code
                .opcode_at(pc)
                .ok_or_else(|| BuildError::Malformed { pc, reason: "pc past end of code".into() })?;
            let arg = if op.has_operand() { self.proto.code.decode_arg(pc) } else { 0 };
            let width = self.proto.code.instruction_width(pc);

            use Opcode::*;
            match op {
                Brt | Brf => match self.build_branch(frame, op, pc + width, arg as usize)? {
                    BranchOutcome::Merged(merge_pc) => {
                        pc = merge_pc;
                        continue;
                    }
                    BranchOutcome::BothReturn => return Ok(Terminator::Return),
                },
                ForPrep => {
                    let container = frame.pop();
                    let after_pc = arg as usize;
                    self.build_loop(frame, container, pc + width, after_pc)?;
                    pc = after_pc;
                    continue;
                }
                ForLoop => return Ok(Terminator::LoopBack(arg as usize)),
                Jump | Loop => return Ok(Terminator::Goto(arg as usize)),
                Ret | RetNull | RetN0 | RetN1 | RetNN1 | RetN | RetS | RetT | RetF => {
                    self.build_return(frame, op, arg)?;
                    return Ok(Terminator::Return);
                }
                If | EndIf | Brk | Cont | Nop => {}
                _ => self.build_linear(frame, op, arg)?,
            }
            pc += width;
        }
    }

    /// Builds both arms of a `Brt`/`Brf`, reconciling at their common
    /// reconvergence point (§4.H.2 full if/else and the no-else/short-circuit
    /// degenerate case §4.H.4 share this same shape).
    fn build_branch(&mut self, frame: &mut Frame, op: Opcode, fallthrough_pc: usize, target: usize) -> BuildResult<BranchOutcome> {
        let cond = frame.pop();
        let if_node = self.graph.new_linked(NodeKind::If, &[cond, frame.region]);
        let taken = self.graph.new_linked(NodeKind::IfTrue, &[if_node]);
        let not_taken = self.graph.new_linked(NodeKind::IfFalse, &[if_node]);
        let (jump_region, fall_region) = match op {
            Opcode::Brt => (taken, not_taken),
            Opcode::Brf => (not_taken, taken),
            _ => unreachable!("build_branch only receives Brt/Brf"),
        };

        let mut fall_frame = frame.with_region(fall_region);
        let fall_term = self.build_block(&mut fall_frame, fallthrough_pc, Some(target))?;

        match fall_term {
            Terminator::Goto(stop) if stop == target => {
                // No body on the jump side — it just carries the pre-branch
                // frame through unchanged.
                let jump_frame = frame.with_region(jump_region);
                Ok(self.join(frame, fall_frame, jump_frame, target))
            }
            Terminator::Goto(merge_pc) => {
                let mut jump_frame = frame.with_region(jump_region);
                let jump_term = self.build_block(&mut jump_frame, target, Some(merge_pc))?;
                match jump_term {
                    Terminator::Goto(stop) if stop == merge_pc => Ok(self.join(frame, fall_frame, jump_frame, merge_pc)),
                    Terminator::Return | Terminator::EndOfRange => {
                        *frame = fall_frame;
                        Ok(BranchOutcome::Merged(merge_pc))
                    }
                    other => Err(BuildError::UnsupportedControlFlow {
                        pc: target,
                        reason: format!("else arm did not reach the if's merge point ({other:?})"),
                    }),
                }
            }
            Terminator::Return | Terminator::EndOfRange => {
                let mut jump_frame = frame.with_region(jump_region);
                let jump_term = self.build_block(&mut jump_frame, target, None)?;
                match jump_term {
                    Terminator::Goto(merge_pc) => {
                        *frame = jump_frame;
                        Ok(BranchOutcome::Merged(merge_pc))
                    }
                    Terminator::Return | Terminator::EndOfRange => Ok(BranchOutcome::BothReturn),
                    Terminator::LoopBack(pc) => {
                        Err(BuildError::Malformed { pc, reason: "ForLoop reached outside its own ForPrep region".into() })
                    }
                }
            }
            Terminator::LoopBack(pc) => Err(BuildError::Malformed { pc, reason: "ForLoop reached outside its own ForPrep region".into() }),
        }
    }

    /// Creates the Merge and per-slot Phis joining two arms, and installs
    /// the joined frame as the caller's current frame.
    fn join(&mut self, frame: &mut Frame, true_frame: Frame, false_frame: Frame, merge_pc: usize) -> BranchOutcome {
        let merge = self.graph.new_node(NodeKind::Merge);
        self.graph.link(merge, true_frame.region);
        self.graph.link(merge, false_frame.region);

        let len = true_frame.len().max(false_frame.len());
        let mut merged = Frame::new(merge);
        for i in 0..len {
            let a = true_frame.read(i);
            let b = false_frame.read(i);
            let value = match (a, b) {
                (Some(x), Some(y)) if x == y => x,
                (Some(x), Some(y)) => {
                    let phi = self.graph.new_node(NodeKind::Phi);
                    self.graph.link(phi, x);
                    self.graph.link(phi, y);
                    self.graph.bind_unconditional(phi, merge);
                    phi
                }
                (Some(x), None) | (None, Some(x)) => x,
                (None, None) => continue,
            };
            merged.write(i, value);
        }
        *frame = merged;
        BranchOutcome::Merged(merge_pc)
    }

    /// `ForPrep`/loop-body/`ForLoop` (§4.H.3): the pre-test If splits
    /// "skip entirely" from "enter the body"; the Loop region hosts the
    /// body and, once its loop-carried values are known, their Phis; a
    /// second If at the Loop-exit decides the back-edge; a final Merge
    /// joins "never entered" with "exited normally".
    fn build_loop(&mut self, frame: &mut Frame, container: NodeId, body_start_pc: usize, after_loop_pc: usize) -> BuildResult<()> {
        let _ = after_loop_pc;
        let iter_new = self.graph.new_linked(NodeKind::IterNew, &[container]);
        self.graph.bind(iter_new, frame.region);
        let pre_test = self.graph.new_linked(NodeKind::IterTest, &[iter_new]);
        let pre_if = self.graph.new_linked(NodeKind::If, &[pre_test, frame.region]);
        let pre_true = self.graph.new_linked(NodeKind::IfTrue, &[pre_if]);
        let pre_false = self.graph.new_linked(NodeKind::IfFalse, &[pre_if]);

        let loop_region = self.graph.new_node(NodeKind::Loop);
        self.graph.link(loop_region, pre_true);

        let entry_slots: Vec<NodeId> = frame.as_slice().to_vec();
        let mut body_frame = Frame::new(loop_region);
        for (i, &v) in entry_slots.iter().enumerate() {
            body_frame.write(i, v);
        }
        body_frame.push(iter_new);

        let before = self.graph.len();
        let term = self.build_block(&mut body_frame, body_start_pc, None)?;
        match term {
            Terminator::LoopBack(header) if header == body_start_pc => {}
            Terminator::LoopBack(header) => {
                return Err(BuildError::Malformed { pc: header, reason: "ForLoop target did not match its ForPrep's body start".into() })
            }
            other => {
                return Err(BuildError::UnsupportedControlFlow {
                    pc: body_start_pc,
                    reason: format!("loop body did not end in ForLoop ({other:?})"),
                })
            }
        }

        // Loop-carried values: for every slot whose node changed during the
        // body, allocate Phi(entry, body-tail) at the header and rewrite
        // every in-body use of the old (pre-loop) node to the Phi.
        let mut carried = Vec::new();
        for (i, &old) in entry_slots.iter().enumerate() {
            let new = body_frame.read(i).unwrap_or(old);
            if old != new {
                carried.push((i, old, new));
            }
        }
        let mut phis_created = Vec::new();
        for (i, old, new) in carried {
            let phi = self.graph.new_node(NodeKind::Phi);
            self.graph.link(phi, old);
            self.graph.link(phi, new);
            self.graph.bind_unconditional(phi, loop_region);
            for id in self.graph.ids().collect::<Vec<_>>() {
                if id.index() >= before && id != phi && !phis_created.contains(&id) {
                    self.graph.rewrite_input(id, old, phi);
                }
            }
            phis_created.push(phi);
            body_frame.write(i, phi);
        }

        let iter_final = body_frame.peek();
        let post_test = self.graph.new_linked(NodeKind::IterTest, &[iter_final]);
        let loop_exit = self.graph.new_node(NodeKind::LoopExit);
        self.graph.link(loop_exit, loop_region);
        let post_if = self.graph.new_linked(NodeKind::If, &[post_test, loop_exit]);
        let post_true = self.graph.new_linked(NodeKind::IfTrue, &[post_if]);
        let post_false = self.graph.new_linked(NodeKind::IfFalse, &[post_if]);
        self.graph.link(loop_region, post_true);

        let final_merge = self.graph.new_node(NodeKind::Merge);
        self.graph.link(final_merge, pre_false);
        self.graph.link(final_merge, post_false);
        let mut merged = Frame::new(final_merge);
        for (i, &never_entered) in entry_slots.iter().enumerate() {
            let exited = body_frame.read(i).unwrap_or(never_entered);
            let value = if never_entered == exited {
                never_entered
            } else {
                let phi = self.graph.new_node(NodeKind::Phi);
                self.graph.link(phi, never_entered);
                self.graph.link(phi, exited);
                self.graph.bind_unconditional(phi, final_merge);
                phi
            };
            merged.write(i, value);
        }
        *frame = merged;
        Ok(())
    }

    fn build_return(&mut self, frame: &mut Frame, op: Opcode, arg: u32) -> BuildResult<()> {
        use Opcode::*;
        let value = match op {
            Ret => frame.pop(),
            RetNull => self.graph.const_null(),
            RetN0 => self.graph.const_int32(0),
            RetN1 => self.graph.const_int32(1),
            RetNN1 => self.graph.const_int32(-1),
            RetN => self.graph.const_int32(arg as i32),
            RetS => self.string_const(arg),
            RetT => self.graph.const_bool(true),
            RetF => self.graph.const_bool(false),
            _ => unreachable!("build_return only receives Ret* opcodes"),
        };
        let ret = self.graph.new_linked(NodeKind::Ret, &[value]);
        self.graph.bind_unconditional(ret, frame.region);
        self.graph.link(self.graph.end, ret);
        Ok(())
    }

    /// Every opcode that neither branches nor returns (§4.H.1, §4.H.5).
    fn build_linear(&mut self, frame: &mut Frame, op: Opcode, arg: u32) -> BuildResult<()> {
        use Opcode::*;
        match op {
            LoadTrue => frame.push(self.graph.const_bool(true)),
            LoadFalse => frame.push(self.graph.const_bool(false)),
            LoadNull => frame.push(self.graph.const_null()),
            LoadNN5 | LoadNN4 | LoadNN3 | LoadNN2 | LoadNN1 | LoadN0 | LoadN1 | LoadN2 | LoadN3 | LoadN4 | LoadN5 => {
                let n = sparrow_bc::small_int_for_opcode(op).expect("micro-immediate load");
                frame.push(self.graph.const_int32(n as i32));
            }
            LoadNumber => {
                let n = self.proto.numbers[arg as usize];
                frame.push(self.graph.const_real64(n));
            }
            LoadString => frame.push(self.string_const(arg)),
            LoadV => {
                let v = frame.read(arg as usize).unwrap_or_else(|| self.graph.const_null());
                frame.push(v);
            }

            MoveV => {
                let v = frame.pop();
                frame.write(arg as usize, v);
            }
            MoveTrue => {
                let v = self.graph.const_bool(true);
                frame.write(arg as usize, v);
            }
            MoveFalse => {
                let v = self.graph.const_bool(false);
                frame.write(arg as usize, v);
            }
            MoveNull => {
                let v = self.graph.const_null();
                frame.write(arg as usize, v);
            }
            MoveNN5 | MoveNN4 | MoveNN3 | MoveNN2 | MoveNN1 | MoveN0 | MoveN1 | MoveN2 | MoveN3 | MoveN4 | MoveN5 => {
                let n = sparrow_bc::small_int_for_opcode(op).expect("micro-immediate move");
                let v = self.graph.const_int32(n as i32);
                frame.write(arg as usize, v);
            }

            Pop => {
                frame.pop();
            }

            AddVV | AddNV | AddVN | AddSV | AddVS => self.binary(frame, op, arg, NodeKind::Add),
            SubVV | SubNV | SubVN => self.binary(frame, op, arg, NodeKind::Sub),
            MulVV | MulNV | MulVN => self.binary(frame, op, arg, NodeKind::Mul),
            DivVV | DivNV | DivVN => self.binary(frame, op, arg, NodeKind::Div),
            PowVV | PowNV | PowVN => self.binary(frame, op, arg, NodeKind::Pow),
            ModVV | ModNV | ModVN => self.binary(frame, op, arg, NodeKind::Mod),
            Neg => {
                let v = frame.pop();
                frame.push(self.graph.new_linked(NodeKind::Neg, &[v]));
            }
            Not => {
                let v = frame.pop();
                frame.push(self.graph.new_linked(NodeKind::Not, &[v]));
            }
            Test => {
                let v = frame.peek();
                frame.push(self.graph.new_linked(NodeKind::Test, &[v]));
            }

            LtVV | LtNV | LtVN | LtSV | LtVS => self.binary(frame, op, arg, NodeKind::Lt),
            LeVV | LeNV | LeVN | LeSV | LeVS => self.binary(frame, op, arg, NodeKind::Le),
            GtVV | GtNV | GtVN | GtSV | GtVS => self.binary(frame, op, arg, NodeKind::Gt),
            GeVV | GeNV | GeVN | GeSV | GeVS => self.binary(frame, op, arg, NodeKind::Ge),
            EqVV | EqNV | EqVN | EqSV | EqVS => self.binary(frame, op, arg, NodeKind::Eq),
            NeVV | NeNV | NeVN | NeSV | NeVS => self.binary(frame, op, arg, NodeKind::Ne),
            EqVNull | EqNullV => {
                let v = frame.pop();
                let null = self.graph.const_null();
                frame.push(self.graph.new_linked(NodeKind::Eq, &[v, null]));
            }
            NeVNull | NeNullV => {
                let v = frame.pop();
                let null = self.graph.const_null();
                frame.push(self.graph.new_linked(NodeKind::Ne, &[v, null]));
            }

            AGetN => {
                let receiver = frame.pop();
                let node = self.graph.new_linked(NodeKind::AGet { key: sparrow_ir::AttrKey::Numeric(arg) }, &[receiver]);
                self.graph.bind(node, frame.region);
                frame.push(node);
            }
            AGetS => {
                let name = self.string_owned(arg);
                let receiver = frame.pop();
                let node = self.graph.new_linked(NodeKind::AGet { key: sparrow_ir::AttrKey::Named(name) }, &[receiver]);
                self.graph.bind(node, frame.region);
                frame.push(node);
            }
            AGetI => {
                let receiver = frame.pop();
                let node = self.graph.new_linked(NodeKind::AGet { key: sparrow_ir::AttrKey::Intrinsic(arg) }, &[receiver]);
                self.graph.bind(node, frame.region);
                frame.push(node);
            }
            AGet => {
                let key = frame.pop();
                let receiver = frame.pop();
                let node = self.graph.new_linked(NodeKind::AGet { key: sparrow_ir::AttrKey::Dynamic }, &[receiver, key]);
                self.graph.bind(node, frame.region);
                frame.push(node);
            }
            ASetN => {
                let value = frame.pop();
                let receiver = frame.pop();
                let node = self.graph.new_linked(NodeKind::ASet { key: sparrow_ir::AttrKey::Numeric(arg) }, &[receiver, value]);
                self.graph.bind(node, frame.region);
            }
            ASetS => {
                let name = self.string_owned(arg);
                let value = frame.pop();
                let receiver = frame.pop();
                let node = self.graph.new_linked(NodeKind::ASet { key: sparrow_ir::AttrKey::Named(name) }, &[receiver, value]);
                self.graph.bind(node, frame.region);
            }
            ASet => {
                let value = frame.pop();
                let key = frame.pop();
                let receiver = frame.pop();
                let node = self.graph.new_linked(NodeKind::ASet { key: sparrow_ir::AttrKey::Dynamic }, &[receiver, key, value]);
                self.graph.bind(node, frame.region);
            }
            ASetI => {
                let value = frame.pop();
                let receiver = frame.pop();
                let node = self.graph.new_linked(NodeKind::ASet { key: sparrow_ir::AttrKey::Intrinsic(arg) }, &[receiver, value]);
                self.graph.bind(node, frame.region);
            }

            UGet => frame.push(self.graph.new_node(NodeKind::UGet { index: arg })),
            USet => {
                let v = frame.pop();
                let node = self.graph.new_linked(NodeKind::USet { index: arg }, &[v]);
                self.graph.bind(node, frame.region);
            }
            USetTrue | USetFalse | USetNull => {
                let v = match op {
                    USetTrue => self.graph.const_bool(true),
                    USetFalse => self.graph.const_bool(false),
                    _ => self.graph.const_null(),
                };
                let node = self.graph.new_linked(NodeKind::USet { index: arg }, &[v]);
                self.graph.bind(node, frame.region);
            }

            GGet => {
                let name = self.string_owned(arg);
                let node = self.graph.new_node(NodeKind::GGet { name });
                self.graph.bind(node, frame.region);
                frame.push(node);
            }
            GSet | GSetTrue | GSetFalse | GSetNull => {
                let name = self.string_owned(arg);
                let v = match op {
                    GSet => frame.pop(),
                    GSetTrue => self.graph.const_bool(true),
                    GSetFalse => self.graph.const_bool(false),
                    _ => self.graph.const_null(),
                };
                let node = self.graph.new_linked(NodeKind::GSet { name }, &[v]);
                self.graph.bind(node, frame.region);
            }

            IdRefK => {
                let iter = frame.peek();
                let key = self.graph.new_linked(NodeKind::IterKey, &[iter]);
                frame.write(arg as usize, key);
            }
            IdRefKV => {
                let iter = frame.peek();
                let kv = self.graph.new_linked(NodeKind::IterKeyValue, &[iter]);
                let key = self.graph.new_linked(NodeKind::Projection { index: 0 }, &[kv]);
                let value = self.graph.new_linked(NodeKind::Projection { index: 1 }, &[kv]);
                frame.write(arg as usize, key);
                frame.write(arg as usize + 1, value);
            }

            Call0 | Call1 | Call2 | Call3 | Call4 | Call => {
                let narg = match op {
                    Call0 => 0,
                    Call1 => 1,
                    Call2 => 2,
                    Call3 => 3,
                    Call4 => 4,
                    _ => arg as usize,
                };
                let args = frame.pop_n(narg);
                let callee = frame.pop();
                let node = self.graph.new_node(NodeKind::Call);
                self.graph.link(node, callee);
                for a in args {
                    self.graph.link(node, a);
                }
                self.graph.bind(node, frame.region);
                frame.push(node);
            }

            NewL0 | NewL1 | NewL2 | NewL3 | NewL4 | NewL => {
                let n = match op {
                    NewL0 => 0,
                    NewL1 => 1,
                    NewL2 => 2,
                    NewL3 => 3,
                    NewL4 => 4,
                    _ => arg as usize,
                };
                let elements = frame.pop_n(n);
                let node = self.graph.new_node(NodeKind::PrimitiveList);
                for e in elements {
                    self.graph.link(node, e);
                }
                self.graph.bind(node, frame.region);
                frame.push(node);
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
                let flat = frame.pop_n(pairs * 2);
                let node = self.graph.new_node(NodeKind::PrimitiveMap);
                for chunk in flat.chunks_exact(2) {
                    let pair = self.graph.new_linked(NodeKind::Pair, &[chunk[0], chunk[1]]);
                    self.graph.link(node, pair);
                }
                self.graph.bind(node, frame.region);
                frame.push(node);
            }

            LoadCls => {
                let node = self.build_closure(frame, arg as usize)?;
                frame.push(node);
            }

            ICallTypeOf | ICallIsBoolean | ICallIsString | ICallIsNumber | ICallIsNull | ICallIsList | ICallIsMap
            | ICallIsClosure | ICallToString | ICallToNumber | ICallToBoolean | ICallPrint | ICallError
            | ICallAssert | ICallImport | ICallSize | ICallRange | ICallLoop | ICallRunString | ICallMin
            | ICallMax | ICallSort | ICallSet | ICallGet | ICallExist | ICallMSec => {
                let index = intrinsic_index(op);
                let args = frame.pop_n(arg as usize);
                let node = self.graph.new_node(NodeKind::CallIntrinsic { index });
                for a in args {
                    self.graph.link(node, a);
                }
                self.graph.bind(node, frame.region);
                frame.push(node);
            }

            other => {
                return Err(BuildError::Malformed { pc: 0, reason: format!("opcode {} not reachable from build_linear", other.name()) })
            }
        }
        Ok(())
    }

    fn binary(&mut self, frame: &mut Frame, op: Opcode, arg: u32, kind: NodeKind) {
        use Opcode::*;
        let is_n_left = matches!(op, AddNV | SubNV | MulNV | DivNV | PowNV | ModNV | LtNV | LeNV | GtNV | GeNV | EqNV | NeNV);
        let is_n_right = matches!(op, AddVN | SubVN | MulVN | DivVN | PowVN | ModVN | LtVN | LeVN | GtVN | GeVN | EqVN | NeVN);
        let is_s_left = matches!(op, AddSV | LtSV | LeSV | GtSV | GeSV | EqSV | NeSV);
        let is_s_right = matches!(op, AddVS | LtVS | LeVS | GtVS | GeVS | EqVS | NeVS);
        let (lhs, rhs) = if is_n_left {
            let n = self.proto.numbers[arg as usize];
            let lhs = self.graph.const_real64(n);
            let rhs = frame.pop();
            (lhs, rhs)
        } else if is_n_right {
            let n = self.proto.numbers[arg as usize];
            let rhs = self.graph.const_real64(n);
            let lhs = frame.pop();
            (lhs, rhs)
        } else if is_s_left {
            let lhs = self.string_const(arg);
            let rhs = frame.pop();
            (lhs, rhs)
        } else if is_s_right {
            let rhs = self.string_const(arg);
            let lhs = frame.pop();
            (lhs, rhs)
        } else {
            let rhs = frame.pop();
            let lhs = frame.pop();
            (lhs, rhs)
        };
        let node = self.graph.new_linked(kind, &[lhs, rhs]);
        frame.push(node);
    }

    /// `LoadCls` (§4.F.8, §4.H.5): instantiates the target Proto's upvalue
    /// descriptors as a `Closure` primitive's operands — `Embed` captures a
    /// live stack-slot node directly, `Detach` captures this function's own
    /// upvalue by index.
    fn build_closure(&mut self, frame: &Frame, proto_index: usize) -> BuildResult<NodeId> {
        let module = self.proto.module;
        let target_proto = self.heap.as_module(module)?.protos[proto_index];
        let descs = self.heap.as_proto(target_proto)?.upvalues.clone();
        let mut captures = Vec::with_capacity(descs.len());
        for desc in descs {
            let node = match desc.state {
                UpvalueState::Embed => frame.read(desc.index as usize).unwrap_or_else(|| self.graph.const_null()),
                UpvalueState::Detach => self.graph.new_node(NodeKind::UpvalueDetach { index: desc.index }),
            };
            captures.push(node);
        }
        let closure = self.graph.new_node(NodeKind::Closure { proto_index: proto_index as u32 });
        for c in captures {
            self.graph.link(closure, c);
        }
        Ok(closure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sparrow_bc::CodeBuffer;
    use sparrow_heap::{GcConfig, ObjModule};
    use sparrow_ir::NodeKind;

    fn proto_heap(code: CodeBuffer, narg: u32, numbers: Vec<f64>) -> (Heap, GcRef) {
        let mut heap = Heap::new(GcConfig::default());
        let module = heap.alloc_module(ObjModule { protos: Vec::new(), source_path: "test".into(), prev: None, next: None });
        let proto =
            ObjProto { code, numbers, strings: Vec::new(), upvalues: Vec::new(), narg, name: "test".into(), proto_index: 0, module };
        let proto_ref = heap.alloc_proto(proto);
        (heap, proto_ref)
    }

    #[test]
    fn straight_line_arithmetic_builds_one_add() {
        let mut code = CodeBuffer::new();
        code.emit_a(Opcode::LoadNumber, 0, 1, 0).unwrap();
        code.emit_op(Opcode::LoadN1, 1, 0);
        code.emit_op(Opcode::AddVV, 1, 0);
        code.emit_op(Opcode::Ret, 1, 0);
        let (heap, proto_ref) = proto_heap(code, 0, vec![2.0]);
        let graph = build_graph(&heap, proto_ref).unwrap();
        let reachable = graph.ids().map(|id| graph.node(id).kind.clone()).collect::<Vec<_>>();
        assert!(reachable.iter().any(|k| matches!(k, NodeKind::Add)));
        assert!(reachable.iter().any(|k| matches!(k, NodeKind::Ret)));
    }

    #[test]
    fn if_else_merges_with_a_phi() {
        // if (arg0) { n1 } else { n2 }; return n
        let mut code = CodeBuffer::new();
        code.emit_a(Opcode::LoadV, 0, 1, 0).unwrap(); // load arg0
        let brf = code.reserve_a(Opcode::Brf, 1, 0).unwrap();
        code.emit_op(Opcode::LoadN1, 2, 0);
        let jump = code.reserve_a(Opcode::Jump, 2, 0).unwrap();
        let else_start = code.len() as u32;
        code.patch_a(brf, else_start).unwrap();
        code.emit_op(Opcode::LoadN2, 3, 0);
        let merge = code.len() as u32;
        code.patch_a(jump, merge).unwrap();
        code.emit_op(Opcode::Ret, 4, 0);

        let (heap, proto_ref) = proto_heap(code, 1, Vec::new());
        let graph = build_graph(&heap, proto_ref).unwrap();
        let kinds = graph.ids().map(|id| graph.node(id).kind.clone()).collect::<Vec<_>>();
        assert!(kinds.iter().any(|k| matches!(k, NodeKind::Phi)));
        assert!(kinds.iter().any(|k| matches!(k, NodeKind::Merge)));
    }

    #[test]
    fn for_loop_over_an_argument_builds_a_loop_region() {
        // for (k in arg0) {} ; return null
        let mut code = CodeBuffer::new();
        code.emit_a(Opcode::MoveNull, 1, 1, 0).unwrap(); // reserve local slot 1 for `k`, below the iterator
        code.emit_a(Opcode::LoadV, 0, 1, 0).unwrap();
        let prep = code.reserve_a(Opcode::ForPrep, 1, 0).unwrap();
        let header = code.len();
        code.emit_a(Opcode::IdRefK, 1, 2, 0).unwrap();
        let loop_op = code.reserve_a(Opcode::ForLoop, 3, 0).unwrap();
        code.patch_a(loop_op, header as u32).unwrap();
        let after = code.len() as u32;
        code.patch_a(prep, after).unwrap();
        code.emit_op(Opcode::RetNull, 4, 0);

        let (heap, proto_ref) = proto_heap(code, 1, Vec::new());
        let graph = build_graph(&heap, proto_ref).unwrap();
        let kinds = graph.ids().map(|id| graph.node(id).kind.clone()).collect::<Vec<_>>();
        assert!(kinds.iter().any(|k| matches!(k, NodeKind::Loop)));
        assert!(kinds.iter().any(|k| matches!(k, NodeKind::IterNew)));
        assert!(kinds.iter().any(|k| matches!(k, NodeKind::IterKey)));
    }

    #[test]
    fn globals_are_effectful_and_bound() {
        let mut code = CodeBuffer::new();
        code.emit_a(Opcode::GGet, 0, 1, 0).unwrap();
        code.emit_op(Opcode::Pop, 1, 0);
        code.emit_op(Opcode::RetNull, 2, 0);
        let mut heap = Heap::new(GcConfig::default());
        let name = heap.intern_string(b"x");
        let module = heap.alloc_module(ObjModule { protos: Vec::new(), source_path: "t".into(), prev: None, next: None });
        let proto =
            ObjProto { code, numbers: Vec::new(), strings: vec![name], upvalues: Vec::new(), narg: 0, name: "t".into(), proto_index: 0, module };
        let proto_ref = heap.alloc_proto(proto);
        let graph = build_graph(&heap, proto_ref).unwrap();
        let gget = graph.ids().find(|&id| matches!(graph.node(id).kind, NodeKind::GGet { .. })).unwrap();
        assert!(graph.node(gget).bounded.is_some());
    }
}

fn intrinsic_index(op: Opcode) -> u32 {
    use Opcode::*;
    match op {
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
        _ => unreachable!("intrinsic_index only receives ICall* opcodes"),
    }
}
