//! The call-stack shape the interpreter drives (§4.F.1), grounded directly
//! on the original `vm.h`'s `CallFrame`/`CallThread`/`Runtime` triple.

use sparrow_heap::{GcRef, Value};
use sparrow_util::FrameKind;

/// Marks a frame whose completion must return control to the host rather
/// than continue the interpreter loop.
pub const HOST_RETURN_SENTINEL: i64 = -1;

#[derive(Debug, Clone, Copy)]
pub struct CallFrame {
    /// Base index into the thread's value stack; -1 is the host-return
    /// sentinel.
    pub base_ptr: i64,
    pub pc: usize,
    /// Closure being executed, if any (native/Method/Udata calls leave this
    /// `None`).
    pub closure: Option<GcRef>,
    pub callable: Value,
    pub narg: u32,
}

impl CallFrame {
    pub fn host_sentinel(callable: Value) -> Self {
        Self { base_ptr: HOST_RETURN_SENTINEL, pc: 0, closure: None, callable, narg: 0 }
    }

    pub fn is_host_return(&self) -> bool {
        self.base_ptr == HOST_RETURN_SENTINEL
    }
}

/// One host-level call's worth of execution state: a growable Value stack
/// plus a frame array.
pub struct CallThread {
    pub stack: Vec<Value>,
    pub frames: Vec<CallFrame>,
    max_stack_size: usize,
    max_frames: usize,
}

impl CallThread {
    pub fn new(initial_stack_size: usize, max_stack_size: usize, max_frames: usize) -> Self {
        Self {
            stack: Vec::with_capacity(initial_stack_size),
            frames: Vec::new(),
            max_stack_size,
            max_frames,
        }
    }

    pub fn push_value(&mut self, value: Value) -> crate::error::SparrowResult<()> {
        if self.stack.len() >= self.max_stack_size {
            return Err(crate::error::SparrowError::StackOverflow { max: self.max_stack_size });
        }
        self.stack.push(value);
        Ok(())
    }

    pub fn pop_value(&mut self) -> Value {
        self.stack.pop().expect("interpreter popped an empty value stack")
    }

    pub fn push_frame(&mut self, frame: CallFrame) -> crate::error::SparrowResult<()> {
        if self.frames.len() >= self.max_frames {
            return Err(crate::error::SparrowError::TooManyFrames { max: self.max_frames });
        }
        self.frames.push(frame);
        Ok(())
    }

    pub fn current_frame(&self) -> &CallFrame {
        self.frames.last().expect("call thread has no active frame")
    }

    pub fn current_frame_mut(&mut self) -> &mut CallFrame {
        self.frames.last_mut().expect("call thread has no active frame")
    }

    /// Builds a top-to-bottom trace of the thread's current frames, for
    /// error reporting.
    pub fn trace(&self, heap: &sparrow_heap::Heap) -> Vec<FrameTrace> {
        self.frames
            .iter()
            .rev()
            .map(|frame| {
                let (kind, name) = match frame.closure {
                    Some(closure_ref) => {
                        let proto_name = heap
                            .as_closure(closure_ref)
                            .ok()
                            .and_then(|c| heap.as_proto(c.proto).ok())
                            .map(|p| p.name.clone())
                            .unwrap_or_else(|| "<anonymous>".to_string());
                        (FrameKind::Proto, proto_name)
                    }
                    None => (FrameKind::Intrinsic, "<native>".to_string()),
                };
                FrameTrace {
                    kind,
                    name,
                    base_ptr: frame.base_ptr.max(0) as usize,
                    pc: frame.pc,
                    narg: frame.narg as usize,
                }
            })
            .collect()
    }
}

/// Owns the one-or-more `CallThread`s an interpreter invocation chain uses
/// (reentrant calls via `run_string`/`import` push a new thread rather than
/// a new frame on the same thread, matching the original's `RTCallThread`
/// indirection).
pub struct Runtime {
    threads: Vec<CallThread>,
    pub max_stacksize: usize,
    pub max_funccall: usize,
}

impl Runtime {
    pub fn new(initial_stack_size: usize, max_stack_size: usize, max_frames: usize) -> Self {
        let mut rt = Self { threads: Vec::new(), max_stacksize: max_stack_size, max_funccall: max_frames };
        rt.threads.push(CallThread::new(initial_stack_size, max_stack_size, max_frames));
        rt
    }

    pub fn push_thread(&mut self, initial_stack_size: usize) {
        self.threads.push(CallThread::new(initial_stack_size, self.max_stacksize, self.max_funccall));
    }

    pub fn pop_thread(&mut self) {
        self.threads.pop();
    }

    pub fn current_thread(&self) -> &CallThread {
        self.threads.last().expect("runtime has no active call thread")
    }

    pub fn current_thread_mut(&mut self) -> &mut CallThread {
        self.threads.last_mut().expect("runtime has no active call thread")
    }

    pub fn depth(&self) -> usize {
        self.threads.len()
    }

    /// Every Value currently reachable from the interpreter's own state
    /// across all call threads (§4.D mark-phase roots): each thread's value
    /// stack plus each frame's callable, since a callable sitting in a
    /// frame (e.g. a Method/Udata mid-call) may not also be on the stack.
    pub fn stack_roots(&self) -> Vec<Value> {
        let mut roots = Vec::new();
        for thread in &self.threads {
            roots.extend_from_slice(&thread.stack);
            roots.extend(thread.frames.iter().map(|f| f.callable));
        }
        roots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_value_respects_max_stack_size() {
        let mut thread = CallThread::new(1, 2, 10);
        thread.push_value(Value::number(1.0)).unwrap();
        thread.push_value(Value::number(2.0)).unwrap();
        assert!(thread.push_value(Value::number(3.0)).is_err());
    }

    #[test]
    fn push_frame_respects_max_frames() {
        let mut thread = CallThread::new(4, 16, 1);
        thread.push_frame(CallFrame::host_sentinel(Value::NULL)).unwrap();
        assert!(thread.push_frame(CallFrame::host_sentinel(Value::NULL)).is_err());
    }

    #[test]
    fn host_sentinel_frame_is_recognized() {
        let frame = CallFrame::host_sentinel(Value::NULL);
        assert!(frame.is_host_return());
    }
}
