//! The interpreter-level error umbrella. Heap and bytecode errors bubble up
//! through `#[from]`; everything that only makes sense at the call-loop
//! level (stack limits, undefined globals, non-callables) is added here.

use sparrow_heap::HeapError;
use sparrow_util::FrameTrace;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SparrowError {
    #[error(transparent)]
    Heap(#[from] HeapError),

    #[error(transparent)]
    Bytecode(#[from] sparrow_bc::BcError),

    #[error("stack overflow: exceeded {max} value slots")]
    StackOverflow { max: usize },

    #[error("call stack exceeded {max} frames")]
    TooManyFrames { max: usize },

    #[error("undefined global `{0}`")]
    UndefinedGlobal(String),

    #[error("value of type {0} is not callable")]
    NotCallable(&'static str),

    #[error("wrong argument count: expected {expected}, got {got}")]
    ArityMismatch { expected: u32, got: u32 },

    #[error("import failed for module `{0}`: {1}")]
    ImportFailed(String, String),

    #[error("assertion failed{}", .0.as_ref().map(|m| format!(": {m}")).unwrap_or_default())]
    AssertionFailed(Option<String>),

    #[error("script error: {0}")]
    ScriptRaised(String),

    #[error("malformed bytecode at pc {pc}: {reason}")]
    MalformedBytecode { pc: usize, reason: String },
}

pub type SparrowResult<T> = std::result::Result<T, SparrowError>;

/// Pairs a `SparrowError` with the frame trace captured at the point it was
/// raised, for CLI-level reporting (§4.J).
#[derive(Debug)]
pub struct Unwind {
    pub error: SparrowError,
    pub frames: Vec<FrameTrace>,
}

impl std::fmt::Display for Unwind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.error)?;
        write!(f, "{}", sparrow_util::render_unwind(&self.frames))
    }
}
