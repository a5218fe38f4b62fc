//! The structured stack-unwind dump appended to every Sparrow runtime error.

use std::fmt;

/// What kind of callable a [`FrameTrace`] line names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Proto,
    Method,
    Udata,
    Intrinsic,
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FrameKind::Proto => "proto",
            FrameKind::Method => "method",
            FrameKind::Udata => "udata",
            FrameKind::Intrinsic => "intrinsic",
        };
        write!(f, "{s}")
    }
}

/// One line of the unwind dump: which frame, and where it was when the
/// error occurred.
#[derive(Debug, Clone)]
pub struct FrameTrace {
    pub kind: FrameKind,
    pub name: String,
    pub base_ptr: usize,
    pub pc: usize,
    pub narg: usize,
}

impl fmt::Display for FrameTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  at {} `{}` (base_ptr={}, pc={}, narg={})",
            self.kind, self.name, self.base_ptr, self.pc, self.narg
        )
    }
}

/// Renders a full stack-unwind dump, one [`FrameTrace`] per line, innermost
/// frame first — matching the order frames are popped during unwind.
pub fn render_unwind(frames: &[FrameTrace]) -> String {
    let mut out = String::new();
    for frame in frames {
        out.push_str(&frame.to_string());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_one_line_per_frame() {
        let frames = vec![
            FrameTrace { kind: FrameKind::Proto, name: "f".into(), base_ptr: 3, pc: 12, narg: 1 },
            FrameTrace { kind: FrameKind::Intrinsic, name: "print".into(), base_ptr: 0, pc: 0, narg: 1 },
        ];
        let rendered = render_unwind(&frames);
        assert_eq!(rendered.lines().count(), 2);
        assert!(rendered.contains("proto `f`"));
        assert!(rendered.contains("intrinsic `print`"));
    }
}
