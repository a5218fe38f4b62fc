use thiserror::Error;

#[derive(Debug, Error)]
pub enum BcError {
    #[error("operand {0} exceeds the 24-bit operand ceiling (0x00FFFFFF)")]
    OperandOverflow(u32),

    #[error("attempted to patch a with-operand instruction as a no-operand one, or vice versa, at byte offset {0}")]
    PatchClassMismatch(usize),

    #[error("patch target {0} is out of range for a buffer of length {1}")]
    PatchOutOfRange(usize, usize),

    #[error("too many constants in one Proto's pool: {0}")]
    TooManyConstants(usize),
}

pub type BcResult<T> = std::result::Result<T, BcError>;
