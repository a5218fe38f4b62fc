//! Bytecode instruction stream: the closed opcode catalog, the
//! variable-length instruction buffer, and the parallel debug line table.

pub mod buffer;
pub mod error;
pub mod opcode;

pub use buffer::{CodeBuffer, InstrDebugInfo, Label, MAX_ARG_VALUE};
pub use error::{BcError, BcResult};
pub use opcode::Opcode;

/// The cutoff at which micro-immediate load/move opcodes give way to the
/// generic constant-pool form; matches the inclusive integer range −5..=5
/// plus true/false/null (11 "special number" slots per family).
pub const SPECIAL_NUMBER_RANGE: std::ops::RangeInclusive<i64> = -5..=5;

/// Maps an integer in [`SPECIAL_NUMBER_RANGE`] to its dedicated `Load*`
/// opcode, or `None` if it falls outside the micro-immediate range.
pub fn load_opcode_for_small_int(n: i64) -> Option<Opcode> {
    use Opcode::*;
    Some(match n {
        -5 => LoadNN5,
        -4 => LoadNN4,
        -3 => LoadNN3,
        -2 => LoadNN2,
        -1 => LoadNN1,
        0 => LoadN0,
        1 => LoadN1,
        2 => LoadN2,
        3 => LoadN3,
        4 => LoadN4,
        5 => LoadN5,
        _ => return None,
    })
}

/// The inverse of [`load_opcode_for_small_int`]: the integer value a
/// micro-immediate load/move opcode encodes, if it is one.
pub fn small_int_for_opcode(op: Opcode) -> Option<i64> {
    use Opcode::*;
    Some(match op {
        LoadNN5 | MoveNN5 => -5,
        LoadNN4 | MoveNN4 => -4,
        LoadNN3 | MoveNN3 => -3,
        LoadNN2 | MoveNN2 => -2,
        LoadNN1 | MoveNN1 => -1,
        LoadN0 | MoveN0 => 0,
        LoadN1 | MoveN1 => 1,
        LoadN2 | MoveN2 => 2,
        LoadN3 | MoveN3 => 3,
        LoadN4 | MoveN4 => 4,
        LoadN5 | MoveN5 => 5,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_int_roundtrips() {
        for n in SPECIAL_NUMBER_RANGE {
            let op = load_opcode_for_small_int(n).unwrap();
            assert_eq!(small_int_for_opcode(op), Some(n));
        }
    }

    #[test]
    fn out_of_range_has_no_micro_immediate() {
        assert_eq!(load_opcode_for_small_int(6), None);
        assert_eq!(load_opcode_for_small_int(-6), None);
    }
}
