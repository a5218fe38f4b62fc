//! The closed opcode catalog.
//!
//! Instructions are either 1 byte (opcode only) or 4 bytes (opcode plus a
//! little-endian 24-bit operand, "A"). Which form an opcode takes is fixed
//! per-opcode, not per-instance, so [`Opcode::HAS_OPERAND`] is a table, not a
//! runtime flag.
//!
//! The catalog is declared once via [`bytecode_table!`] so the enum, the
//! display name table, and the operand-arity table can never drift apart.

macro_rules! bytecode_table {
    ($( $variant:ident $(= $arg:literal)? ),+ $(,)?) => {
        #[repr(u8)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Opcode {
            $( $variant, )+
        }

        impl Opcode {
            pub const COUNT: usize = bytecode_table!(@count $( $variant ),+);

            pub const ALL: [Opcode; Self::COUNT] = [
                $( Opcode::$variant, )+
            ];

            pub fn name(self) -> &'static str {
                match self {
                    $( Opcode::$variant => stringify!($variant), )+
                }
            }

            pub fn has_operand(self) -> bool {
                match self {
                    $( Opcode::$variant => bytecode_table!(@has_arg $($arg)?), )+
                }
            }

            pub fn from_u8(byte: u8) -> Option<Opcode> {
                Self::ALL.get(byte as usize).copied()
            }

            pub fn to_u8(self) -> u8 {
                self as u8
            }
        }
    };

    (@count $($variant:ident),+) => {
        { let arr = [$(stringify!($variant)),+]; arr.len() }
    };

    (@has_arg 1) => { true };
    (@has_arg 0) => { false };
    (@has_arg) => { false };
}

bytecode_table! {
    // ---- no-operand literal loads -------------------------------------
    LoadTrue, LoadFalse, LoadNull,
    // micro-immediate numbers -5..=5 (BC_SPECIAL_NUMBER_SIZE = 11)
    LoadNN5, LoadNN4, LoadNN3, LoadNN2, LoadNN1,
    LoadN0,
    LoadN1, LoadN2, LoadN3, LoadN4, LoadN5,

    // ---- operand-bearing loads -----------------------------------------
    LoadNumber = 1,   // A: index into the Proto number constant pool
    LoadString = 1,   // A: index into the Proto string constant pool
    LoadV = 1,        // A: frame-relative slot

    // ---- move (write TOS or a literal into a frame slot) --------------
    MoveV = 1,
    MoveTrue = 1, MoveFalse = 1, MoveNull = 1,
    MoveNN5 = 1, MoveNN4 = 1, MoveNN3 = 1, MoveNN2 = 1, MoveNN1 = 1,
    MoveN0 = 1,
    MoveN1 = 1, MoveN2 = 1, MoveN3 = 1, MoveN4 = 1, MoveN5 = 1,

    Pop,

    // ---- arithmetic ------------------------------------------------------
    AddVV, AddNV = 1, AddVN = 1, AddSV = 1, AddVS = 1,
    SubVV, SubNV = 1, SubVN = 1,
    MulVV, MulNV = 1, MulVN = 1,
    DivVV, DivNV = 1, DivVN = 1,
    PowVV, PowNV = 1, PowVN = 1,
    ModVV, ModNV = 1, ModVN = 1,
    Neg, Not, Test,

    // ---- comparisons -------------------------------------------------
    LtVV, LtNV = 1, LtVN = 1, LtSV = 1, LtVS = 1,
    LeVV, LeNV = 1, LeVN = 1, LeSV = 1, LeVS = 1,
    GtVV, GtNV = 1, GtVN = 1, GtSV = 1, GtVS = 1,
    GeVV, GeNV = 1, GeVN = 1, GeSV = 1, GeVS = 1,
    EqVV, EqNV = 1, EqVN = 1, EqSV = 1, EqVS = 1, EqVNull, EqNullV,
    NeVV, NeNV = 1, NeVN = 1, NeSV = 1, NeVS = 1, NeVNull, NeNullV,

    // ---- attribute / index access -------------------------------------
    AGetS = 1, AGetN = 1, AGetI = 1, AGet,
    ASetN = 1, ASetS = 1, ASet, ASetI = 1,

    // ---- upvalue --------------------------------------------------------
    UGet = 1,
    USet = 1, USetTrue = 1, USetFalse = 1, USetNull = 1,

    // ---- globals ----------------------------------------------------------
    GGet = 1,
    GSet = 1, GSetTrue = 1, GSetFalse = 1, GSetNull = 1,

    // ---- iteration --------------------------------------------------------
    IdRefK = 1, IdRefKV = 1, ForPrep = 1, ForLoop = 1,

    // ---- control flow ----------------------------------------------------
    Brt = 1, Brf = 1,
    If = 1, EndIf = 1,
    Brk = 1, Cont = 1,
    Loop = 1,
    Jump = 1,

    // ---- calls --------------------------------------------------------
    Call0, Call1, Call2, Call3, Call4, Call = 1,

    // ---- returns --------------------------------------------------------
    Ret, RetNull, RetN0, RetN1, RetNN1,
    RetN = 1, RetS = 1, RetT, RetF,

    // ---- constructors ----------------------------------------------------
    NewL0, NewL1, NewL2, NewL3, NewL4, NewL = 1,
    NewM0, NewM1, NewM2, NewM3, NewM4, NewM = 1,

    // ---- closures ---------------------------------------------------------
    LoadCls = 1,

    // ---- dedicated intrinsic-call fast paths (one per intrinsic) --------
    ICallTypeOf, ICallIsBoolean, ICallIsString, ICallIsNumber, ICallIsNull,
    ICallIsList, ICallIsMap, ICallIsClosure,
    ICallToString, ICallToNumber, ICallToBoolean,
    ICallPrint, ICallError, ICallAssert, ICallImport,
    ICallSize, ICallRange, ICallLoop, ICallRunString,
    ICallMin, ICallMax, ICallSort,
    ICallSet, ICallGet, ICallExist, ICallMSec,

    // ---- debug / verifier markers --------------------------------------
    Nop,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_u8() {
        for op in Opcode::ALL {
            assert_eq!(Opcode::from_u8(op.to_u8()), Some(op));
        }
    }

    #[test]
    fn catalog_fits_in_a_byte() {
        assert!(Opcode::COUNT <= 256, "opcode catalog must fit in a u8: {}", Opcode::COUNT);
    }

    #[test]
    fn micro_immediate_loads_carry_no_operand() {
        assert!(!Opcode::LoadN0.has_operand());
        assert!(!Opcode::LoadNN5.has_operand());
        assert!(!Opcode::LoadN5.has_operand());
    }

    #[test]
    fn const_pool_loads_carry_an_operand() {
        assert!(Opcode::LoadNumber.has_operand());
        assert!(Opcode::LoadString.has_operand());
    }

    #[test]
    fn byte_past_the_catalog_is_none() {
        assert!(Opcode::COUNT < 256);
        assert!(Opcode::from_u8(Opcode::COUNT as u8).is_none());
    }
}
