use crate::lang::Kind;
use serde::{Deserialize, Serialize};

// =============================================================================
// Opcode - typed instruction set
// =============================================================================

/// One-byte opcodes. Operand widths are registered per opcode in
/// [`Opcode::operand_widths`]; operands are encoded big-endian.
///
/// Every arithmetic opcode observes operands of exactly one kind; the
/// compiler inserts cast instructions so the VM never dispatches on
/// runtime types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    Nop = 0x00,
    /// Discard the stack top (emitted after every expression statement).
    Pop = 0x01,

    // Loads
    I32Load = 0x10,  // value: i32
    F64Load = 0x11,  // bits: f64
    BoolLoad = 0x12, // value: u8
    StrLoad = 0x13,  // offset: u32, length: u32 (into the constant pool)
    NullLoad = 0x14,
    UndefLoad = 0x15,

    // int32 arithmetic
    I32Add = 0x20,
    I32Sub = 0x21,
    I32Mul = 0x22,

    // float64 arithmetic
    F64Add = 0x30,
    F64Sub = 0x31,
    F64Mul = 0x32,
    F64Div = 0x33,
    F64Rem = 0x34,

    // string operations
    StrAdd = 0x40,

    // Conversions; mnemonic reads source-to-target.
    B2I = 0x50,
    I2F = 0x51,
    I2S = 0x52,
    F2I = 0x53,
    F2S = 0x54,
    S2I = 0x55,
    S2F = 0x56,

    // Variable slots
    SLoad = 0x60,  // slot: u16
    SStore = 0x61, // slot: u16

    // Objects
    /// Push a fresh object parented to the VM root. ( -- obj )
    ObjLoad = 0x70,
    /// Prototype-chain property read. ( obj key -- value )
    GetProp = 0x71,
    /// Own-map property write; leaves the object behind. ( obj key value -- obj )
    SetProp = 0x72,
}

impl Opcode {
    pub fn from_byte(byte: u8) -> Option<Opcode> {
        let op = match byte {
            0x00 => Opcode::Nop,
            0x01 => Opcode::Pop,
            0x10 => Opcode::I32Load,
            0x11 => Opcode::F64Load,
            0x12 => Opcode::BoolLoad,
            0x13 => Opcode::StrLoad,
            0x14 => Opcode::NullLoad,
            0x15 => Opcode::UndefLoad,
            0x20 => Opcode::I32Add,
            0x21 => Opcode::I32Sub,
            0x22 => Opcode::I32Mul,
            0x30 => Opcode::F64Add,
            0x31 => Opcode::F64Sub,
            0x32 => Opcode::F64Mul,
            0x33 => Opcode::F64Div,
            0x34 => Opcode::F64Rem,
            0x40 => Opcode::StrAdd,
            0x50 => Opcode::B2I,
            0x51 => Opcode::I2F,
            0x52 => Opcode::I2S,
            0x53 => Opcode::F2I,
            0x54 => Opcode::F2S,
            0x55 => Opcode::S2I,
            0x56 => Opcode::S2F,
            0x60 => Opcode::SLoad,
            0x61 => Opcode::SStore,
            0x70 => Opcode::ObjLoad,
            0x71 => Opcode::GetProp,
            0x72 => Opcode::SetProp,
            _ => return None,
        };
        Some(op)
    }

    /// Byte widths of this opcode's operands. Constant per opcode across
    /// the whole system.
    pub fn operand_widths(self) -> &'static [usize] {
        match self {
            Opcode::I32Load => &[4],
            Opcode::F64Load => &[8],
            Opcode::BoolLoad => &[1],
            Opcode::StrLoad => &[4, 4],
            Opcode::SLoad | Opcode::SStore => &[2],
            _ => &[],
        }
    }

    /// Total encoded width: opcode byte plus operands.
    pub fn width(self) -> usize {
        1 + self.operand_widths().iter().sum::<usize>()
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Nop => "NOP",
            Opcode::Pop => "POP",
            Opcode::I32Load => "I32LOAD",
            Opcode::F64Load => "F64LOAD",
            Opcode::BoolLoad => "BOOLLOAD",
            Opcode::StrLoad => "STRLOAD",
            Opcode::NullLoad => "NULLLOAD",
            Opcode::UndefLoad => "UNDEFLOAD",
            Opcode::I32Add => "I32ADD",
            Opcode::I32Sub => "I32SUB",
            Opcode::I32Mul => "I32MUL",
            Opcode::F64Add => "F64ADD",
            Opcode::F64Sub => "F64SUB",
            Opcode::F64Mul => "F64MUL",
            Opcode::F64Div => "F64DIV",
            Opcode::F64Rem => "F64REM",
            Opcode::StrAdd => "STRADD",
            Opcode::B2I => "B2I",
            Opcode::I2F => "I2F",
            Opcode::I2S => "I2S",
            Opcode::F2I => "F2I",
            Opcode::F2S => "F2S",
            Opcode::S2I => "S2I",
            Opcode::S2F => "S2F",
            Opcode::SLoad => "SLOAD",
            Opcode::SStore => "SSTORE",
            Opcode::ObjLoad => "OBJLOAD",
            Opcode::GetProp => "GETPROP",
            Opcode::SetProp => "SETPROP",
        }
    }

    /// The kind a load opcode pushes, for the foldable loads the optimizer
    /// recognizes (scalar and string loads only).
    pub fn load_kind(self) -> Option<Kind> {
        match self {
            Opcode::I32Load => Some(Kind::Int32),
            Opcode::F64Load => Some(Kind::Float64),
            Opcode::BoolLoad => Some(Kind::Bool),
            Opcode::StrLoad => Some(Kind::Str),
            _ => None,
        }
    }

    /// The kind a conversion opcode pops, or None for non-conversions.
    pub fn cast_source(self) -> Option<Kind> {
        match self {
            Opcode::B2I => Some(Kind::Bool),
            Opcode::I2F | Opcode::I2S => Some(Kind::Int32),
            Opcode::F2I | Opcode::F2S => Some(Kind::Float64),
            Opcode::S2I | Opcode::S2F => Some(Kind::Str),
            _ => None,
        }
    }

    /// Binary operators the optimizer may fold (two operands, one result,
    /// no side effects).
    pub fn is_binary(self) -> bool {
        matches!(
            self,
            Opcode::I32Add
                | Opcode::I32Sub
                | Opcode::I32Mul
                | Opcode::F64Add
                | Opcode::F64Sub
                | Opcode::F64Mul
                | Opcode::F64Div
                | Opcode::F64Rem
                | Opcode::StrAdd
        )
    }
}
