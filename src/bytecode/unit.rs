use crate::bytecode::op::Opcode;
use serde::{Deserialize, Serialize};

// =============================================================================
// Bytecode - two-region compiled unit
// =============================================================================

/// A decoded instruction: opcode plus operand values, with its position in
/// the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Instr {
    pub offset: usize,
    pub op: Opcode,
    pub operands: Vec<u64>,
}

impl Instr {
    /// Encoded byte width (opcode byte + operands).
    pub fn width(&self) -> usize {
        self.op.width()
    }
}

/// A compiled unit: instruction byte stream plus flat constant pool.
///
/// Invariant: every `STRLOAD` operand pair addresses an in-bounds slice of
/// the pool. The compiler stores string runs NUL-terminated, but the pool
/// itself is addressed only by (offset, length) pairs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bytecode {
    pub code: Vec<u8>,
    pub consts: Vec<u8>,
}

impl Bytecode {
    pub fn new() -> Self {
        Bytecode::default()
    }

    /// Append one instruction; returns its start offset.
    ///
    /// Operand values are truncated to their registered widths and written
    /// big-endian. The operand count must match the opcode's table.
    pub fn emit(&mut self, op: Opcode, operands: &[u64]) -> usize {
        let widths = op.operand_widths();
        debug_assert_eq!(
            operands.len(),
            widths.len(),
            "operand count mismatch for {}",
            op.mnemonic()
        );

        let start = self.code.len();
        self.code.push(op as u8);
        for (value, width) in operands.iter().zip(widths) {
            for i in (0..*width).rev() {
                self.code.push((value >> (8 * i)) as u8);
            }
        }
        start
    }

    /// Append raw bytes to the constant pool; returns their start offset.
    pub fn store(&mut self, bytes: &[u8]) -> usize {
        let start = self.consts.len();
        self.consts.extend_from_slice(bytes);
        start
    }

    /// Decode the instruction at `offset`.
    ///
    /// Returns `None` (the zero-width end-of-stream result) for
    /// out-of-range offsets, unregistered opcode bytes, and truncated
    /// operands. Scanning consumers (disassembler, optimizer) stop there;
    /// the VM distinguishes end-of-stream from a mid-stream unknown byte.
    pub fn fetch(&self, offset: usize) -> Option<Instr> {
        let byte = *self.code.get(offset)?;
        let op = Opcode::from_byte(byte)?;

        let mut operands = Vec::with_capacity(op.operand_widths().len());
        let mut at = offset + 1;
        for width in op.operand_widths() {
            if at + width > self.code.len() {
                return None;
            }
            let mut value: u64 = 0;
            for _ in 0..*width {
                value = (value << 8) | self.code[at] as u64;
                at += 1;
            }
            operands.push(value);
        }

        Some(Instr {
            offset,
            op,
            operands,
        })
    }

    /// Decode the whole stream, stopping at the first zero-width fetch.
    pub fn instrs(&self) -> Vec<Instr> {
        let mut out = Vec::new();
        let mut offset = 0;
        while let Some(instr) = self.fetch(offset) {
            offset += instr.width();
            out.push(instr);
        }
        out
    }

    /// Borrow a constant-pool slice, checking bounds.
    pub fn const_slice(&self, offset: u64, len: u64) -> Option<&[u8]> {
        let start = usize::try_from(offset).ok()?;
        let len = usize::try_from(len).ok()?;
        let end = start.checked_add(len)?;
        self.consts.get(start..end)
    }
}

impl std::fmt::Display for Bytecode {
    /// Disassembly: one line per instruction as
    /// `<offset> <mnemonic> <hex operand>...`, then the constant pool as
    /// NUL-delimited printable-escaped runs.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for instr in self.instrs() {
            write!(f, "{:04} {}", instr.offset, instr.op.mnemonic())?;
            for (value, width) in instr.operands.iter().zip(instr.op.operand_widths()) {
                write!(f, " {:0>1$x}", value, width * 2)?;
            }
            writeln!(f)?;
        }

        if !self.consts.is_empty() {
            writeln!(f, "-- constants --")?;
            let mut offset = 0;
            for run in self.consts.split(|b| *b == 0) {
                if offset >= self.consts.len() {
                    break;
                }
                write!(f, "{:04} \"", offset)?;
                for b in run {
                    for esc in std::ascii::escape_default(*b) {
                        write!(f, "{}", esc as char)?;
                    }
                }
                writeln!(f, "\"")?;
                offset += run.len() + 1;
            }
        }

        Ok(())
    }
}
