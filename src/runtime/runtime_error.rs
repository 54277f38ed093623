use crate::lang::Kind;

#[derive(Debug, Clone)]
pub struct RuntimeError {
    pub message: String,
    pub help: Option<String>,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        RuntimeError {
            message: message.into(),
            help: None,
        }
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "runtime error: {}", self.message)?;
        if let Some(help) = &self.help {
            write!(f, "\n  hint: {}", help)?;
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {}

pub fn unknown_opcode(byte: u8, offset: usize) -> RuntimeError {
    RuntimeError::new(format!(
        "unknown opcode 0x{:02x} at offset {}",
        byte, offset
    ))
}

pub fn stack_underflow() -> RuntimeError {
    RuntimeError::new("stack underflow")
        .with_help("an instruction popped more operands than were pushed")
}

pub fn kind_mismatch(expected: &str, got: Kind) -> RuntimeError {
    RuntimeError::new(format!("expected {} on the stack, got {}", expected, got))
}

pub fn slot_out_of_range(slot: usize, len: usize) -> RuntimeError {
    RuntimeError::new(format!("slot {} out of range (only {} in use)", slot, len))
}

pub fn const_out_of_range(offset: u64, len: u64, pool: usize) -> RuntimeError {
    RuntimeError::new(format!(
        "constant pool access ({}, {}) out of range (pool is {} bytes)",
        offset, len, pool
    ))
}
