pub mod casts;
pub mod compile;
pub mod compile_error;
pub mod op;
pub mod unit;

pub use compile::Compiler;
pub use compile_error::CompileError;
pub use op::Opcode;
pub use unit::{Bytecode, Instr};
