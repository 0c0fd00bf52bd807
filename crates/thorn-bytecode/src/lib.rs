//! Thorn bytecode: opcodes, function prototypes, an assembler and a disassembler.

pub mod builder;
pub mod disasm;
pub mod opcode;
pub mod proto;
