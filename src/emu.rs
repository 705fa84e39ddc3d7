//! RV32I execution core
//!
//! The emulator runs the decoded records produced by the assembler
//! against a 32-entry register file and a memory-mapped program image.
//! Everything is single-threaded and synchronous: assembly completes
//! before emulation starts, and the fetch-increment-execute loop runs
//! until the program halts or traps into the debugger.

use thiserror::Error;

pub mod cpu;
pub mod debug;
pub mod exec;
pub mod instr;
pub mod memory;
pub mod registers;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("invalid address: 0x{0:08x}")]
    InvalidAddress(u32),
    #[error("instruction address 0x{0:08x} is not 4-byte aligned")]
    MisalignedAddress(u32),
    #[error("invalid register: {0}")]
    InvalidRegister(String),
    #[error("no handler for instruction '{0}'")]
    UnsupportedInstruction(String),
    #[error("instruction at 0x{0:08x} has no immediate operand")]
    MissingImmediate(u32),
    #[error("unsupported syscall number {0}")]
    UnsupportedSyscall(u32),
}
