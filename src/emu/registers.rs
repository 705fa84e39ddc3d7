//! Register file
//!
//! 32 registers holding 32-bit two's-complement values. Writes to x0
//! are silently discarded and reads from it always yield zero. The
//! file remembers the last register written and the last register read;
//! those two marks exist only for the diagnostic dump and carry no
//! semantic weight.

use crate::registers::{abi_name, reg_index};
use crate::utils::interpret_i32_as_unsigned;

use super::ExecutionError;

const FMT_RED_BOLD: &str = "\x1b[31;1m";
const FMT_ORANGE_UNDERLINE: &str = "\x1b[33;4m";
const FMT_NONE: &str = "\x1b[0m";

#[derive(Debug, Default)]
pub struct RegisterFile {
    vals: [i32; 32],
    last_set: Option<u8>,
    last_read: Option<u8>,
}

impl RegisterFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read register n. Index is masked to the valid range by the
    /// caller's u8 being checked at decode time; out-of-range indices
    /// cannot be produced by the assembler.
    pub fn get(&mut self, n: u8) -> i32 {
        self.last_read = Some(n);
        self.vals[usize::from(n & 0x1f)]
    }

    /// Read without touching the last-read mark (dump helper)
    pub fn peek(&self, n: u8) -> i32 {
        self.vals[usize::from(n & 0x1f)]
    }

    /// Write register n; writes to x0 are dropped
    pub fn set(&mut self, n: u8, value: i32) {
        let n = n & 0x1f;
        if n == 0 {
            return;
        }
        self.last_set = Some(n);
        self.vals[usize::from(n)] = value;
    }

    pub fn get_by_name(&mut self, name: &str) -> Result<i32, ExecutionError> {
        let n = reg_index(name)
            .map_err(|_| ExecutionError::InvalidRegister(name.to_string()))?;
        Ok(self.get(n))
    }

    pub fn set_by_name(&mut self, name: &str, value: i32) -> Result<(), ExecutionError> {
        let n = reg_index(name)
            .map_err(|_| ExecutionError::InvalidRegister(name.to_string()))?;
        self.set(n, value);
        Ok(())
    }

    fn repr(&self, n: u8) -> String {
        let text = format!(
            "{:>4}=0x{:08X}",
            abi_name(n),
            interpret_i32_as_unsigned(self.peek(n))
        );
        if self.last_set == Some(n) {
            format!("{FMT_RED_BOLD}{text}{FMT_NONE}")
        } else if self.last_read == Some(n) {
            format!("{FMT_ORANGE_UNDERLINE}{text}{FMT_NONE}")
        } else {
            text
        }
    }

    /// Render all 32 registers, four per line, with the last written
    /// register in red and the last read one underlined
    pub fn dump(&self) -> String {
        let mut lines = Vec::with_capacity(8);
        for row in 0..8u8 {
            let cols: Vec<String> = (0..4).map(|col| self.repr(4 * row + col)).collect();
            lines.push(format!("\t{}", cols.join(" ")));
        }
        lines.join("\n")
    }
}
