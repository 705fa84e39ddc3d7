//! Decoded instruction records
//!
//! The emulator does not re-decode machine words; it executes the
//! records the assembler produced alongside them. A record is the
//! mnemonic, the absolute address the instruction lives at, up to three
//! register indices in fixed slots, and at most one immediate. Unused
//! register slots hold index 0.

use std::fmt;

use crate::utils::interpret_i32_as_unsigned;

use super::ExecutionError;

/// Two readings of the same immediate operand.
///
/// Consider these four lines (assuming `back` labels an instruction 16
/// bytes before the current one):
///
/// ```text
/// beq  a0, a1, back    // conditional jump 16 bytes back
/// beq  a0, a1, -16     // conditional jump 16 bytes back?
/// addi a0, a1, back    // add the label's address
/// addi a0, a1, -16     // add -16
/// ```
///
/// Branches must treat a label and a raw number identically, while
/// arithmetic must not. Each record therefore exposes its immediate
/// both as the literal value and as that value relative to the
/// instruction's own address; branch and jump handlers consume the
/// pc-relative reading, everything else the absolute one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Immediate {
    pub abs_value: i32,
    pub pcrel_value: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub name: String,
    pub addr: u32,
    pub rd: u8,
    pub rs1: u8,
    pub rs2: u8,
    pub imm: Option<i32>,
}

impl Instruction {
    pub fn new(name: &str, addr: u32, rd: u8, rs1: u8, rs2: u8, imm: Option<i32>) -> Self {
        Self {
            name: name.to_string(),
            addr,
            rd,
            rs1,
            rs2,
            imm,
        }
    }

    /// R-type record: op rd, rs1, rs2
    pub fn reg_reg(name: &str, addr: u32, rd: u8, rs1: u8, rs2: u8) -> Self {
        Self::new(name, addr, rd, rs1, rs2, None)
    }

    /// I-type record (arithmetic, loads, jalr): op rd, rs1, imm
    pub fn reg_imm(name: &str, addr: u32, rd: u8, rs1: u8, imm: i32) -> Self {
        Self::new(name, addr, rd, rs1, 0, Some(imm))
    }

    /// Store record: the source register travels in the rd slot
    pub fn store(name: &str, addr: u32, src: u8, base: u8, imm: i32) -> Self {
        Self::new(name, addr, src, base, 0, Some(imm))
    }

    /// Branch record: op rs1, rs2, target (absolute)
    pub fn branch(name: &str, addr: u32, rs1: u8, rs2: u8, target: i32) -> Self {
        Self::new(name, addr, 0, rs1, rs2, Some(target))
    }

    /// U/J-type record: op rd, imm
    pub fn upper(name: &str, addr: u32, rd: u8, imm: i32) -> Self {
        Self::new(name, addr, rd, 0, 0, Some(imm))
    }

    /// ecall/ebreak record: no operands
    pub fn system(name: &str, addr: u32) -> Self {
        Self::new(name, addr, 0, 0, 0, None)
    }

    /// Both views of the immediate operand
    pub fn get_imm(&self) -> Result<Immediate, ExecutionError> {
        let abs_value = self
            .imm
            .ok_or(ExecutionError::MissingImmediate(self.addr))?;
        let pcrel_value = abs_value.wrapping_sub(self.addr as i32);
        Ok(Immediate {
            abs_value,
            pcrel_value,
        })
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        match self.name.as_str() {
            "ecall" | "ebreak" => Ok(()),
            "lui" | "auipc" | "jal" => {
                write!(
                    f,
                    " x{}, 0x{:x}",
                    self.rd,
                    interpret_i32_as_unsigned(self.imm.unwrap_or(0))
                )
            }
            "beq" | "bne" | "blt" | "bge" | "bltu" | "bgeu" => {
                write!(
                    f,
                    " x{}, x{}, 0x{:x}",
                    self.rs1,
                    self.rs2,
                    interpret_i32_as_unsigned(self.imm.unwrap_or(0))
                )
            }
            _ => match self.imm {
                Some(imm) => write!(f, " x{}, x{}, {}", self.rd, self.rs1, imm),
                None => write!(f, " x{}, x{}, x{}", self.rd, self.rs1, self.rs2),
            },
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn check_immediate_dual_view() {
        let ins = Instruction::branch("bne", 0x80110, 5, 0, 0x80104);
        let imm = ins.get_imm().unwrap();
        assert_eq!(imm.abs_value, 0x80104);
        assert_eq!(imm.pcrel_value, -12);
    }

    #[test]
    fn check_missing_immediate() {
        let ins = Instruction::reg_reg("add", 0x80100, 1, 2, 3);
        assert!(matches!(
            ins.get_imm(),
            Err(ExecutionError::MissingImmediate(0x80100))
        ));
    }

    #[test]
    fn check_display() {
        let ins = Instruction::reg_imm("addi", 0, 10, 0, 17);
        assert_eq!(format!("{ins}"), "addi x10, x0, 17");
        let ins = Instruction::system("ebreak", 4);
        assert_eq!(format!("{ins}"), "ebreak");
    }
}
