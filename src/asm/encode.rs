//! Instruction encoder
//!
//! Turns one tokenized line into its 32-bit machine word and, from the
//! same operand parse, the decoded record the emulator executes. The
//! format family of each mnemonic comes from the ISA descriptor; the
//! encoding constants are in [`super::opcodes`].
//!
//! Operand orders accepted per family:
//!
//! - R: `op rd, rs1, rs2`
//! - I: `op rd, rs1, imm`; loads and jalr also `op rd, imm(rs1)`;
//!   `ecall`/`ebreak` take no operands
//! - S: `op rs2, imm(rs1)` or `op rs2, rs1, imm`
//! - B: `op rs1, rs2, target`
//! - U: `op rd, imm` (imm already reduced to 20 bits, e.g. via %hi)
//! - J: `jal rd, target` (`jal target` defaults rd to ra)
//!
//! Branch and jump targets are absolute; the emitted field is
//! `target - addr` with the B/J bit scatter.

use log::debug;

use std::collections::HashMap;

use crate::emu::instr::Instruction;
use crate::registers::reg_index;

use super::expr;
use super::isa::{Format, IsaSpec};
use super::lexer::Line;
use super::opcodes::*;
use super::AsmError;

fn rtype_consts(op: &str) -> Option<(u32, u32)> {
    let consts = match op {
        "add" => (FUNCT7_BASE, FUNCT3_ADD),
        "sub" => (FUNCT7_SUB, FUNCT3_SUB),
        "sll" => (FUNCT7_BASE, FUNCT3_SLL),
        "slt" => (FUNCT7_BASE, FUNCT3_SLT),
        "sltu" => (FUNCT7_BASE, FUNCT3_SLTU),
        "xor" => (FUNCT7_BASE, FUNCT3_XOR),
        "srl" => (FUNCT7_BASE, FUNCT3_SRL),
        "sra" => (FUNCT7_SRA, FUNCT3_SRA),
        "or" => (FUNCT7_BASE, FUNCT3_OR),
        "and" => (FUNCT7_BASE, FUNCT3_AND),
        _ => return None,
    };
    Some(consts)
}

fn itype_consts(op: &str) -> Option<(u32, u32)> {
    let consts = match op {
        "addi" => (FUNCT3_ADDI, OP_IMM),
        "slti" => (FUNCT3_SLTI, OP_IMM),
        "sltiu" => (FUNCT3_SLTIU, OP_IMM),
        "xori" => (FUNCT3_XORI, OP_IMM),
        "ori" => (FUNCT3_ORI, OP_IMM),
        "andi" => (FUNCT3_ANDI, OP_IMM),
        "slli" => (FUNCT3_SLLI, OP_IMM),
        "srli" => (FUNCT3_SRLI, OP_IMM),
        "srai" => (FUNCT3_SRAI, OP_IMM),
        "lb" => (FUNCT3_B, OP_LOAD),
        "lh" => (FUNCT3_H, OP_LOAD),
        "lw" => (FUNCT3_W, OP_LOAD),
        "lbu" => (FUNCT3_BU, OP_LOAD),
        "lhu" => (FUNCT3_HU, OP_LOAD),
        "jalr" => (0b000, OP_JALR),
        "ecall" => (0b000, OP_SYSTEM),
        "ebreak" => (0b000, OP_SYSTEM),
        _ => return None,
    };
    Some(consts)
}

fn stype_funct3(op: &str) -> Option<u32> {
    let funct3 = match op {
        "sb" => FUNCT3_B,
        "sh" => FUNCT3_H,
        "sw" => FUNCT3_W,
        _ => return None,
    };
    Some(funct3)
}

fn btype_funct3(op: &str) -> Option<u32> {
    let funct3 = match op {
        "beq" => FUNCT3_BEQ,
        "bne" => FUNCT3_BNE,
        "blt" => FUNCT3_BLT,
        "bge" => FUNCT3_BGE,
        "bltu" => FUNCT3_BLTU,
        "bgeu" => FUNCT3_BGEU,
        _ => return None,
    };
    Some(funct3)
}

fn utype_opcode(op: &str) -> Option<u32> {
    let opcode = match op {
        "lui" => OP_LUI,
        "auipc" => OP_AUIPC,
        _ => return None,
    };
    Some(opcode)
}

/// One encoded instruction: the machine word plus the decoded record
/// that drives the emulator
#[derive(Debug, Clone)]
pub struct EncodedLine {
    pub word: u32,
    pub record: Instruction,
}

fn unsupported(op: &str) -> AsmError {
    AsmError::UnsupportedInstruction(op.to_string())
}

fn arity_error(op: &str, args: &[String], expected: &str) -> AsmError {
    AsmError::Parse(format!(
        "'{op}' expects {expected} operand(s), got {}: {args:?}",
        args.len()
    ))
}

fn parse_reg(token: &str) -> Result<u8, AsmError> {
    reg_index(token).map_err(|_| AsmError::InvalidRegister(token.to_string()))
}

/// Split the trailing "imm(reg)" memory-operand form. The immediate
/// part may itself be an expression (possibly with a %lo relocation).
fn split_mem_operand(arg: &str) -> Option<(&str, &str)> {
    let arg = arg.trim();
    let inner = arg.strip_suffix(')')?;
    let open = inner.rfind('(')?;
    let imm = inner[..open].trim();
    let reg = inner[open + 1..].trim();
    // %lo(sym)(reg) keeps its first parenthesis pair with the immediate
    if imm.is_empty() || reg.contains('(') {
        return None;
    }
    Some((imm, reg))
}

fn out_of_range(op: &str, value: i64, width: u32) -> AsmError {
    AsmError::ImmediateOutOfRange {
        op: op.to_string(),
        value,
        width,
    }
}

/// I/S immediates live in a 12-bit field; both the signed and the
/// unsigned reading of that field are accepted on input.
fn check_imm12(op: &str, value: i64) -> Result<(), AsmError> {
    if (-2048..=4095).contains(&value) {
        Ok(())
    } else {
        Err(out_of_range(op, value, 12))
    }
}

fn check_branch_offset(op: &str, offset: i64) -> Result<(), AsmError> {
    if offset % 2 != 0 || !(-4096..=4094).contains(&offset) {
        return Err(out_of_range(op, offset, 13));
    }
    Ok(())
}

fn check_jump_offset(op: &str, offset: i64) -> Result<(), AsmError> {
    if offset % 2 != 0 || !(-1_048_576..=1_048_574).contains(&offset) {
        return Err(out_of_range(op, offset, 21));
    }
    Ok(())
}

/// The U-type field is 20 bits; the caller supplies the already-shifted
/// value (via %hi or an explicit shift)
fn check_imm20(op: &str, value: i64) -> Result<(), AsmError> {
    if (0..1 << 20).contains(&value) {
        Ok(())
    } else {
        Err(out_of_range(op, value, 20))
    }
}

fn encode_rtype(line: &Line, addr: u32) -> Result<EncodedLine, AsmError> {
    let (funct7, funct3) = rtype_consts(&line.op).ok_or_else(|| unsupported(&line.op))?;
    let [rd, rs1, rs2] = line.args.as_slice() else {
        return Err(arity_error(&line.op, &line.args, "3"));
    };
    let rd = parse_reg(rd)?;
    let rs1 = parse_reg(rs1)?;
    let rs2 = parse_reg(rs2)?;
    let word = funct7 << 25
        | u32::from(rs2) << 20
        | u32::from(rs1) << 15
        | funct3 << 12
        | u32::from(rd) << 7
        | OP;
    let record = Instruction::reg_reg(&line.op, addr, rd, rs1, rs2);
    Ok(EncodedLine { word, record })
}

fn encode_itype(
    line: &Line,
    addr: u32,
    symbols: &HashMap<String, i64>,
) -> Result<EncodedLine, AsmError> {
    let (funct3, opcode) = itype_consts(&line.op).ok_or_else(|| unsupported(&line.op))?;
    let op = line.op.as_str();

    if op == "ecall" || op == "ebreak" {
        if !line.args.is_empty() {
            return Err(arity_error(op, &line.args, "0"));
        }
        let imm = if op == "ecall" { IMM_ECALL } else { IMM_EBREAK };
        let word = imm << 20 | funct3 << 12 | opcode;
        let record = Instruction::system(op, addr);
        return Ok(EncodedLine { word, record });
    }

    // rd, rs1, imm; loads and jalr also accept rd, imm(rs1)
    let (rd, rs1, imm_expr) = match line.args.as_slice() {
        [rd, rs1, imm] => (rd.as_str(), rs1.as_str(), imm.as_str()),
        [rd, mem] if opcode == OP_LOAD || opcode == OP_JALR => {
            let (imm, rs1) = split_mem_operand(mem).ok_or_else(|| {
                AsmError::Parse(format!("'{op}': expected imm(reg) operand, got '{mem}'"))
            })?;
            (rd.as_str(), rs1, imm)
        }
        _ => return Err(arity_error(op, &line.args, "2 or 3")),
    };
    let rd = parse_reg(rd)?;
    let rs1 = parse_reg(rs1)?;
    let value = expr::evaluate_with_relocation(imm_expr, symbols)?;

    // shifts keep only a 5-bit shamt and use bits 11:5 of the
    // immediate field to pick the shift kind
    let imm_field = if matches!(op, "slli" | "srli" | "srai") {
        let upper = if op == "srai" { FUNCT7_SRAI } else { FUNCT7_BASE };
        upper << 5 | (value as u32) & 0x1f
    } else {
        check_imm12(op, value)?;
        (value as u32) & 0xfff
    };
    let word = imm_field << 20
        | u32::from(rs1) << 15
        | funct3 << 12
        | u32::from(rd) << 7
        | opcode;
    let record = Instruction::reg_imm(op, addr, rd, rs1, value as i32);
    Ok(EncodedLine { word, record })
}

fn encode_stype(
    line: &Line,
    addr: u32,
    symbols: &HashMap<String, i64>,
) -> Result<EncodedLine, AsmError> {
    let funct3 = stype_funct3(&line.op).ok_or_else(|| unsupported(&line.op))?;
    let op = line.op.as_str();
    let (src, base, imm_expr) = match line.args.as_slice() {
        [src, rs1, imm] => (src.as_str(), rs1.as_str(), imm.as_str()),
        [src, mem] => {
            let (imm, rs1) = split_mem_operand(mem).ok_or_else(|| {
                AsmError::Parse(format!("'{op}': expected imm(reg) operand, got '{mem}'"))
            })?;
            (src.as_str(), rs1, imm)
        }
        _ => return Err(arity_error(op, &line.args, "2 or 3")),
    };
    let src = parse_reg(src)?;
    let base = parse_reg(base)?;
    let value = expr::evaluate_with_relocation(imm_expr, symbols)?;
    check_imm12(op, value)?;

    // the 12-bit offset is split around the register fields
    let imm = (value as u32) & 0xfff;
    let word = (imm >> 5) << 25
        | u32::from(src) << 20
        | u32::from(base) << 15
        | funct3 << 12
        | (imm & 0x1f) << 7
        | OP_STORE;
    let record = Instruction::store(op, addr, src, base, value as i32);
    Ok(EncodedLine { word, record })
}

fn encode_btype(
    line: &Line,
    addr: u32,
    symbols: &HashMap<String, i64>,
) -> Result<EncodedLine, AsmError> {
    let funct3 = btype_funct3(&line.op).ok_or_else(|| unsupported(&line.op))?;
    let [rs1, rs2, target] = line.args.as_slice() else {
        return Err(arity_error(&line.op, &line.args, "3"));
    };
    let rs1 = parse_reg(rs1)?;
    let rs2 = parse_reg(rs2)?;
    let target = expr::evaluate(target, symbols)?;
    let offset = target.wrapping_sub(i64::from(addr));
    check_branch_offset(&line.op, offset)?;

    // 13-bit offset scattered as imm[12|10:5] above rs2 and
    // imm[4:1|11] in the low register slot; bit 0 is implicit
    let imm = (offset as u32) & 0x1fff;
    let word = (imm >> 12) << 31
        | ((imm >> 5) & 0x3f) << 25
        | u32::from(rs2) << 20
        | u32::from(rs1) << 15
        | funct3 << 12
        | ((imm >> 1) & 0xf) << 8
        | ((imm >> 11) & 1) << 7
        | OP_BRANCH;
    let record = Instruction::branch(&line.op, addr, rs1, rs2, target as i32);
    Ok(EncodedLine { word, record })
}

fn encode_utype(
    line: &Line,
    addr: u32,
    symbols: &HashMap<String, i64>,
) -> Result<EncodedLine, AsmError> {
    let opcode = utype_opcode(&line.op).ok_or_else(|| unsupported(&line.op))?;
    let [rd, imm] = line.args.as_slice() else {
        return Err(arity_error(&line.op, &line.args, "2"));
    };
    let rd = parse_reg(rd)?;
    let value = expr::evaluate_with_relocation(imm, symbols)?;
    check_imm20(&line.op, value)?;

    let word = ((value as u32) & 0xfffff) << 12 | u32::from(rd) << 7 | opcode;
    let record = Instruction::upper(&line.op, addr, rd, value as i32);
    Ok(EncodedLine { word, record })
}

fn encode_jtype(
    line: &Line,
    addr: u32,
    symbols: &HashMap<String, i64>,
) -> Result<EncodedLine, AsmError> {
    if line.op != "jal" {
        return Err(unsupported(&line.op));
    }
    // with a single operand the link register defaults to ra
    let (rd, target) = match line.args.as_slice() {
        [target] => ("ra", target.as_str()),
        [rd, target] => (rd.as_str(), target.as_str()),
        _ => return Err(arity_error(&line.op, &line.args, "1 or 2")),
    };
    let rd = parse_reg(rd)?;
    let target = expr::evaluate(target, symbols)?;
    let offset = target.wrapping_sub(i64::from(addr));
    check_jump_offset(&line.op, offset)?;

    // 21-bit offset scattered as imm[20|10:1|11|19:12]; bit 0 is
    // implicit
    let imm = (offset as u32) & 0x1f_ffff;
    let word = (imm >> 20) << 31
        | ((imm >> 1) & 0x3ff) << 21
        | ((imm >> 11) & 1) << 20
        | ((imm >> 12) & 0xff) << 12
        | u32::from(rd) << 7
        | OP_JAL;
    let record = Instruction::upper(&line.op, addr, rd, target as i32);
    Ok(EncodedLine { word, record })
}

/// Encode one tokenized line at the given absolute address
pub fn encode_line(
    line: &Line,
    addr: u32,
    symbols: &HashMap<String, i64>,
    isa: &IsaSpec,
) -> Result<EncodedLine, AsmError> {
    let format = isa
        .format_of(&line.op)
        .ok_or_else(|| unsupported(&line.op))?;
    debug!("encoding '{}' at 0x{addr:08x} as {format}-type", line.op);
    match format {
        Format::R => encode_rtype(line, addr),
        Format::I => encode_itype(line, addr, symbols),
        Format::S => encode_stype(line, addr, symbols),
        Format::B => encode_btype(line, addr, symbols),
        Format::U => encode_utype(line, addr, symbols),
        Format::J => encode_jtype(line, addr, symbols),
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::asm::lexer::tokenize;

    fn encode(text: &str, addr: u32) -> u32 {
        let isa = IsaSpec::rv32i();
        let line = tokenize(text).unwrap();
        encode_line(&line, addr, &HashMap::new(), &isa)
            .unwrap()
            .word
    }

    fn encode_err(text: &str, addr: u32) -> AsmError {
        let isa = IsaSpec::rv32i();
        let line = tokenize(text).unwrap();
        encode_line(&line, addr, &HashMap::new(), &isa).unwrap_err()
    }

    #[test]
    fn check_rtype_encodings() {
        assert_eq!(encode("add a2, a0, a1", 0), 0x00b50633);
        assert_eq!(encode("sub a2, a0, a1", 0), 0x40b50633);
        assert_eq!(encode("and a2, a0, a1", 0), 0x00b57633);
        assert_eq!(encode("or a2, a0, a1", 0), 0x00b56633);
        assert_eq!(encode("xor a2, a0, a1", 0), 0x00b54633);
        assert_eq!(encode("sll a2, a0, a1", 0), 0x00b51633);
        assert_eq!(encode("srl a2, a0, a1", 0), 0x00b55633);
        assert_eq!(encode("sra a2, a0, a1", 0), 0x40b55633);
        assert_eq!(encode("slt a2, a0, a1", 0), 0x00b52633);
        assert_eq!(encode("sltu a2, a0, a1", 0), 0x00b53633);
    }

    #[test]
    fn check_itype_encodings() {
        assert_eq!(encode("addi x5, x0, -1", 0), 0xfff00293);
        assert_eq!(encode("addi a0, zero, 17", 0), 0x01100513);
        assert_eq!(encode("addi a0, a0, 0x678", 0), 0x67850513);
        assert_eq!(encode("andi a1, a2, 0xff0", 0), 0xff067593);
    }

    #[test]
    fn check_shift_encodings() {
        assert_eq!(encode("slli x1, x1, 2", 0), 0x00209093);
        assert_eq!(encode("srai x1, x2, 4", 0), 0x40415093);
        // shift amounts are taken modulo 32
        assert_eq!(encode("slli x1, x1, 32", 0), encode("slli x1, x1, 0", 0));
    }

    #[test]
    fn check_load_encodings() {
        assert_eq!(encode("lw a2, 0(a0)", 0), 0x00052603);
        assert_eq!(encode("lb x1, 16(x2)", 0), 0x01010083);
        // three-operand form encodes identically
        assert_eq!(encode("lw a2, a0, 0", 0), 0x00052603);
    }

    #[test]
    fn check_store_encodings() {
        assert_eq!(encode("sw a1, 0(a0)", 0), 0x00b52023);
        assert_eq!(encode("sb a1, 0(a0)", 0), 0x00b50023);
        assert_eq!(encode("sw a1, a0, 0", 0), 0x00b52023);
    }

    #[test]
    fn check_branch_encodings() {
        // backward branch by 8 bytes: target 4, branch at 12
        assert_eq!(encode("bne t0, zero, 4", 12), 0xfe029ce3);
        assert_eq!(encode("beq x1, x2, 16", 0), 0x00208863);
    }

    #[test]
    fn check_utype_encodings() {
        assert_eq!(encode("lui a0, 0x12345", 0), 0x12345537);
        assert_eq!(encode("auipc a0, 1", 0), 0x00001517);
    }

    #[test]
    fn check_jal_encodings() {
        assert_eq!(encode("jal ra, 8", 0), 0x008000ef);
        // single-operand jal links through ra
        assert_eq!(encode("jal 8", 0), 0x008000ef);
        assert_eq!(encode("jalr x0, ra, 0", 0), 0x00008067);
    }

    #[test]
    fn check_system_encodings() {
        assert_eq!(encode("ecall", 0), 0x00000073);
        assert_eq!(encode("ebreak", 0), 0x00100073);
    }

    #[test]
    fn check_label_operand() {
        let isa = IsaSpec::rv32i();
        let mut symbols = HashMap::new();
        symbols.insert("loop".to_string(), 4i64);
        let line = tokenize("bne t0, zero, loop").unwrap();
        let encoded = encode_line(&line, 12, &symbols, &isa).unwrap();
        assert_eq!(encoded.word, 0xfe029ce3);
        assert_eq!(encoded.record.imm, Some(4));
    }

    #[test]
    fn check_relocation_in_low_immediate() {
        let mut symbols = HashMap::new();
        symbols.insert("buf".to_string(), 0x12345678i64);
        let isa = IsaSpec::rv32i();
        let line = tokenize("lw a0, %lo(buf)(a1)").unwrap();
        let encoded = encode_line(&line, 0, &symbols, &isa).unwrap();
        // lw a0, 1656(a1)
        assert_eq!(encoded.word, 0x6785a503);
    }

    #[test]
    fn check_invalid_register_rejected() {
        assert!(matches!(
            encode_err("add a2, a0, q7", 0),
            AsmError::InvalidRegister(_)
        ));
    }

    #[test]
    fn check_unsupported_mnemonic_rejected() {
        assert!(matches!(
            encode_err("mul a2, a0, a1", 0),
            AsmError::UnsupportedInstruction(_)
        ));
    }

    #[test]
    fn check_immediate_out_of_range() {
        assert!(matches!(
            encode_err("addi a0, a0, 4096", 0),
            AsmError::ImmediateOutOfRange { .. }
        ));
        assert!(matches!(
            encode_err("addi a0, a0, -2049", 0),
            AsmError::ImmediateOutOfRange { .. }
        ));
        assert!(matches!(
            encode_err("lui a0, 0x100000", 0),
            AsmError::ImmediateOutOfRange { .. }
        ));
        // branch offset beyond 13 signed bits
        assert!(matches!(
            encode_err("beq x1, x2, 0x2000", 0),
            AsmError::ImmediateOutOfRange { .. }
        ));
    }

    #[test]
    fn check_store_record_shape() {
        let isa = IsaSpec::rv32i();
        let line = tokenize("sw a1, 8(a0)").unwrap();
        let encoded = encode_line(&line, 0x100, &HashMap::new(), &isa).unwrap();
        // the source register rides in the rd slot of the record
        assert_eq!(encoded.record.rd, 11);
        assert_eq!(encoded.record.rs1, 10);
        assert_eq!(encoded.record.imm, Some(8));
    }
}
