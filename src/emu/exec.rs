//! Instruction semantics
//!
//! One handler per mnemonic, collected into the dispatch table the CPU
//! consults each cycle. Handlers run after the program counter has
//! been incremented past the instruction, so control-flow handlers
//! subtract 4 when applying a pc-relative offset.

use log::info;

use std::collections::HashMap;

use crate::utils::{interpret_i32_as_unsigned, interpret_u32_as_signed, sign_extend};

use super::cpu::{Cpu, StepOutcome};
use super::instr::Instruction;
use super::memory::Wordsize;
use super::ExecutionError;

/// Syscall number of the exit call recognised by the ecall handler
const SYSCALL_EXIT: u32 = 93;

#[derive(Debug, Clone, Copy)]
pub struct ExecFn(pub fn(&mut Cpu, &Instruction) -> Result<StepOutcome, ExecutionError>);

type ExecResult = Result<StepOutcome, ExecutionError>;

/// Execute a register-register operation
///
/// Compute an operation determined by the mnemonic between the
/// registers rs1 and rs2. Place the result in rd.
fn execute_reg_reg(cpu: &mut Cpu, ins: &Instruction) -> ExecResult {
    let src1 = cpu.regs.get(ins.rs1);
    let src2 = cpu.regs.get(ins.rs2);
    let value = match ins.name.as_str() {
        "add" => src1.wrapping_add(src2),
        "sub" => src1.wrapping_sub(src2),
        "slt" => i32::from(src1 < src2),
        "sltu" => i32::from(
            interpret_i32_as_unsigned(src1) < interpret_i32_as_unsigned(src2),
        ),
        "and" => src1 & src2,
        "or" => src1 | src2,
        "xor" => src1 ^ src2,
        "sll" => src1.wrapping_shl((src2 & 0x1f) as u32),
        "srl" => interpret_u32_as_signed(
            interpret_i32_as_unsigned(src1).wrapping_shr((src2 & 0x1f) as u32),
        ),
        "sra" => src1.wrapping_shr((src2 & 0x1f) as u32),
        other => return Err(ExecutionError::UnsupportedInstruction(other.to_string())),
    };
    cpu.regs.set(ins.rd, value);
    Ok(StepOutcome::Continue)
}

/// Execute a register-immediate operation
///
/// Same operations as the register-register form, with the literal
/// value of the immediate as the second operand. Shift amounts are
/// masked to the low 5 bits.
fn execute_reg_imm(cpu: &mut Cpu, ins: &Instruction) -> ExecResult {
    let src = cpu.regs.get(ins.rs1);
    let imm = ins.get_imm()?.abs_value;
    let value = match ins.name.as_str() {
        "addi" => src.wrapping_add(imm),
        "slti" => i32::from(src < imm),
        "sltiu" => i32::from(
            interpret_i32_as_unsigned(src) < interpret_i32_as_unsigned(imm),
        ),
        "andi" => src & imm,
        "ori" => src | imm,
        "xori" => src ^ imm,
        "slli" => src.wrapping_shl((imm & 0x1f) as u32),
        "srli" => interpret_u32_as_signed(
            interpret_i32_as_unsigned(src).wrapping_shr((imm & 0x1f) as u32),
        ),
        "srai" => src.wrapping_shr((imm & 0x1f) as u32),
        other => return Err(ExecutionError::UnsupportedInstruction(other.to_string())),
    };
    cpu.regs.set(ins.rd, value);
    Ok(StepOutcome::Continue)
}

/// Execute a load
///
/// The effective address is rs1 plus the literal immediate. lb/lh
/// sign-extend the loaded byte/halfword, lbu/lhu zero-extend, lw is
/// full width.
fn execute_load(cpu: &mut Cpu, ins: &Instruction) -> ExecResult {
    let base = interpret_i32_as_unsigned(cpu.regs.get(ins.rs1));
    let addr = base.wrapping_add(interpret_i32_as_unsigned(ins.get_imm()?.abs_value));
    let value = match ins.name.as_str() {
        "lb" => sign_extend(cpu.mmu.read(addr, Wordsize::Byte), 7),
        "lh" => sign_extend(cpu.mmu.read(addr, Wordsize::Halfword), 15),
        "lw" => cpu.mmu.read(addr, Wordsize::Word),
        "lbu" => cpu.mmu.read(addr, Wordsize::Byte),
        "lhu" => cpu.mmu.read(addr, Wordsize::Halfword),
        other => return Err(ExecutionError::UnsupportedInstruction(other.to_string())),
    };
    cpu.regs.set(ins.rd, interpret_u32_as_signed(value));
    Ok(StepOutcome::Continue)
}

/// Execute a store
///
/// Write the low 1/2/4 bytes of the source register (held in the rd
/// slot of the record) to rs1 plus the literal immediate.
fn execute_store(cpu: &mut Cpu, ins: &Instruction) -> ExecResult {
    let base = interpret_i32_as_unsigned(cpu.regs.get(ins.rs1));
    let addr = base.wrapping_add(interpret_i32_as_unsigned(ins.get_imm()?.abs_value));
    let value = interpret_i32_as_unsigned(cpu.regs.get(ins.rd));
    let size = match ins.name.as_str() {
        "sb" => Wordsize::Byte,
        "sh" => Wordsize::Halfword,
        "sw" => Wordsize::Word,
        other => return Err(ExecutionError::UnsupportedInstruction(other.to_string())),
    };
    cpu.mmu.write(addr, value, size);
    Ok(StepOutcome::Continue)
}

/// Execute a conditional branch
///
/// Compare rs1 and rs2; on taken, move the pc by the pc-relative
/// reading of the immediate (minus 4 to undo the fetch increment).
fn execute_branch(cpu: &mut Cpu, ins: &Instruction) -> ExecResult {
    let src1 = cpu.regs.get(ins.rs1);
    let src2 = cpu.regs.get(ins.rs2);
    let taken = match ins.name.as_str() {
        "beq" => src1 == src2,
        "bne" => src1 != src2,
        "blt" => src1 < src2,
        "bge" => src1 >= src2,
        "bltu" => interpret_i32_as_unsigned(src1) < interpret_i32_as_unsigned(src2),
        "bgeu" => interpret_i32_as_unsigned(src1) >= interpret_i32_as_unsigned(src2),
        other => return Err(ExecutionError::UnsupportedInstruction(other.to_string())),
    };
    if taken {
        let offset = interpret_i32_as_unsigned(ins.get_imm()?.pcrel_value);
        cpu.pc = cpu.pc.wrapping_add(offset).wrapping_sub(4);
    }
    Ok(StepOutcome::Continue)
}

/// Load upper immediate: rd = imm << 12
fn execute_lui(cpu: &mut Cpu, ins: &Instruction) -> ExecResult {
    let value = ins.get_imm()?.abs_value.wrapping_shl(12);
    cpu.regs.set(ins.rd, value);
    Ok(StepOutcome::Continue)
}

/// Add upper immediate to pc: rd = pc + (imm << 12)
fn execute_auipc(cpu: &mut Cpu, ins: &Instruction) -> ExecResult {
    let value = cpu
        .pc
        .wrapping_add(interpret_i32_as_unsigned(ins.get_imm()?.abs_value.wrapping_shl(12)));
    cpu.regs.set(ins.rd, interpret_u32_as_signed(value));
    Ok(StepOutcome::Continue)
}

/// Jump and link: rd = address of the next instruction, then move the
/// pc by the pc-relative reading of the immediate
fn execute_jal(cpu: &mut Cpu, ins: &Instruction) -> ExecResult {
    cpu.regs.set(ins.rd, interpret_u32_as_signed(cpu.pc));
    let offset = interpret_i32_as_unsigned(ins.get_imm()?.pcrel_value);
    cpu.pc = cpu.pc.wrapping_add(offset).wrapping_sub(4);
    Ok(StepOutcome::Continue)
}

/// Jump and link register: rd = address of the next instruction,
/// pc = (rs1 + imm) with bit 0 cleared
fn execute_jalr(cpu: &mut Cpu, ins: &Instruction) -> ExecResult {
    let base = interpret_i32_as_unsigned(cpu.regs.get(ins.rs1));
    let target = base.wrapping_add(interpret_i32_as_unsigned(ins.get_imm()?.abs_value));
    cpu.regs.set(ins.rd, interpret_u32_as_signed(cpu.pc));
    cpu.pc = target & !1;
    Ok(StepOutcome::Continue)
}

/// ebreak traps to the debugger
fn execute_ebreak(_cpu: &mut Cpu, ins: &Instruction) -> ExecResult {
    info!("debug instruction encountered at 0x{:08x}", ins.addr);
    Ok(StepOutcome::DebugTrap)
}

/// ecall implements the exit convention only: a7 == 93 halts with the
/// exit code in a0
fn execute_ecall(cpu: &mut Cpu, _ins: &Instruction) -> ExecResult {
    let number = interpret_i32_as_unsigned(cpu.regs.get(17));
    if number == SYSCALL_EXIT {
        Ok(StepOutcome::Halt(cpu.regs.get(10)))
    } else {
        Err(ExecutionError::UnsupportedSyscall(number))
    }
}

/// Build the mnemonic -> handler table
pub fn handlers() -> HashMap<&'static str, ExecFn> {
    let mut table: HashMap<&'static str, ExecFn> = HashMap::new();
    for op in ["add", "sub", "slt", "sltu", "and", "or", "xor", "sll", "srl", "sra"] {
        table.insert(op, ExecFn(execute_reg_reg));
    }
    for op in [
        "addi", "slti", "sltiu", "andi", "ori", "xori", "slli", "srli", "srai",
    ] {
        table.insert(op, ExecFn(execute_reg_imm));
    }
    for op in ["lb", "lh", "lw", "lbu", "lhu"] {
        table.insert(op, ExecFn(execute_load));
    }
    for op in ["sb", "sh", "sw"] {
        table.insert(op, ExecFn(execute_store));
    }
    for op in ["beq", "bne", "blt", "bge", "bltu", "bgeu"] {
        table.insert(op, ExecFn(execute_branch));
    }
    table.insert("lui", ExecFn(execute_lui));
    table.insert("auipc", ExecFn(execute_auipc));
    table.insert("jal", ExecFn(execute_jal));
    table.insert("jalr", ExecFn(execute_jalr));
    table.insert("ebreak", ExecFn(execute_ebreak));
    table.insert("ecall", ExecFn(execute_ecall));
    table
}
