//! CPU loop
//!
//! Fetch, increment, execute: every step bumps the cycle counter,
//! fetches the record at the pc, advances the pc by 4, then runs the
//! handler for the mnemonic. Handlers therefore observe the pc already
//! pointing at the next instruction. Running off the end of the image
//! is the cooperative normal exit; any execution error halts the CPU;
//! an ebreak trap is surfaced to the caller, who may attach a debugger
//! and resume.

use log::{debug, error, info};

use std::collections::HashMap;

use super::exec::{handlers, ExecFn};
use super::memory::Mmu;
use super::registers::RegisterFile;
use super::ExecutionError;

/// What one executed instruction asks the loop to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    Halt(i32),
    DebugTrap,
}

/// Why `run` returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    Halted(i32),
    DebugTrap,
}

pub struct Cpu {
    pub regs: RegisterFile,
    pub mmu: Mmu,
    pub pc: u32,
    pub cycle: u64,
    pub halted: bool,
    pub debugger_active: bool,
    pub exit_code: i32,
    pub hart_id: u32,
    instr_handlers: HashMap<&'static str, ExecFn>,
}

impl Cpu {
    pub fn new(mmu: Mmu) -> Self {
        let pc = mmu.entrypoint();
        Self {
            regs: RegisterFile::new(),
            mmu,
            pc,
            cycle: 0,
            halted: false,
            debugger_active: false,
            exit_code: 0,
            hart_id: 0,
            instr_handlers: handlers(),
        }
    }

    /// Execute a single instruction, then return
    pub fn step(&mut self) -> Result<StepOutcome, ExecutionError> {
        self.cycle += 1;

        if self.pc == self.mmu.end_addr() {
            // ran off the end of the image: normal program exit
            return Ok(StepOutcome::Halt(self.exit_code));
        }

        let ins = self.mmu.read_ins(self.pc)?.clone();
        debug!("0x{:08x}: {ins}", self.pc);

        self.pc = self.pc.wrapping_add(4);

        let ExecFn(handler) = self
            .instr_handlers
            .get(ins.name.as_str())
            .copied()
            .ok_or_else(|| ExecutionError::UnsupportedInstruction(ins.name.clone()))?;
        handler(self, &ins)
    }

    /// Run until the program halts or traps into the debugger.
    /// Execution errors are logged and halt the CPU.
    pub fn run(&mut self) -> RunExit {
        while !self.halted {
            match self.step() {
                Ok(StepOutcome::Continue) => {}
                Ok(StepOutcome::Halt(code)) => {
                    self.exit_code = code;
                    self.halted = true;
                }
                Ok(StepOutcome::DebugTrap) => return RunExit::DebugTrap,
                Err(e) => {
                    error!("{e}");
                    error!("halting due to exception at cycle {}", self.cycle);
                    self.exit_code = -1;
                    self.halted = true;
                }
            }
        }
        debug!("program exited with code {}", self.exit_code);
        RunExit::Halted(self.exit_code)
    }

    /// Start executing from the entrypoint
    pub fn launch(&mut self) -> RunExit {
        self.regs.set_by_name("a0", self.hart_id as i32)
            .expect("a0 is a valid register name");
        self.pc = self.mmu.entrypoint();
        info!("started running from 0x{:08x}", self.pc);
        self.run()
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::asm::{assemble, IsaSpec};
    use crate::emu::instr::Instruction;

    fn cpu_for(src: &str) -> Cpu {
        let program = assemble(src, 0x80100, &IsaSpec::rv32i()).unwrap();
        let mut mmu = Mmu::new(0x80100);
        mmu.load_program(program.records);
        Cpu::new(mmu)
    }

    #[test]
    fn check_cycle_counts_fetches() {
        let mut cpu = cpu_for("nop\nnop\n");
        cpu.run();
        // two instructions plus the end-of-image check
        assert_eq!(cpu.cycle, 3);
    }

    #[test]
    fn check_backward_branch_loop() {
        let mut cpu = cpu_for(
            "addi t0, zero, 3\n\
             loop: addi t1, t1, 1\n\
             addi t0, t0, -1\n\
             bnez t0, loop\n",
        );
        assert_eq!(cpu.run(), RunExit::Halted(0));
        assert_eq!(cpu.regs.get_by_name("t1").unwrap(), 3);
        assert_eq!(cpu.regs.get_by_name("t0").unwrap(), 0);
    }

    #[test]
    fn check_debug_trap_surfaces_and_resumes() {
        let mut cpu = cpu_for(
            "addi a0, zero, 1\n\
             ebreak\n\
             addi a0, a0, 1\n",
        );
        assert_eq!(cpu.run(), RunExit::DebugTrap);
        assert_eq!(cpu.regs.get_by_name("a0").unwrap(), 1);
        assert!(!cpu.halted);
        // resuming continues past the trap
        assert_eq!(cpu.run(), RunExit::Halted(0));
        assert_eq!(cpu.regs.get_by_name("a0").unwrap(), 2);
    }

    #[test]
    fn check_bad_fetch_halts_with_error() {
        let mut mmu = Mmu::new(0x80100);
        // jump far outside the image
        mmu.load_program(vec![Instruction::upper("jal", 0x80100, 0, 0x90000)]);
        let mut cpu = Cpu::new(mmu);
        assert_eq!(cpu.run(), RunExit::Halted(-1));
        assert!(cpu.halted);
    }

    #[test]
    fn check_host_can_halt_between_steps() {
        let mut cpu = cpu_for("loop: j loop\n");
        for _ in 0..10 {
            cpu.step().unwrap();
        }
        cpu.halted = true;
        assert_eq!(cpu.run(), RunExit::Halted(0));
    }

    #[test]
    fn check_launch_seeds_hart_id() {
        let mut cpu = cpu_for("mv a1, a0\n");
        cpu.hart_id = 0;
        cpu.launch();
        assert_eq!(cpu.regs.get_by_name("a1").unwrap(), 0);
    }
}
