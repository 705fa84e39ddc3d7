//! Interactive debugger
//!
//! A small REPL entered when the program hits an ebreak. The CPU is
//! paused while the prompt is live; `continue` resumes the loop and
//! comes back here on the next trap.
//!
//! Commands:
//!   regs            dump the register file
//!   reg NAME        print one register
//!   mem ADDR [N]    print N data words starting at ADDR (default 1)
//!   list            print the instruction at the pc and its neighbours
//!   step            execute one instruction
//!   continue        resume execution
//!   quit            halt the program and leave the debugger
//!
//! Addresses accept a 0x prefix for hexadecimal.

use clap_num::maybe_hex;
use log::info;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::utils::interpret_i32_as_unsigned;

use super::cpu::{Cpu, RunExit, StepOutcome};
use super::memory::Wordsize;

const HIST_FILE: &str = ".rvasm_history";

fn history_path() -> Option<std::path::PathBuf> {
    std::env::var_os("HOME").map(|home| std::path::PathBuf::from(home).join(HIST_FILE))
}

fn print_memory(cpu: &Cpu, base: u32, count: u32) {
    for n in 0..count {
        let addr = base.wrapping_add(4 * n);
        let word = cpu.mmu.read(addr, Wordsize::Word);
        println!("0x{addr:08x}: 0x{word:08x}");
    }
}

fn print_listing(cpu: &Cpu) {
    for ins in cpu.mmu.instructions() {
        if ins.addr.abs_diff(cpu.pc) <= 8 {
            let marker = if ins.addr == cpu.pc { "->" } else { "  " };
            println!("{marker} 0x{:08x}: {ins}", ins.addr);
        }
    }
}

fn print_register(cpu: &mut Cpu, name: &str) {
    match cpu.regs.get_by_name(name) {
        Ok(value) => println!("{name} = 0x{:08x}", interpret_i32_as_unsigned(value)),
        Err(e) => println!("{e}"),
    }
}

/// Run one command line; returns false when the session should end
fn run_command(cpu: &mut Cpu, line: &str) -> bool {
    let words: Vec<&str> = line.split_whitespace().collect();
    match words.as_slice() {
        [] => {}
        ["regs"] => println!("{}", cpu.regs.dump()),
        ["reg", name] => print_register(cpu, name),
        ["mem", addr] | ["mem", addr, _] => {
            let count = match words.get(2) {
                Some(n) => match n.parse::<u32>() {
                    Ok(n) => n,
                    Err(_) => {
                        println!("bad word count: {n}");
                        return true;
                    }
                },
                None => 1,
            };
            match maybe_hex::<u32>(addr) {
                Ok(addr) => print_memory(cpu, addr, count),
                Err(e) => println!("bad address '{addr}': {e}"),
            }
        }
        ["list"] => print_listing(cpu),
        ["step" | "s"] => match cpu.step() {
            Ok(StepOutcome::Continue) => print_listing(cpu),
            Ok(StepOutcome::Halt(code)) => {
                cpu.halted = true;
                cpu.exit_code = code;
                println!("program exited with code {code}");
                return false;
            }
            Ok(StepOutcome::DebugTrap) => println!("hit ebreak"),
            Err(e) => {
                println!("{e}");
                cpu.halted = true;
                return false;
            }
        },
        ["continue" | "c"] => match cpu.run() {
            RunExit::DebugTrap => println!("hit ebreak, returning to debugger"),
            RunExit::Halted(code) => {
                println!("program exited with code {code}");
                return false;
            }
        },
        ["quit" | "exit" | "q"] => {
            cpu.halted = true;
            return false;
        }
        other => println!("unknown command: {}", other.join(" ")),
    }
    true
}

/// Enter the debugger REPL. Returns once the user quits, the program
/// halts, or input is exhausted.
pub fn launch_debug_session(cpu: &mut Cpu) {
    if cpu.debugger_active {
        return;
    }
    cpu.debugger_active = true;
    info!("debugger launch requested");

    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            info!("cannot start debugger ({e}), halting");
            cpu.halted = true;
            cpu.debugger_active = false;
            return;
        }
    };
    let history = history_path();
    if let Some(path) = &history {
        let _ = editor.load_history(path);
    }

    loop {
        match editor.readline("(rvasm) ") {
            Ok(line) => {
                let _ = editor.add_history_entry(line.as_str());
                if !run_command(cpu, &line) {
                    break;
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                cpu.halted = true;
                break;
            }
            Err(e) => {
                info!("debugger input error: {e}");
                cpu.halted = true;
                break;
            }
        }
    }

    if let Some(path) = &history {
        let _ = editor.save_history(path);
    }
    cpu.debugger_active = false;
}
