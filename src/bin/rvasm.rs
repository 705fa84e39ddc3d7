use clap::Parser;
use clap_num::maybe_hex;
use log::{error, info, LevelFilter};

use std::io::{IsTerminal, Read};
use std::path::PathBuf;
use std::process;

use rvasm::asm::{assemble, EmitMode, IsaSpec, Program};
use rvasm::emu::cpu::{Cpu, RunExit};
use rvasm::emu::debug::launch_debug_session;
use rvasm::emu::memory::Mmu;

/// Assemble and emulate RV32I programs
#[derive(Parser, Debug)]
#[command(author, version, about, long_about)]
struct Args {
    /// Input file (.s) to be assembled; falls back to piped stdin
    #[arg(short = 's', long = "assemble", value_name = "FILE")]
    assemble: Option<PathBuf>,

    /// Base address to assemble the code upon (use 0x prefix for
    /// hexadecimal)
    #[arg(short, long, default_value = "0x80100", value_parser = maybe_hex::<u32>)]
    base: u32,

    /// Print one encoding line per instruction
    #[arg(long)]
    show_encoding: bool,

    /// Write raw binary machine code (default file is <src>.bin)
    #[arg(long, value_name = "FILE", num_args = 0..=1, default_missing_value = "")]
    bin: Option<PathBuf>,

    /// Write machine code as hex lines (default file is <src>.hex)
    #[arg(long, value_name = "FILE", num_args = 0..=1, default_missing_value = "")]
    hex: Option<PathBuf>,

    /// Launch the emulator from the entrypoint after assembly
    #[arg(long)]
    emu: bool,

    /// Enable verbose output mode
    #[arg(short, long)]
    verbose: bool,

    /// Enable quiet output mode
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

fn init_logging(args: &Args) {
    let level = if args.verbose {
        LevelFilter::Debug
    } else if args.quiet {
        LevelFilter::Error
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp_secs()
        .init();
}

fn read_source(args: &Args) -> Option<String> {
    if let Some(path) = &args.assemble {
        info!("assembling: {}", path.display());
        match std::fs::read_to_string(path) {
            Ok(text) => return Some(text),
            Err(e) => {
                error!("cannot read {}: {e}", path.display());
                return None;
            }
        }
    }
    // example usage: echo "add x0, x1, x2" | rvasm -v
    let mut stdin = std::io::stdin();
    if stdin.is_terminal() {
        error!("a source file (-s) or piped stdin must be provided");
        return None;
    }
    info!("reading assembly instructions from standard input");
    let mut text = String::new();
    match stdin.read_to_string(&mut text) {
        Ok(_) => Some(text),
        Err(e) => {
            error!("cannot read stdin: {e}");
            None
        }
    }
}

/// Resolve an output path: an empty value means "derive from the
/// source file name with the given extension"
fn output_path(requested: &std::path::Path, args: &Args, extension: &str) -> PathBuf {
    if !requested.as_os_str().is_empty() {
        return requested.to_path_buf();
    }
    match &args.assemble {
        Some(src) => src.with_extension(extension),
        None => PathBuf::from("out").with_extension(extension),
    }
}

fn emit_outputs(program: &Program, args: &Args) -> std::io::Result<()> {
    if args.show_encoding {
        for line in program.encoding_lines() {
            println!("{line}");
        }
    }
    if let Some(requested) = &args.bin {
        let path = output_path(requested, args, "bin");
        info!("writing binary output into {}", path.display());
        program.write_bin(&path)?;
    }
    if let Some(requested) = &args.hex {
        let path = output_path(requested, args, "hex");
        info!("writing hex output into {}", path.display());
        program.write_hex(&path)?;
    }
    Ok(())
}

fn emulate(program: Program, base: u32) -> i32 {
    let mut mmu = Mmu::new(base);
    mmu.load_program(program.records);
    let mut cpu = Cpu::new(mmu);

    let mut exit = cpu.launch();
    while exit == RunExit::DebugTrap {
        launch_debug_session(&mut cpu);
        if cpu.halted {
            break;
        }
        exit = cpu.run();
    }
    cpu.exit_code
}

fn main() {
    let args = Args::parse();
    init_logging(&args);

    let Some(source) = read_source(&args) else {
        process::exit(-1);
    };

    let isa = IsaSpec::rv32i();
    let program = match assemble(&source, args.base, &isa) {
        Ok(program) => program,
        Err(e) => {
            error!("{e}");
            process::exit(-1);
        }
    };
    info!(
        "assembled {} instructions at base 0x{:08x}",
        program.len(),
        program.base_addr
    );

    if !args.show_encoding && args.bin.is_none() && args.hex.is_none() && !args.emu {
        // nothing else requested: print the hex listing
        for line in program.emit(EmitMode::Hex) {
            println!("{line}");
        }
        return;
    }

    if let Err(e) = emit_outputs(&program, &args) {
        error!("cannot write output: {e}");
        process::exit(-1);
    }

    if args.emu {
        let code = emulate(program, args.base);
        process::exit(code);
    }
}
