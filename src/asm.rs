//! RV32I assembler
//!
//! Pipeline: raw text -> [`preproc`] (mnemonic lines + symbol table)
//! -> [`encode`] (machine words + decoded records). The resulting
//! [`Program`] offers the output views the CLI exposes: hex lines,
//! binary strings, nibble listing, per-instruction encoding lines, and
//! the `.bin`/`.hex` file writers.

use itertools::Itertools;
use log::debug;
use thiserror::Error;

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::emu::instr::Instruction;

pub mod decode;
pub mod encode;
pub mod expr;
pub mod isa;
pub mod lexer;
pub mod opcodes;
pub mod preproc;

pub use isa::IsaSpec;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AsmError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("unknown assembly code detected: {0}")]
    UnknownAssembly(String),
    #[error("unsupported instruction '{0}'")]
    UnsupportedInstruction(String),
    #[error("invalid register: {0}")]
    InvalidRegister(String),
    #[error("immediate {value} exceeds the {width}-bit field of '{op}'")]
    ImmediateOutOfRange { op: String, value: i64, width: u32 },
    #[error("malformed number or expression {0}")]
    NumberFormat(String),
    #[error("{0}")]
    Descriptor(String),
}

/// A fully assembled program
#[derive(Debug)]
pub struct Program {
    pub base_addr: u32,
    pub mnemonics: Vec<String>,
    pub words: Vec<u32>,
    pub records: Vec<Instruction>,
    pub symbols: HashMap<String, i64>,
}

/// Output views over the encoded words
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitMode {
    Hex,
    Bin,
    Nibble,
}

/// Assemble a source text at the given base address
pub fn assemble(input: &str, base_addr: u32, isa: &IsaSpec) -> Result<Program, AsmError> {
    let unit = preproc::preprocess(input, base_addr)?;
    let mut words = Vec::with_capacity(unit.mnemonics.len());
    let mut records = Vec::with_capacity(unit.mnemonics.len());
    for (n, text) in unit.mnemonics.iter().enumerate() {
        let addr = base_addr + 4 * n as u32;
        let line = lexer::tokenize(text)?;
        let encoded = encode::encode_line(&line, addr, &unit.symbols, isa)?;
        debug!("0x{addr:08x}: {text} -> 0x{:08x}", encoded.word);
        words.push(encoded.word);
        records.push(encoded.record);
    }
    Ok(Program {
        base_addr,
        mnemonics: unit.mnemonics,
        words,
        records,
        symbols: unit.symbols,
    })
}

impl Program {
    /// Render the encoded words in the requested mode, one line per
    /// instruction
    pub fn emit(&self, mode: EmitMode) -> Vec<String> {
        match mode {
            EmitMode::Hex => self.words.iter().map(|w| format!("0x{w:08x}")).collect(),
            EmitMode::Bin => self.words.iter().map(|w| format!("{w:032b}")).collect(),
            EmitMode::Nibble => self
                .words
                .iter()
                .map(|w| {
                    let bits = format!("{w:032b}");
                    (0..32).step_by(4).map(|i| &bits[i..i + 4]).join("\t")
                })
                .collect(),
        }
    }

    /// One line per instruction in the clang-style form
    /// `asm \t# encoding: [0x..,0x..,0x..,0x..]` (little-endian bytes)
    pub fn encoding_lines(&self) -> Vec<String> {
        self.mnemonics
            .iter()
            .zip(&self.words)
            .map(|(asm, word)| {
                let bytes = word
                    .to_le_bytes()
                    .iter()
                    .map(|b| format!("0x{b:02x}"))
                    .join(",");
                format!("{asm} \t# encoding: [{bytes}]")
            })
            .collect()
    }

    /// Write the raw binary image: four little-endian bytes per word
    pub fn write_bin<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        for word in &self.words {
            out.write_all(&word.to_le_bytes())?;
        }
        out.flush()
    }

    /// Write the hex listing: one `0x%08x` line per word
    pub fn write_hex<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        for line in self.emit(EmitMode::Hex) {
            writeln!(out, "{line}")?;
        }
        out.flush()
    }

    /// Number of encoded instructions
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}
