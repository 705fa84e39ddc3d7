//! Line tokenizer
//!
//! Splits one logical (preprocessed) line into its mnemonic and
//! comma-separated operand list. The assembler is case-insensitive, so
//! every token comes out lowercased.

use super::AsmError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub op: String,
    pub args: Vec<String>,
}

/// Tokenize a single instruction line
pub fn tokenize(line: &str) -> Result<Line, AsmError> {
    let line = line.trim();
    let (op, rest) = match line.split_once(char::is_whitespace) {
        Some((op, rest)) => (op, rest.trim()),
        None => (line, ""),
    };
    if op.is_empty() {
        return Err(AsmError::Parse(format!("empty instruction line: '{line}'")));
    }
    let args = if rest.is_empty() {
        Vec::new()
    } else {
        rest.split(',')
            .map(|arg| arg.trim().to_ascii_lowercase())
            .filter(|arg| !arg.is_empty())
            .collect()
    };
    Ok(Line {
        op: op.to_ascii_lowercase(),
        args,
    })
}
