//! Source preprocessor
//!
//! Reduces raw assembly text to the sequence of translatable lines the
//! encoder consumes, while collecting the symbol table and the macro
//! dictionary. Per line, in order: comment stripping, macro body
//! accumulation, directive handling, label extraction, macro expansion
//! and pseudo-instruction expansion. Expanded lines re-enter the same
//! pipeline, so macro bodies may use directives, labels, other macros
//! and pseudos.
//!
//! Pseudo-instructions are lowered here rather than at encode time so
//! that the translatable-line count — and with it every label address —
//! reflects the real number of emitted instructions (`li` with a wide
//! immediate becomes two).

use log::{debug, info};

use std::collections::HashMap;

use super::expr;
use super::AsmError;

/// Depth bound for macro-in-macro and pseudo expansion
const MAX_EXPANSION_DEPTH: u32 = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Macro {
    pub params: Vec<String>,
    pub body: Vec<String>,
}

/// Preprocessed source: translatable lines with back-references to the
/// original source, plus the symbol and macro tables
#[derive(Debug, Default)]
pub struct SourceUnit {
    pub base_addr: u32,
    pub mnemonics: Vec<String>,
    pub line_indices: Vec<usize>,
    pub symbols: HashMap<String, i64>,
    pub macros: HashMap<String, Macro>,
}

struct Preprocessor {
    unit: SourceUnit,
    in_macro: Option<(String, Macro)>,
    current_line: usize,
}

fn strip_comment(line: &str) -> &str {
    match line.find(['#', ';']) {
        Some(pos) => &line[..pos],
        None => line,
    }
    .trim()
}

fn is_label_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Split a leading "name:" label off the line
fn split_label(line: &str) -> Option<(&str, &str)> {
    let colon = line.find(':')?;
    let name = &line[..colon];
    if name.is_empty() || !name.chars().all(is_label_char) {
        return None;
    }
    Some((name, line[colon + 1..].trim_start()))
}

/// The mnemonic shape accepted for translatable lines:
/// letters, optionally followed by a dotted alphanumeric suffix
fn is_translatable(line: &str) -> bool {
    let mnemonic = line.split_whitespace().next().unwrap_or("");
    let (head, tail) = match mnemonic.split_once('.') {
        Some((head, tail)) => (head, Some(tail)),
        None => (mnemonic, None),
    };
    if head.is_empty() || !head.chars().all(|c| c.is_ascii_alphabetic()) {
        return false;
    }
    match tail {
        Some(tail) => !tail.is_empty() && tail.chars().all(|c| c.is_ascii_alphanumeric()),
        None => true,
    }
}

/// First whitespace-delimited token, lowercased, plus the remainder
fn leading_token(line: &str) -> (String, &str) {
    match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head.to_ascii_lowercase(), rest.trim()),
        None => (line.to_ascii_lowercase(), ""),
    }
}

/// Comma-separated operands with surrounding whitespace removed
fn split_args(rest: &str) -> Vec<String> {
    rest.split(',')
        .map(|arg| arg.trim().to_string())
        .filter(|arg| !arg.is_empty())
        .collect()
}

impl Preprocessor {
    fn new(base_addr: u32) -> Self {
        Self {
            unit: SourceUnit {
                base_addr,
                ..Default::default()
            },
            in_macro: None,
            current_line: 0,
        }
    }

    /// Address the next translatable line will be placed at
    fn next_addr(&self) -> u32 {
        self.unit.base_addr + 4 * self.unit.mnemonics.len() as u32
    }

    fn define_symbol(&mut self, name: &str, value: i64) -> Result<(), AsmError> {
        let key = name.to_ascii_lowercase();
        if self.unit.symbols.insert(key, value).is_some() {
            return Err(AsmError::Parse(format!(
                "symbol '{name}' defined more than once (line {})",
                self.current_line + 1
            )));
        }
        Ok(())
    }

    fn handle_directive(&mut self, line: &str) -> Result<(), AsmError> {
        let (directive, rest) = leading_token(line);
        match directive.as_str() {
            ".equ" => {
                let args = split_args(rest);
                let [name, value_expr] = args.as_slice() else {
                    return Err(AsmError::Parse(format!(
                        ".equ requires exactly two arguments, got {}: {args:?}",
                        args.len()
                    )));
                };
                let value = expr::evaluate(value_expr, &self.unit.symbols)?;
                self.define_symbol(name, value)?;
                info!("defined {} as {value}", name.to_ascii_lowercase());
            }
            ".endm" => {
                return Err(AsmError::Parse(
                    ".endm outside of a macro definition".to_string(),
                ));
            }
            _ => {
                debug!("ignoring unknown directive: {line}");
            }
        }
        Ok(())
    }

    fn begin_macro(&mut self, rest: &str) -> Result<(), AsmError> {
        let mut words = rest.split_whitespace();
        let name = words
            .next()
            .ok_or_else(|| AsmError::Parse(".macro requires a name".to_string()))?
            .to_ascii_lowercase();
        let params = words
            .flat_map(|w| w.split(','))
            .map(|w| w.trim().to_ascii_lowercase())
            .filter(|w| !w.is_empty())
            .collect();
        self.in_macro = Some((
            name,
            Macro {
                params,
                body: Vec::new(),
            },
        ));
        Ok(())
    }

    fn expand_macro(&self, mac: &Macro, args: &[String]) -> Vec<String> {
        mac.body
            .iter()
            .map(|body_line| {
                let mut expanded = body_line.clone();
                for (param, arg) in mac.params.iter().zip(args) {
                    expanded = expanded.replace(&format!("\\{param}"), arg);
                }
                expanded
            })
            .collect()
    }

    /// Lower a pseudo-instruction to base RV32I, or return None if the
    /// mnemonic is not a pseudo
    fn expand_pseudo(&self, op: &str, args: &[String]) -> Result<Option<Vec<String>>, AsmError> {
        let wrong_arity = |expected: &str| {
            AsmError::Parse(format!(
                "'{op}' expects {expected} operand(s), got {}: {args:?}",
                args.len()
            ))
        };
        let lines = match op {
            "nop" => {
                if !args.is_empty() {
                    return Err(wrong_arity("0"));
                }
                vec!["addi x0, x0, 0".to_string()]
            }
            "mv" => {
                let [rd, rs] = args else {
                    return Err(wrong_arity("2"));
                };
                vec![format!("addi {rd}, {rs}, 0")]
            }
            "li" | "la" => {
                let [rd, imm] = args else {
                    return Err(wrong_arity("2"));
                };
                let value = expr::evaluate(imm, &self.unit.symbols)?;
                self.expand_load_immediate(rd, value)
            }
            "j" => {
                let [target] = args else {
                    return Err(wrong_arity("1"));
                };
                vec![format!("jal x0, {target}")]
            }
            "jr" => {
                let [rs] = args else {
                    return Err(wrong_arity("1"));
                };
                vec![format!("jalr x0, {rs}, 0")]
            }
            "ret" => {
                if !args.is_empty() {
                    return Err(wrong_arity("0"));
                }
                vec!["jalr x0, ra, 0".to_string()]
            }
            "beqz" | "bnez" => {
                let [rs, target] = args else {
                    return Err(wrong_arity("2"));
                };
                let branch = &op[..3];
                vec![format!("{branch} {rs}, x0, {target}")]
            }
            "sbreak" => {
                if !args.is_empty() {
                    return Err(wrong_arity("0"));
                }
                vec!["ebreak".to_string()]
            }
            _ => return Ok(None),
        };
        Ok(Some(lines))
    }

    /// li with a value outside the signed 12-bit range becomes the
    /// lui+addi pair; the upper part is corrected for the sign
    /// extension the low addi will apply.
    fn expand_load_immediate(&self, rd: &str, value: i64) -> Vec<String> {
        let value = value as i32;
        if (-2048..=2047).contains(&value) {
            return vec![format!("addi {rd}, x0, {value}")];
        }
        let low = value & 0xfff;
        let low = if low >= 0x800 { low - 0x1000 } else { low };
        let high = (value.wrapping_sub(low) as u32) >> 12;
        let mut lines = vec![format!("lui {rd}, 0x{high:x}")];
        if low != 0 {
            lines.push(format!("addi {rd}, {rd}, {low}"));
        }
        lines
    }

    fn process_line(&mut self, line: &str, depth: u32) -> Result<(), AsmError> {
        if depth > MAX_EXPANSION_DEPTH {
            return Err(AsmError::Parse(format!(
                "macro expansion nested deeper than {MAX_EXPANSION_DEPTH} levels"
            )));
        }
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }

        // Directives (macro definitions are handled by the caller)
        if line.starts_with('.') {
            return self.handle_directive(line);
        }

        // Labels address the next translatable instruction
        if let Some((label, rest)) = split_label(line) {
            let addr = i64::from(self.next_addr());
            self.define_symbol(label, addr)?;
            debug!("label '{label}' at 0x{addr:08x}");
            return self.process_line(rest, depth);
        }

        let (op, rest) = leading_token(line);

        if let Some(mac) = self.unit.macros.get(&op).cloned() {
            let args = split_args(rest);
            for expanded in self.expand_macro(&mac, &args) {
                self.process_line(&expanded, depth + 1)?;
            }
            return Ok(());
        }

        if let Some(lowered) = self.expand_pseudo(&op, &split_args(rest))? {
            for replacement in lowered {
                self.process_line(&replacement, depth + 1)?;
            }
            return Ok(());
        }

        if !is_translatable(line) {
            return Err(AsmError::UnknownAssembly(line.to_string()));
        }

        let normalized = line.split_whitespace().collect::<Vec<_>>().join(" ");
        self.unit.line_indices.push(self.current_line);
        self.unit.mnemonics.push(normalized);
        Ok(())
    }

    fn run(mut self, input: &str) -> Result<SourceUnit, AsmError> {
        for (idx, raw_line) in input.lines().enumerate() {
            self.current_line = idx;
            let line = strip_comment(raw_line);
            if line.is_empty() {
                continue;
            }

            // Macro bodies accumulate verbatim until .endm
            if let Some((name, mac)) = self.in_macro.as_mut() {
                if line.starts_with(".endm") {
                    let (name, mac) = (name.clone(), mac.clone());
                    if self.unit.macros.insert(name.clone(), mac).is_some() {
                        return Err(AsmError::Parse(format!(
                            "macro '{name}' defined more than once"
                        )));
                    }
                    self.in_macro = None;
                } else if line.starts_with(".macro") {
                    return Err(AsmError::Parse(
                        "nested macro definitions are not supported".to_string(),
                    ));
                } else {
                    mac.body.push(line.to_string());
                }
                continue;
            }
            if let Some(rest) = line.strip_prefix(".macro") {
                if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                    self.begin_macro(rest)?;
                    continue;
                }
            }

            self.process_line(line, 0)?;
        }

        if let Some((name, _)) = &self.in_macro {
            return Err(AsmError::Parse(format!(
                "macro '{name}' is missing its .endm"
            )));
        }

        debug!(
            "preprocess completed with {} assembly instructions in total",
            self.unit.mnemonics.len()
        );
        Ok(self.unit)
    }
}

/// Preprocess an assembly source into its translatable lines, symbol
/// table and macro dictionary
pub fn preprocess(input: &str, base_addr: u32) -> Result<SourceUnit, AsmError> {
    Preprocessor::new(base_addr).run(input)
}
