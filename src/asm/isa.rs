//! ISA descriptor
//!
//! The encoder is driven by an external JSON document mapping each
//! instruction-format family (R, I, S, B, U, J) to the mnemonics that
//! belong to it. The per-mnemonic encoding constants themselves live in
//! [`super::opcodes`]; this descriptor only settles which bit layout a
//! mnemonic uses.

use std::collections::HashMap;
use std::fmt;

use serde::Deserialize;

use super::AsmError;

/// The six RV32I instruction-format families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum Format {
    R,
    I,
    S,
    B,
    U,
    J,
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Stock descriptor shipped with the crate
const RV32I_DESCRIPTOR: &str = include_str!("../../data/rv32i.json");

#[derive(Debug, Clone)]
pub struct IsaSpec {
    formats: HashMap<String, Format>,
}

impl IsaSpec {
    /// Build a descriptor from its JSON text
    pub fn from_json(json: &str) -> Result<Self, AsmError> {
        let families: HashMap<Format, Vec<String>> = serde_json::from_str(json)
            .map_err(|e| AsmError::Descriptor(format!("bad ISA descriptor: {e}")))?;
        let mut formats = HashMap::new();
        for (format, mnemonics) in families {
            for mnemonic in mnemonics {
                let key = mnemonic.to_ascii_lowercase();
                if formats.insert(key, format).is_some() {
                    return Err(AsmError::Descriptor(format!(
                        "mnemonic '{mnemonic}' listed in more than one format family"
                    )));
                }
            }
        }
        Ok(Self { formats })
    }

    /// The descriptor for the RV32I base integer subset
    pub fn rv32i() -> Self {
        Self::from_json(RV32I_DESCRIPTOR).expect("embedded rv32i descriptor is well-formed")
    }

    /// Look up the format family of a mnemonic
    pub fn format_of(&self, mnemonic: &str) -> Option<Format> {
        self.formats.get(mnemonic).copied()
    }

    /// Number of mnemonics the descriptor covers
    pub fn len(&self) -> usize {
        self.formats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn check_embedded_descriptor_loads() {
        let isa = IsaSpec::rv32i();
        assert_eq!(isa.format_of("add"), Some(Format::R));
        assert_eq!(isa.format_of("addi"), Some(Format::I));
        assert_eq!(isa.format_of("sw"), Some(Format::S));
        assert_eq!(isa.format_of("bne"), Some(Format::B));
        assert_eq!(isa.format_of("lui"), Some(Format::U));
        assert_eq!(isa.format_of("jal"), Some(Format::J));
        assert_eq!(isa.format_of("mul"), None);
        // 10 R + 17 I + 3 S + 6 B + 2 U + 1 J
        assert_eq!(isa.len(), 39);
    }

    #[test]
    fn check_duplicate_mnemonic_rejected() {
        let json = r#"{"R": ["add"], "I": ["add"]}"#;
        assert!(IsaSpec::from_json(json).is_err());
    }

    #[test]
    fn check_malformed_descriptor_rejected() {
        assert!(IsaSpec::from_json("not json").is_err());
        assert!(IsaSpec::from_json(r#"{"Q": ["add"]}"#).is_err());
    }
}
