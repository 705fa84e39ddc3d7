//! Assembler-level property checks: image shape, symbol addressing,
//! preprocessing idempotence, and the encode/decode round trip.

use std::collections::HashMap;

use rvasm::asm::isa::Format;
use rvasm::asm::{assemble, decode, encode, lexer, preproc, EmitMode, IsaSpec};

const BASE_ADDR: u32 = 0x80100;

fn assemble_src(src: &str) -> rvasm::asm::Program {
    assemble(src, BASE_ADDR, &IsaSpec::rv32i()).unwrap()
}

#[test]
fn image_has_one_entry_per_translatable_line() {
    let program = assemble_src(
        "# leading comment\n\
         start: addi a0, zero, 1\n\
         \n\
         .equ K, 9\n\
         addi a0, a0, K\n\
         mid:\n\
         add a1, a0, a0\n\
         ebreak\n",
    );
    assert_eq!(program.len(), 4);
    for (n, record) in program.records.iter().enumerate() {
        assert_eq!(record.addr, BASE_ADDR + 4 * n as u32);
    }
}

#[test]
fn labels_address_the_next_instruction() {
    let program = assemble_src(
        "first: addi a0, zero, 1\n\
         # a comment\n\
         \n\
         second:\n\
         third: addi a0, a0, 1\n\
         addi a0, a0, 1\n\
         last:\n\
         addi a0, a0, 1\n",
    );
    assert_eq!(program.symbols["first"], i64::from(BASE_ADDR));
    // consecutive labels land on the same instruction
    assert_eq!(program.symbols["second"], i64::from(BASE_ADDR) + 4);
    assert_eq!(program.symbols["third"], i64::from(BASE_ADDR) + 4);
    assert_eq!(program.symbols["last"], i64::from(BASE_ADDR) + 12);
}

#[test]
fn preprocessing_is_idempotent() {
    let src = "entry: addi t0, zero, 3\n\
               loop: addi t1, t1, 1\n\
               addi t0, t0, -1\n\
               bne t0, x0, loop\n\
               sw t1, 0(t2)\n";
    let first = preproc::preprocess(src, BASE_ADDR).unwrap();
    let again = preproc::preprocess(&first.mnemonics.join("\n"), BASE_ADDR).unwrap();
    assert_eq!(first.mnemonics, again.mnemonics);
    assert!(again.symbols.is_empty());
}

#[test]
fn encode_decode_round_trip() {
    let isa = IsaSpec::rv32i();
    let symbols = HashMap::new();
    // (line, addr); branch/jump targets chosen relative to addr
    let cases = [
        ("add a2, a0, a1", 0),
        ("sub s1, s2, s3", 0),
        ("sltu t0, t1, t2", 0),
        ("sra a0, a1, a2", 0),
        ("addi x5, x0, -1", 0),
        ("andi a1, a2, 0xff0", 0),
        ("slti a0, a1, -2048", 0),
        ("slli x1, x1, 2", 0),
        ("srai x1, x2, 31", 0),
        ("lw a2, 0(a0)", 0),
        ("lbu t0, -7(sp)", 0),
        ("sb a1, 3(a0)", 0),
        ("sh a1, -4(a0)", 0),
        ("sw a1, 2047(a0)", 0),
        ("beq x1, x2, 16", 0),
        ("bne t0, zero, 4", 12),
        ("bgeu a0, a1, 0", 4096),
        ("lui a0, 0x12345", 0),
        ("auipc a0, 1", 0),
        ("jal ra, 8", 0),
        ("jalr x0, ra, 0", 0),
        ("ecall", 0),
        ("ebreak", 0),
    ];
    for (text, addr) in cases {
        let line = lexer::tokenize(text).unwrap();
        let encoded = encode::encode_line(&line, addr, &symbols, &isa).unwrap();
        let decoded = decode::decode(encoded.word)
            .unwrap_or_else(|e| panic!("decoding '{text}' failed: {e}"));
        let record = &encoded.record;
        assert_eq!(decoded.mnemonic, record.name, "mnemonic for '{text}'");
        match decoded.format {
            Format::R => {
                assert_eq!(decoded.rd, record.rd);
                assert_eq!(decoded.rs1, record.rs1);
                assert_eq!(decoded.rs2, record.rs2);
            }
            Format::S => {
                assert_eq!(decoded.rs2, record.rd, "source reg for '{text}'");
                assert_eq!(decoded.rs1, record.rs1);
                assert_eq!(Some(decoded.imm), record.imm);
            }
            Format::B => {
                assert_eq!(decoded.rs1, record.rs1);
                assert_eq!(decoded.rs2, record.rs2);
                // decode yields the offset, the record the target
                let target = record.imm.unwrap();
                assert_eq!(decoded.imm, target.wrapping_sub(addr as i32));
            }
            Format::J => {
                assert_eq!(decoded.rd, record.rd);
                let target = record.imm.unwrap();
                assert_eq!(decoded.imm, target.wrapping_sub(addr as i32));
            }
            Format::U => {
                assert_eq!(decoded.rd, record.rd);
                assert_eq!(Some(decoded.imm), record.imm);
            }
            Format::I => {
                if record.name == "ecall" || record.name == "ebreak" {
                    continue;
                }
                assert_eq!(decoded.rd, record.rd);
                assert_eq!(decoded.rs1, record.rs1);
                if record.name == "andi" {
                    // 0xff0 reads back sign-extended from the 12-bit field
                    assert_eq!(decoded.imm, -16);
                } else {
                    assert_eq!(Some(decoded.imm), record.imm, "imm for '{text}'");
                }
            }
        }
    }
}

#[test]
fn emitted_views_agree_with_each_other() {
    let program = assemble_src("addi x5, x0, -1\n");
    let hex = &program.emit(EmitMode::Hex)[0];
    let bin = &program.emit(EmitMode::Bin)[0];
    let nib = &program.emit(EmitMode::Nibble)[0];
    assert_eq!(u32::from_str_radix(&hex[2..], 16).unwrap(), program.words[0]);
    assert_eq!(u32::from_str_radix(bin, 2).unwrap(), program.words[0]);
    assert_eq!(nib.replace('\t', ""), *bin);
}

#[test]
fn show_encoding_lists_little_endian_bytes() {
    let program = assemble_src("lui a0, 0x12345\n");
    // 0x12345537 -> bytes 37 55 34 12
    assert_eq!(
        program.encoding_lines(),
        vec!["lui a0, 0x12345 \t# encoding: [0x37,0x55,0x34,0x12]".to_string()]
    );
}

#[test]
fn branches_reach_labels_in_both_directions() {
    let program = assemble_src(
        "back: addi a0, a0, 1\n\
         beq a0, a1, back\n\
         beq a0, a1, fwd\n\
         addi a0, a0, 1\n\
         fwd: addi a0, a0, 2\n",
    );
    // branch at +4 targeting base: offset -4
    let decoded = decode::decode(program.words[1]).unwrap();
    assert_eq!(decoded.imm, -4);
    // branch at +8 targeting +16: offset 8
    let decoded = decode::decode(program.words[2]).unwrap();
    assert_eq!(decoded.imm, 8);
}

#[test]
fn case_is_folded_everywhere() {
    let upper = assemble_src("LOOP: ADDI A0, ZERO, 1\nBNE A0, X0, LOOP\n");
    let lower = assemble_src("loop: addi a0, zero, 1\nbne a0, x0, loop\n");
    assert_eq!(upper.words, lower.words);
}

#[test]
fn assembling_nothing_yields_an_empty_program() {
    let program = assemble_src("# only comments\n\n; and blanks\n");
    assert!(program.is_empty());
}
