use super::*;

#[test]
fn opcodes_round_trip_through_from_u8() {
    let mut count = 0;
    for v in 0..=u8::MAX {
        if let Some(op) = Op::from_u8(v) {
            assert_eq!(op as u8, v);
            assert!(!op.mnemonic().is_empty());
            count += 1;
        }
    }
    assert_eq!(count, 20);
    assert_eq!(Op::from_u8(4), None);
}

#[test]
fn reader_decodes_what_the_writer_emits() {
    let mut w = CodeWriter::default();
    w.op(Op::BaseFill);
    w.u16(2);
    w.u16(3);
    w.u32(0xFF00_FF00);
    w.op(Op::Contrast);
    w.u8(127 + 10);
    w.u8(127 - 5);
    w.op(Op::End);
    let code = w.into_bytes();

    let mut r = Reader::new(&code, 0, code.len());
    assert_eq!(
        r.next_instr().unwrap(),
        (
            0,
            Instr::BaseFill {
                w: 2,
                h: 3,
                argb: 0xFF00_FF00
            }
        )
    );
    assert_eq!(
        r.next_instr().unwrap(),
        (
            9,
            Instr::Contrast {
                contrast: 10,
                brightness: -5
            }
        )
    );
    assert_eq!(r.next_instr().unwrap(), (12, Instr::End));
    assert!(r.at_end());
}

#[test]
fn reader_never_reads_past_its_range() {
    let code = [Op::Resize as u8, 1, 0, 4];
    let mut r = Reader::new(&code, 0, code.len());
    assert_eq!(r.next_instr(), Err(DecodeError::Truncated { at: 3 }));

    let code = [Op::Resize as u8, 1, 0, 4, 0, Op::End as u8];
    let mut r = Reader::new(&code, 0, 2);
    assert_eq!(r.next_instr(), Err(DecodeError::Truncated { at: 1 }));

    let mut r = Reader::new(&[7u8], 0, 1);
    assert_eq!(
        r.next_instr(),
        Err(DecodeError::UnknownOpcode { op: 7, at: 0 })
    );
}

#[test]
fn tex_sites_point_at_id_fields() {
    let mut w = CodeWriter::default();
    w.op(Op::Combine);
    w.u16(4);
    w.u16(4);
    w.u16(2);
    w.u16(0);
    w.u16(0);
    let a = w.tex_placeholder();
    w.u16(2);
    w.u16(0);
    w.sub_placeholder();
    w.patch_u24(a, 77);
    let code = w.into_bytes();

    let mut r = Reader::new(&code, 0, code.len());
    let (_, instr) = r.next_instr().unwrap();
    assert_eq!(r.tex_sites(), &[a]);
    let Instr::Combine { parts, .. } = instr else {
        panic!("expected combine");
    };
    assert_eq!(parts[0].src, SrcRef::TexId(77));
    assert_eq!(parts[1].src, SrcRef::Sub { offset: 0, len: 0 });
}

#[test]
fn disassembly_lists_main_and_sub_programs() {
    let compiled =
        crate::program::compile::compile_source("stone |> overlay(tex(moss |> invert()))").unwrap();
    let text = disassemble(&compiled.code, &compiled.patches);
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(
        lines,
        vec![
            r#"00000  base_tex tex#0 ("stone")"#,
            "00005  overlay sub@14+8",
            "00013  end",
            "sub@14:",
            r#"00014  base_tex tex#0 ("moss")"#,
            "00019  invert mask=0b0111",
            "00021  end",
        ]
    );
}

#[test]
fn disassembly_reports_the_first_bad_instruction() {
    let text = disassemble(&[Op::NoAlpha as u8, 99], &[]);
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "00000  noalpha");
    assert!(lines[1].starts_with("00001  <error: unknown opcode 99"));
}
