use super::*;
use crate::program::bytecode::{Instr, Reader, SrcRef};

fn u24_at(code: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([code[at], code[at + 1], code[at + 2], 0])
}

fn compile_err(src: &str) -> String {
    compile_source(src).unwrap_err().to_string()
}

fn instrs(code: &[u8]) -> Vec<Instr> {
    let mut r = Reader::new(code, 0, code.len());
    let mut out = Vec::new();
    while !r.at_end() {
        let (_, i) = r.next_instr().unwrap();
        let end = matches!(i, Instr::End);
        out.push(i);
        if end {
            break;
        }
    }
    out
}

#[test]
fn hex_colors() {
    assert_eq!(parse_hex_color("#FF0000"), Some(0xFFFF_0000));
    assert_eq!(parse_hex_color("#11223344"), Some(0x4411_2233));
    assert_eq!(parse_hex_color("#abcdef"), Some(0xFFAB_CDEF));
    assert_eq!(parse_hex_color("#12345"), None);
    assert_eq!(parse_hex_color("FF0000"), None);
    assert_eq!(parse_hex_color("#GG0000"), None);
}

#[test]
fn axis_names() {
    assert_eq!(axis_flags(""), ANIM_GRID);
    assert_eq!(axis_flags("grid"), ANIM_GRID);
    assert_eq!(axis_flags("x"), ANIM_HORIZONTAL);
    assert_eq!(axis_flags("horizontal"), ANIM_HORIZONTAL);
    assert_eq!(axis_flags("Y"), 0);
    assert_eq!(axis_flags("vertical"), 0);
}

#[test]
fn nested_pipeline_goes_to_the_arena() {
    let c = compile_source("stone |> overlay(tex(moss |> invert()))").unwrap();
    let code = &c.code;
    assert_eq!(code.len(), 22);
    assert_eq!(code[13], Op::End as u8);
    assert_eq!(code[6], 1);
    assert_eq!(u24_at(code, 7), 14);
    assert_eq!(u24_at(code, 10), 8);
    assert_eq!(code[21], Op::End as u8);
    assert_eq!(
        c.patches,
        vec![
            Patch {
                offset: 2,
                name: "stone".into()
            },
            Patch {
                offset: 16,
                name: "moss".into()
            },
        ]
    );
}

#[test]
fn bare_nested_texture_needs_no_sub_program() {
    let c = compile_source("a |> overlay(tex(b))").unwrap();
    assert_eq!(c.code.len(), 11);
    let offsets: Vec<usize> = c.patches.iter().map(|p| p.offset).collect();
    assert_eq!(offsets, vec![2, 7]);
    assert_eq!(c.patches[1].name, "b");
}

#[test]
fn sub_programs_are_laid_out_breadth_first() {
    let c = compile_source(
        "a |> overlay(tex(b |> overlay(tex(c |> invert())))) |> mask(tex(d |> brighten))",
    )
    .unwrap();
    let code = &c.code;
    assert_eq!(code.len(), 51);
    assert_eq!((u24_at(code, 7), u24_at(code, 10)), (22, 14));
    assert_eq!((u24_at(code, 15), u24_at(code, 18)), (36, 7));
    assert_eq!((u24_at(code, 29), u24_at(code, 32)), (43, 8));
    for end in [21, 35, 42, 50] {
        assert_eq!(code[end], Op::End as u8, "end at {end}");
    }
    let names: Vec<&str> = c.patches.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b", "d", "c"]);
}

#[test]
fn operand_encoding() {
    let c = compile_source("2x2 #000000 |> contrast(200, -5)").unwrap();
    assert_eq!(&c.code[9..12], &[Op::Contrast as u8, 254, 122]);

    let c = compile_source("stone |> lowpart(150, moss)").unwrap();
    assert_eq!(c.code[6], 100);

    let c = compile_source("stone |> opacity").unwrap();
    assert_eq!(c.code[6], 255);
    let c = compile_source("stone |> opacity(a=300)").unwrap();
    assert_eq!(c.code[6], 255);

    let c = compile_source(r#"stone |> invert("ra")"#).unwrap();
    assert_eq!(c.code[6], 0b1001);

    let c = compile_source("stone |> transform(13)").unwrap();
    assert_eq!(c.code[6], 5);

    let c = compile_source("stone |> make_alpha(#102030)").unwrap();
    assert_eq!(&c.code[5..9], &[Op::MakeAlpha as u8, 0x10, 0x20, 0x30]);
}

#[test]
fn anim_arguments() {
    let c = compile_source("anim(water, 16, 8, fps=0, axis=x)").unwrap();
    let Instr::BaseAnim { src, params } = &instrs(&c.code)[0] else {
        panic!("expected base anim");
    };
    assert_eq!(*src, SrcRef::TexId(0));
    assert_eq!((params.frame_w, params.frame_h, params.frames), (16, 8, 0));
    assert_eq!(params.fps_q, DEFAULT_ANIM_FPS_Q);
    assert_eq!(params.flags, ANIM_HORIZONTAL);

    let c = compile_source("sheet |> anim(frames=3, smooth=1)").unwrap();
    let Instr::Anim(params) = &instrs(&c.code)[1] else {
        panic!("expected anim stage");
    };
    assert_eq!(params.frames, 3);
    assert_eq!(params.flags, ANIM_SMOOTH | ANIM_GRID);
}

#[test]
fn argument_errors() {
    assert!(compile_err("stone |> opacity(foo=1)").contains("unknown argument 'foo'"));
    assert!(compile_err("stone |> resize(1, 2, 3)").contains("too many arguments"));
    assert!(compile_err("stone |> resize(0, 4)").contains("1..=65535"));
    assert!(compile_err("stone |> resize(4)").contains("missing argument 'h'"));
    assert!(compile_err("stone |> frobnicate").contains("unknown operation 'frobnicate'"));
    assert!(compile_err("stone |> lowpart(0, moss)").contains("greater than zero"));
    assert!(compile_err("stone |> multiply(red)").contains("expected a #RRGGBB"));
    assert!(compile_err("stone |> overlay(5)").contains("expected a texture name"));
    assert!(compile_err("stone |> invert(\"rgz\")").contains("unknown channel 'z'"));
    assert!(compile_err("4x4 #12 |> brighten").contains("invalid fill color"));
    assert!(compile_err("combine(4, 4, 0, 0)").contains("complete x, y, src triples"));
    assert!(compile_err("combine(4, 4, x=0, 0, a)").contains("positional arguments only"));
}

#[test]
fn oversized_programs_are_rejected() {
    let src = format!("stone{}", " |> brighten".repeat(MAX_CODE_BYTES));
    assert!(compile_err(&src).contains("limit is"));
}

#[test]
fn deep_nesting_is_rejected() {
    let mut src = "x".to_string();
    for _ in 0..(MAX_NESTING_DEPTH + 4) {
        src = format!("a |> overlay(tex({src} |> invert()))");
    }
    assert!(compile_source(&src).is_err());
}
