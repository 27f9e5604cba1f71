use std::cell::Cell;

use super::*;
use crate::program::bytecode::write_u24;
use crate::program::compile::compile_source;

fn build(src: &str, names: &[(&str, u32)]) -> Vec<u8> {
    let c = compile_source(src).unwrap();
    let mut code = c.code;
    for p in &c.patches {
        let id = names
            .iter()
            .find(|(n, _)| *n == p.name)
            .unwrap_or_else(|| panic!("no id for {}", p.name))
            .1;
        write_u24(&mut code, p.offset, id);
    }
    code
}

fn bake(code: &[u8], textures: &HashMap<u32, Image>, t: f64) -> Result<Image, VmError> {
    run(
        code,
        |id| {
            textures.get(&id).map(|img| TextureView {
                width: img.width,
                height: img.height,
                pixels: &img.pixels,
            })
        },
        t,
    )
}

fn no_textures() -> HashMap<u32, Image> {
    HashMap::new()
}

#[test]
fn solid_fill() {
    let img = bake(&build("32x32 #FF0000FF", &[]), &no_textures(), 0.0).unwrap();
    assert_eq!((img.width, img.height), (32, 32));
    assert!(img.pixels.iter().all(|&p| p == 0xFFFF_0000));
}

#[test]
fn opacity_halves_alpha() {
    let mut texs = HashMap::new();
    texs.insert(1, Image::solid(4, 4, 0xFF11_2233));
    let code = build("tex |> opacity(128)", &[("tex", 1)]);
    let img = bake(&code, &texs, 0.0).unwrap();
    assert!(img.pixels.iter().all(|&p| p == 0x8011_2233));
}

#[test]
fn overlay_without_base_adopts_source() {
    let mut texs = HashMap::new();
    texs.insert(7, Image::solid(2, 2, 0xFF00_FF00));
    let code = [Op::Overlay as u8, 0, 7, 0, 0, Op::End as u8];
    let img = bake(&code, &texs, 0.0).unwrap();
    assert_eq!(img, texs[&7]);
}

#[test]
fn ops_without_base_fail() {
    let code = [Op::Opacity as u8, 10, Op::End as u8];
    assert_eq!(
        bake(&code, &no_textures(), 0.0),
        Err(VmError::MissingBase {
            op: "opacity",
            at: 0
        })
    );
    assert_eq!(
        bake(&[Op::End as u8], &no_textures(), 0.0),
        Err(VmError::MissingBase { op: "end", at: 0 })
    );
}

#[test]
fn malformed_bytecode_is_reported() {
    assert_eq!(
        bake(&[], &no_textures(), 0.0),
        Err(VmError::TruncatedBytecode { at: 0 })
    );
    assert_eq!(
        bake(&[Op::Resize as u8, 1], &no_textures(), 0.0),
        Err(VmError::TruncatedBytecode { at: 1 })
    );
    // Fill without a terminating End.
    let mut code = build("2x2 #000000", &[]);
    code.pop();
    assert_eq!(
        bake(&code, &no_textures(), 0.0),
        Err(VmError::TruncatedBytecode { at: 9 })
    );
    assert_eq!(
        bake(&[99], &no_textures(), 0.0),
        Err(VmError::UnknownOpcode { op: 99, at: 0 })
    );
    assert_eq!(
        bake(&[Op::BaseTex as u8, 5, 0, 0, 0, 0], &no_textures(), 0.0),
        Err(VmError::UnknownSrcKind { kind: 5, at: 1 })
    );
}

#[test]
fn missing_texture_is_an_error() {
    let code = build("stone", &[("stone", 3)]);
    assert_eq!(
        bake(&code, &no_textures(), 0.0),
        Err(VmError::MissingTexture { id: 3 })
    );

    // A view shorter than width * height is rejected as well.
    let short = [0u32; 3];
    let err = run(
        &code,
        |_| {
            Some(TextureView {
                width: 2,
                height: 2,
                pixels: &short,
            })
        },
        0.0,
    );
    assert_eq!(err, Err(VmError::MissingTexture { id: 3 }));
}

#[test]
fn nested_sub_program_runs_in_place() {
    let mut texs = HashMap::new();
    texs.insert(1, Image::solid(2, 2, 0xFF00_0000));
    texs.insert(2, Image::solid(2, 2, 0xFF00_0000));
    let code = build(
        "a |> overlay(tex(b |> invert()))",
        &[("a", 1), ("b", 2)],
    );
    let img = bake(&code, &texs, 0.0).unwrap();
    assert!(img.pixels.iter().all(|&p| p == 0xFFFF_FFFF));
}

#[test]
fn self_referencing_sub_program_is_caught() {
    // overlay(Sub(0, 9)); end
    let code = [Op::Overlay as u8, 1, 0, 0, 0, 9, 0, 0, Op::End as u8];
    assert_eq!(
        bake(&code, &no_textures(), 0.0),
        Err(VmError::RecursiveSubProgram { offset: 0, len: 9 })
    );

    let out_of_range = [Op::Overlay as u8, 1, 0, 0, 0, 90, 0, 0, Op::End as u8];
    assert!(matches!(
        bake(&out_of_range, &no_textures(), 0.0),
        Err(VmError::SubRangeOutOfBounds { len: 90, .. })
    ));
}

#[test]
fn sources_are_resized_to_the_base() {
    let mut texs = HashMap::new();
    texs.insert(1, Image::solid(4, 4, 0xFFFF_FFFF));
    texs.insert(2, Image::solid(1, 1, 0x0000_0000));
    let code = build("a |> mask(b)", &[("a", 1), ("b", 2)]);
    let img = bake(&code, &texs, 0.0).unwrap();
    assert_eq!((img.width, img.height), (4, 4));
    assert!(img.pixels.iter().all(|&p| p == 0x00FF_FFFF));
}

#[test]
fn combine_places_sources_side_by_side() {
    let mut texs = HashMap::new();
    texs.insert(1, Image::solid(2, 2, 0xFFAA_0000));
    texs.insert(2, Image::solid(2, 2, 0xFF00_00BB));
    let code = build("combine(4, 2, 0, 0, a, 2, 0, b)", &[("a", 1), ("b", 2)]);
    let img = bake(&code, &texs, 0.0).unwrap();
    assert_eq!((img.width, img.height), (4, 2));
    assert_eq!(img.get(1, 1), 0xFFAA_0000);
    assert_eq!(img.get(2, 0), 0xFF00_00BB);
}

fn strip_sheet() -> Image {
    // 16x64 vertical strip; frame i is grey level i * 0x40.
    let mut sheet = Image::solid(16, 64, 0);
    for f in 0..4u32 {
        let v = f * 0x40;
        let px = 0xFF00_0000 | (v << 16) | (v << 8) | v;
        sheet.pixels[(f * 256) as usize..((f + 1) * 256) as usize].fill(px);
    }
    sheet
}

#[test]
fn anim_selects_frames_by_time() {
    let mut texs = HashMap::new();
    texs.insert(4, strip_sheet());
    let code = build("anim(tex,16,16,4,fps=4,smooth=0,axis=y)", &[("tex", 4)]);

    let f0 = bake(&code, &texs, 0.0).unwrap();
    assert_eq!((f0.width, f0.height), (16, 16));
    assert_eq!(f0.pixels[0], 0xFF00_0000);

    let f1 = bake(&code, &texs, 0.25).unwrap();
    assert_eq!(f1.pixels[0], 0xFF40_4040);
}

#[test]
fn smooth_anim_lerps_between_frames() {
    let mut texs = HashMap::new();
    texs.insert(4, strip_sheet());
    let code = build("anim(tex,16,16,4,fps=4,smooth=1,axis=y)", &[("tex", 4)]);
    let img = bake(&code, &texs, 0.125).unwrap();
    assert!(img.pixels.iter().all(|&p| p == 0xFF20_2020));
}

#[test]
fn anim_stage_cuts_the_current_image() {
    let mut texs = HashMap::new();
    texs.insert(4, strip_sheet());
    let code = build("sheet |> anim(16, 16, 4, fps=4, axis=y)", &[("sheet", 4)]);
    let img = bake(&code, &texs, 0.5).unwrap();
    assert_eq!(img.pixels[0], 0xFF80_8080);
}

#[test]
fn texture_cache_queries_provider_once_per_id() {
    let calls = Cell::new(0);
    let img = Image::solid(2, 2, 0xFF12_3456);
    let code = build("a |> overlay(a) |> mask(a)", &[("a", 1)]);
    let out = run(
        &code,
        |_| {
            calls.set(calls.get() + 1);
            Some(TextureView {
                width: img.width,
                height: img.height,
                pixels: &img.pixels,
            })
        },
        0.0,
    )
    .unwrap();
    assert_eq!(out.width, 2);
    assert_eq!(calls.get(), 1);
}

#[test]
fn oversized_results_are_rejected() {
    let code = build("2x2 #000000 |> resize(65535, 65535)", &[]);
    assert_eq!(
        bake(&code, &no_textures(), 0.0),
        Err(VmError::ImageTooLarge {
            width: 65535,
            height: 65535
        })
    );
}
