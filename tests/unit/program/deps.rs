use super::*;
use crate::program::bytecode::{ANIM_GRID, ANIM_SMOOTH, DEFAULT_ANIM_FPS_Q, Op};
use crate::program::compile::compile_source;

fn build(src: &str, names: &[(&str, u32)]) -> Vec<u8> {
    let c = compile_source(src).unwrap();
    let mut code = c.code;
    for p in &c.patches {
        let id = names.iter().find(|(n, _)| *n == p.name).unwrap().1;
        write_u24(&mut code, p.offset, id);
    }
    code
}

#[test]
fn nested_dependency_is_found() {
    let code = build(
        r#"32x32 #000000 |> overlay(tex(name="X") |> invert())"#,
        &[("X", 42)],
    );
    assert_eq!(dependencies(&code).as_slice(), &[42]);

    let code = build(
        r#"base |> overlay(tex(name="X") |> invert())"#,
        &[("base", 1), ("X", 42)],
    );
    assert_eq!(dependencies(&code).as_slice(), &[1, 42]);
}

#[test]
fn dependencies_are_deduplicated_across_ops() {
    let code = build(
        "combine(8, 8, 0, 0, a, 4, 0, tex(b |> mask(a))) |> lowpart(50, c) |> overlay(b)",
        &[("a", 1), ("b", 2), ("c", 3)],
    );
    let mut deps = dependencies(&code).to_vec();
    deps.sort_unstable();
    assert_eq!(deps, vec![1, 2, 3]);
}

#[test]
fn scans_stop_quietly_on_bad_bytecode() {
    // base_tex 5; overlay <truncated>
    let code = [Op::BaseTex as u8, 0, 5, 0, 0, Op::Overlay as u8, 0, 1];
    assert_eq!(dependencies(&code).as_slice(), &[5]);
    assert!(tex_id_sites(&code).is_err());
}

#[test]
fn self_referencing_sub_terminates() {
    let code = [Op::Overlay as u8, 1, 0, 0, 0, 9, 0, 0, Op::End as u8];
    assert!(dependencies(&code).is_empty());
    assert_eq!(tex_id_sites(&code).unwrap(), Vec::<usize>::new());
}

#[test]
fn animation_specs_cover_base_stage_and_nested() {
    let code = build(
        "anim(water, 16, 16, 4, fps=4, smooth=1) |> overlay(tex(lava |> anim(8, 8)))",
        &[("water", 9), ("lava", 10)],
    );
    let specs = animation_specs(&code);
    assert_eq!(specs.len(), 2);
    assert_eq!(
        specs[0],
        AnimSpec {
            tex: Some(9),
            frame_w: 16,
            frame_h: 16,
            frame_count: 4,
            fps_q: 4 * 256,
            flags: ANIM_SMOOTH | ANIM_GRID,
        }
    );
    assert_eq!(specs[1].tex, None);
    assert_eq!(specs[1].fps_q, DEFAULT_ANIM_FPS_Q);
    assert_eq!((specs[1].frame_w, specs[1].frame_h), (8, 8));

    assert!(animation_specs(&build("stone |> brighten", &[("stone", 1)])).is_empty());
}

#[test]
fn remap_rewrites_every_reachable_id() {
    let mut code = build(
        "a |> overlay(tex(b |> invert())) |> mask(a)",
        &[("a", 0), ("b", 1)],
    );
    remap_tex_ids(&mut code, &[100, 200]).unwrap();
    let mut deps = dependencies(&code).to_vec();
    deps.sort_unstable();
    assert_eq!(deps, vec![100, 200]);
}

#[test]
fn remap_is_all_or_nothing() {
    let mut code = build("a |> overlay(b)", &[("a", 0), ("b", 5)]);
    let before = code.clone();
    let err = remap_tex_ids(&mut code, &[7]).unwrap_err();
    assert!(err.to_string().contains("outside the remap table"));
    assert_eq!(code, before);

    let err = remap_tex_ids(&mut code, &[0x0100_0000; 6]).unwrap_err();
    assert!(err.to_string().contains("24 bits"));
    assert_eq!(code, before);
}
