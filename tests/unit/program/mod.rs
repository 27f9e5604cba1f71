use super::*;

fn ids(name: &str) -> Option<u32> {
    match name {
        "stone" => Some(1),
        "moss" => Some(2),
        _ => None,
    }
}

#[test]
fn fill_programs_need_no_linking() {
    let p = TextureProgram::compile("4x4 #336699").unwrap();
    assert!(p.is_linked());
    assert!(p.patches().is_empty());
    let img = p.bake(|_| None, 0.0).unwrap();
    assert_eq!(img.pixels[0], 0xFF33_6699);
}

#[test]
fn compile_link_bake() {
    let mut p = TextureProgram::compile("stone |> overlay(tex(moss) |> opacity(0))").unwrap();
    assert!(!p.is_linked());
    assert_eq!(p.unresolved_names(), vec!["stone", "moss"]);

    let err = p.bake(|_| None, 0.0).unwrap_err();
    assert!(matches!(err, TexPipeError::Link(_)));
    assert!(err.to_string().contains("stone, moss"));

    p.link(ids).unwrap();
    assert!(p.is_linked());
    assert!(p.unresolved_names().is_empty());
    let mut deps = p.dependencies().to_vec();
    deps.sort_unstable();
    assert_eq!(deps, vec![1, 2]);

    let stone = vec![0xFF10_2030u32; 4];
    let moss = vec![0xFFFF_FFFFu32; 4];
    let img = p
        .bake(
            |id| {
                let pixels = match id {
                    1 => &stone,
                    2 => &moss,
                    _ => return None,
                };
                Some(TextureView {
                    width: 2,
                    height: 2,
                    pixels,
                })
            },
            0.0,
        )
        .unwrap();
    assert_eq!(img.pixels, stone);
}

#[test]
fn failed_link_writes_nothing() {
    let mut p = TextureProgram::compile("stone |> overlay(lava)").unwrap();
    let before = p.bytes().to_vec();
    let err = p.link(ids).unwrap_err();
    assert!(err.to_string().contains("unresolved texture name 'lava'"));
    assert!(!p.is_linked());
    assert_eq!(p.bytes(), before.as_slice());

    let err = p.link(|_| Some(1 << 24)).unwrap_err();
    assert!(err.to_string().contains("24 bits"));
    assert_eq!(p.bytes(), before.as_slice());
}

#[test]
fn relinking_overwrites_previous_ids() {
    let mut p = TextureProgram::compile("stone").unwrap();
    p.link(|_| Some(5)).unwrap();
    assert_eq!(p.dependencies().as_slice(), &[5]);
    p.link(|_| Some(9)).unwrap();
    assert_eq!(p.dependencies().as_slice(), &[9]);

    // A failed relink leaves the earlier ids in place but marks the program unlinked.
    assert!(p.link(|_| None).is_err());
    assert!(!p.is_linked());
    assert_eq!(p.dependencies().as_slice(), &[9]);
}

#[test]
fn raw_bytecode_is_validated() {
    let mut p = TextureProgram::compile("stone |> overlay(tex(moss |> invert()))").unwrap();
    p.link(ids).unwrap();

    let copy = TextureProgram::from_bytes(p.bytes().to_vec()).unwrap();
    assert!(copy.is_linked());
    assert_eq!(copy.bytes(), p.bytes());
    assert_eq!(copy.dependencies(), p.dependencies());

    let err = TextureProgram::from_bytes(Vec::new()).unwrap_err();
    assert!(matches!(err, TexPipeError::Input(_)));
    let mut truncated = p.bytes().to_vec();
    truncated.truncate(7);
    assert!(TextureProgram::from_bytes(truncated).is_err());
    assert!(TextureProgram::from_bytes(vec![0u8; MAX_CODE_BYTES + 1]).is_err());
}

#[test]
fn remap_requires_a_linked_program() {
    let mut p = TextureProgram::compile("stone |> mask(moss)").unwrap();
    assert!(matches!(
        p.remap_tex_ids(&[0, 1, 2]),
        Err(TexPipeError::Link(_))
    ));
    p.link(ids).unwrap();
    p.remap_tex_ids(&[0, 11, 12]).unwrap();
    assert_eq!(p.dependencies().as_slice(), &[11, 12]);
}

#[test]
fn disassembly_names_unlinked_textures() {
    let mut p = TextureProgram::compile("stone |> brighten").unwrap();
    assert!(p.disassemble().contains(r#"tex#0 ("stone")"#));
    p.link(ids).unwrap();
    let text = p.disassemble();
    assert!(text.contains("base_tex tex#1"));
    assert!(!text.contains("stone"));
}

#[test]
fn hashing_requires_linking() {
    let mut p = TextureProgram::compile("stone").unwrap();
    assert!(p.hashed().is_err());
    p.link(ids).unwrap();
    let a = p.hashed().unwrap();
    let b = TextureProgram::from_bytes(p.bytes().to_vec())
        .unwrap()
        .hashed()
        .unwrap();
    assert_eq!(a, b);
}
