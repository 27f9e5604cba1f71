use std::collections::HashSet;

use super::*;

#[test]
fn identical_bytes_are_equal_and_hash_alike() {
    let a = HashedProgram::new(vec![1, 0, 5, 0, 0, 0]);
    let b = HashedProgram::new(vec![1, 0, 5, 0, 0, 0]);
    let c = HashedProgram::new(vec![1, 0, 6, 0, 0, 0]);
    assert_eq!(a, b);
    assert_eq!(a.hash(), b.hash());
    assert_ne!(a, c);
    assert_eq!(a.hash(), Fnv1a64::hash_bytes(a.bytes()));

    let set: HashSet<HashedProgram> = [a.clone(), b, c.clone()].into_iter().collect();
    assert_eq!(set.len(), 2);
    assert_ne!(a.cmp(&c), Ordering::Equal);
}

#[test]
fn trivial_texture_pipeline() {
    let p = HashedProgram::for_texture(0x01_0203).unwrap();
    assert_eq!(p.bytes(), &[Op::BaseTex as u8, 0, 0x03, 0x02, 0x01, Op::End as u8]);
    assert_eq!(p.dependencies().as_slice(), &[0x01_0203]);
    assert!(p.animation_specs().is_empty());
    assert_eq!(p, HashedProgram::for_texture(0x01_0203).unwrap());

    assert!(HashedProgram::for_texture(MAX_U24 + 1).is_err());
}

#[test]
fn animation_specs_come_from_the_bytecode() {
    let mut prog = crate::TextureProgram::compile("anim(water, 16, 16, 4, fps=4)").unwrap();
    prog.link(|_| Some(7)).unwrap();
    let hashed = prog.hashed().unwrap();
    let specs = hashed.animation_specs();
    assert_eq!(specs.len(), 1);
    assert_eq!(specs[0].tex, Some(7));
    assert_eq!(specs[0].frame_count, 4);
    assert_eq!(specs[0].fps_q, 4 * 256);
}
