use super::*;

#[test]
fn fnv_incremental_matches_one_shot() {
    let mut a = Fnv1a64::new_default();
    a.write_bytes(&[1]);
    a.write_bytes(&[2, 3, 0]);
    assert_eq!(a.finish(), Fnv1a64::hash_bytes(&[1, 2, 3, 0]));
}

#[test]
fn fnv_empty_is_offset_basis() {
    assert_eq!(Fnv1a64::hash_bytes(&[]), Fnv1a64::OFFSET_BASIS);
    // Known FNV-1a 64 vector for "a".
    assert_eq!(Fnv1a64::hash_bytes(b"a"), 0xaf63_dc4c_8601_ec8c);
}

#[test]
fn mul_div255_rounds_to_nearest() {
    assert_eq!(mul_div255(255, 255), 255);
    assert_eq!(mul_div255(255, 128), 128);
    assert_eq!(mul_div255(128, 128), 64);
    assert_eq!(mul_div255(0, 200), 0);
    assert_eq!(mul_div255_u8(1, 127), 0);
    assert_eq!(mul_div255_u8(1, 128), 1);
}

#[test]
fn argb_packing_round_trips_channels() {
    let p = pack_argb(0x11, 0x22, 0x33, 0x44);
    assert_eq!(p, 0x1122_3344);
    assert_eq!(
        (argb_a(p), argb_r(p), argb_g(p), argb_b(p)),
        (0x11, 0x22, 0x33, 0x44)
    );
}

#[test]
fn argb_converts_into_rgba8_byte_order() {
    let bytes = argb_to_rgba8(&[0xFF00_80FF]);
    assert_eq!(bytes, vec![0x00, 0x80, 0xFF, 0xFF]);
}

#[test]
fn clamp_u8_saturates() {
    assert_eq!(clamp_u8(-5), 0);
    assert_eq!(clamp_u8(300), 255);
    assert_eq!(clamp_u8(17), 17);
}
