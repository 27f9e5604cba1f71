/// 64-bit FNV-1a, used as the content hash of pipeline bytecode.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Fnv1a64(u64);

impl Fnv1a64 {
    pub(crate) const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01B3;

    pub(crate) fn new_default() -> Self {
        Self(Self::OFFSET_BASIS)
    }

    pub(crate) fn write_bytes(&mut self, bytes: &[u8]) {
        let mut h = self.0;
        for &b in bytes {
            h ^= u64::from(b);
            h = h.wrapping_mul(Self::PRIME);
        }
        self.0 = h;
    }

    pub(crate) fn finish(self) -> u64 {
        self.0
    }

    pub(crate) fn hash_bytes(bytes: &[u8]) -> u64 {
        let mut h = Self::new_default();
        h.write_bytes(bytes);
        h.finish()
    }
}

/// `x * y / 255` with round-to-nearest.
pub(crate) fn mul_div255(x: u32, y: u32) -> u32 {
    (x * y + 127) / 255
}

pub(crate) fn mul_div255_u8(x: u8, y: u8) -> u8 {
    mul_div255(u32::from(x), u32::from(y)) as u8
}

/// `v / 255` with round-to-nearest, for sums that are already scaled by 255.
pub(crate) fn div255_round(v: u32) -> u32 {
    (v + 127) / 255
}

pub(crate) fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

// ARGB (0xAARRGGBB) channel access. This is the working pixel format of the VM.

#[inline]
pub(crate) fn argb_a(p: u32) -> u8 {
    (p >> 24) as u8
}

#[inline]
pub(crate) fn argb_r(p: u32) -> u8 {
    (p >> 16) as u8
}

#[inline]
pub(crate) fn argb_g(p: u32) -> u8 {
    (p >> 8) as u8
}

#[inline]
pub(crate) fn argb_b(p: u32) -> u8 {
    p as u8
}

#[inline]
pub(crate) fn pack_argb(a: u8, r: u8, g: u8, b: u8) -> u32 {
    (u32::from(a) << 24) | (u32::from(r) << 16) | (u32::from(g) << 8) | u32::from(b)
}

/// Convert ARGB words into tightly packed RGBA8 bytes.
pub(crate) fn argb_to_rgba8(pixels: &[u32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(pixels.len() * 4);
    for &p in pixels {
        out.extend_from_slice(&[argb_r(p), argb_g(p), argb_b(p), argb_a(p)]);
    }
    out
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/math.rs"]
mod tests;
