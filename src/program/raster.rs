//! CPU raster operations over ARGB (`0xAARRGGBB`) images.
//!
//! Every function here is total: sizes are validated by the VM before calling in, and
//! out-of-range source pixels read as transparent black.

use crate::foundation::math::{
    argb_a, argb_b, argb_g, argb_r, clamp_u8, div255_round, mul_div255, mul_div255_u8, pack_argb,
};
use crate::program::bytecode::{
    ANIM_GRID, ANIM_HORIZONTAL, ANIM_SMOOTH, AnimParams, DEFAULT_ANIM_FPS_Q,
};

/// A baked image in the VM working format (ARGB, row-major, tightly packed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// `width * height` ARGB pixels.
    pub pixels: Vec<u32>,
}

impl Image {
    /// Solid `width x height` image.
    pub fn solid(width: u32, height: u32, argb: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![argb; width as usize * height as usize],
        }
    }

    /// Pixel at `(x, y)`. Panics when out of bounds.
    pub fn get(&self, x: u32, y: u32) -> u32 {
        self.pixels[y as usize * self.width as usize + x as usize]
    }

    fn map_pixels(&mut self, f: impl Fn(u32) -> u32) {
        for p in &mut self.pixels {
            *p = f(*p);
        }
    }
}

/// Nearest-neighbour resize: `sx = x * src_w / new_w`.
pub(crate) fn resize_nn(src: &Image, nw: u32, nh: u32) -> Image {
    let mut dst = Image::solid(nw, nh, 0);
    if src.width == 0 || src.height == 0 {
        return dst;
    }
    for y in 0..nh {
        let sy = (u64::from(y) * u64::from(src.height) / u64::from(nh)) as u32;
        for x in 0..nw {
            let sx = (u64::from(x) * u64::from(src.width) / u64::from(nw)) as u32;
            dst.pixels[y as usize * nw as usize + x as usize] = src.get(sx, sy);
        }
    }
    dst
}

pub(crate) fn resize_if_needed(img: Image, w: u32, h: u32) -> Image {
    if img.width == w && img.height == h {
        img
    } else {
        resize_nn(&img, w, h)
    }
}

/// One of the eight square-symmetry orientations. `t` is taken modulo 8.
pub(crate) fn transform(src: &Image, t: u8) -> Image {
    let (w, h) = (src.width, src.height);
    let t = t & 7;
    if t == 0 || w == 0 || h == 0 {
        return src.clone();
    }
    let swapped = t & 1 == 1;
    let (dw, dh) = if swapped { (h, w) } else { (w, h) };
    let mut dst = Image::solid(dw, dh, 0);
    for y in 0..dh {
        for x in 0..dw {
            let (sx, sy) = match t {
                1 => (y, h - 1 - x),
                2 => (w - 1 - x, h - 1 - y),
                3 => (w - 1 - y, x),
                4 => (w - 1 - x, y),
                5 => (w - 1 - y, h - 1 - x),
                6 => (x, h - 1 - y),
                _ => (y, x),
            };
            dst.pixels[y as usize * dw as usize + x as usize] = src.get(sx, sy);
        }
    }
    dst
}

/// Premultiplied "over" of `o` onto `b`, both stored non-premultiplied.
pub(crate) fn blend_over(b: u32, o: u32) -> u32 {
    let (ba, oa) = (u32::from(argb_a(b)), u32::from(argb_a(o)));
    let inv = 255 - oa;
    let out_a = oa + mul_div255(ba, inv);
    if out_a == 0 {
        return 0;
    }
    let channel = |bc: u8, oc: u8| -> u8 {
        let bp = mul_div255(u32::from(bc), ba);
        let op = mul_div255(u32::from(oc), oa);
        let p = op + mul_div255(bp, inv);
        ((p * 255 + out_a / 2) / out_a).min(255) as u8
    };
    pack_argb(
        out_a.min(255) as u8,
        channel(argb_r(b), argb_r(o)),
        channel(argb_g(b), argb_g(o)),
        channel(argb_b(b), argb_b(o)),
    )
}

/// `over` must already match `base` in size.
pub(crate) fn alpha_over(base: &mut Image, over: &Image) {
    for (b, &o) in base.pixels.iter_mut().zip(&over.pixels) {
        *b = blend_over(*b, o);
    }
}

/// Blit `src` over `dst` with its top-left corner at `(ox, oy)`, clipping to `dst`.
pub(crate) fn overlay_at(dst: &mut Image, src: &Image, ox: u32, oy: u32) {
    for y in 0..src.height {
        let dy = u64::from(oy) + u64::from(y);
        if dy >= u64::from(dst.height) {
            break;
        }
        for x in 0..src.width {
            let dx = u64::from(ox) + u64::from(x);
            if dx >= u64::from(dst.width) {
                break;
            }
            let di = dy as usize * dst.width as usize + dx as usize;
            dst.pixels[di] = blend_over(dst.pixels[di], src.get(x, y));
        }
    }
}

/// Blend `over` into the bottom `percent`% of rows of `base`.
pub(crate) fn lowpart(base: &mut Image, over: &Image, percent: u8) {
    let pct = u32::from(percent.min(100));
    let start_y = base.height - (base.height * pct) / 100;
    let w = base.width as usize;
    for y in start_y as usize..base.height as usize {
        for i in y * w..(y + 1) * w {
            base.pixels[i] = blend_over(base.pixels[i], over.pixels[i]);
        }
    }
}

/// `a = a * mask_a / 255`; `mask` must already match `base` in size.
pub(crate) fn apply_mask(base: &mut Image, mask: &Image) {
    for (b, &m) in base.pixels.iter_mut().zip(&mask.pixels) {
        let a = mul_div255_u8(argb_a(*b), argb_a(m));
        *b = pack_argb(a, argb_r(*b), argb_g(*b), argb_b(*b));
    }
}

pub(crate) fn opacity(img: &mut Image, k: u8) {
    img.map_pixels(|p| pack_argb(mul_div255_u8(argb_a(p), k), argb_r(p), argb_g(p), argb_b(p)));
}

pub(crate) fn no_alpha(img: &mut Image) {
    img.map_pixels(|p| p | 0xFF00_0000);
}

/// Pixels whose RGB equals the key become fully transparent.
pub(crate) fn make_alpha(img: &mut Image, r: u8, g: u8, b: u8) {
    let key = pack_argb(0, r, g, b);
    img.map_pixels(|p| if p & 0x00FF_FFFF == key { key } else { p });
}

/// `mask` bits: r=1 g=2 b=4 a=8.
pub(crate) fn invert(img: &mut Image, mask: u8) {
    let mut xor = 0u32;
    if mask & 1 != 0 {
        xor |= 0x00FF_0000;
    }
    if mask & 2 != 0 {
        xor |= 0x0000_FF00;
    }
    if mask & 4 != 0 {
        xor |= 0x0000_00FF;
    }
    if mask & 8 != 0 {
        xor |= 0xFF00_0000;
    }
    img.map_pixels(|p| p ^ xor);
}

pub(crate) fn brighten(img: &mut Image) {
    let f = |c: u8| c + (255 - c) / 3;
    img.map_pixels(|p| pack_argb(argb_a(p), f(argb_r(p)), f(argb_g(p)), f(argb_b(p))));
}

pub(crate) fn contrast(img: &mut Image, c: i16, brightness: i16) {
    let cc = f64::from(c.clamp(-127, 127));
    let factor = (259.0 * (cc + 255.0)) / (255.0 * (259.0 - cc));
    let br = i32::from(brightness);
    let f = |v: u8| clamp_u8((factor * (f64::from(v) - 128.0) + 128.0) as i32 + br);
    img.map_pixels(|p| pack_argb(argb_a(p), f(argb_r(p)), f(argb_g(p)), f(argb_b(p))));
}

pub(crate) fn multiply(img: &mut Image, color: u32) {
    let (kr, kg, kb) = (argb_r(color), argb_g(color), argb_b(color));
    img.map_pixels(|p| {
        pack_argb(
            argb_a(p),
            mul_div255_u8(argb_r(p), kr),
            mul_div255_u8(argb_g(p), kg),
            mul_div255_u8(argb_b(p), kb),
        )
    });
}

pub(crate) fn screen(img: &mut Image, color: u32) {
    let f = |c: u8, k: u8| 255 - mul_div255_u8(255 - c, 255 - k);
    let (kr, kg, kb) = (argb_r(color), argb_g(color), argb_b(color));
    img.map_pixels(|p| {
        pack_argb(
            argb_a(p),
            f(argb_r(p), kr),
            f(argb_g(p), kg),
            f(argb_b(p), kb),
        )
    });
}

pub(crate) fn colorize(img: &mut Image, color: u32, ratio: u8) {
    let r = u32::from(ratio);
    let f = |c: u8, k: u8| div255_round(u32::from(c) * (255 - r) + u32::from(k) * r) as u8;
    let (kr, kg, kb) = (argb_r(color), argb_g(color), argb_b(color));
    img.map_pixels(|p| {
        pack_argb(
            argb_a(p),
            f(argb_r(p), kr),
            f(argb_g(p), kg),
            f(argb_b(p), kb),
        )
    });
}

/// Frame size and count of a sprite sheet under `params`.
///
/// Zero frame sizes fall back to the sheet size; a zero frame count is derived from the
/// layout and is at least 1.
pub(crate) fn frame_layout(sheet_w: u32, sheet_h: u32, params: &AnimParams) -> (u32, u32, u32) {
    let fw = if params.frame_w > 0 {
        u32::from(params.frame_w)
    } else {
        sheet_w
    };
    let fh = if params.frame_h > 0 {
        u32::from(params.frame_h)
    } else {
        sheet_h
    };
    let count = if params.frames > 0 {
        u32::from(params.frames)
    } else if fw == 0 || fh == 0 {
        1
    } else if params.flags & ANIM_GRID != 0 {
        (sheet_w / fw) * (sheet_h / fh)
    } else if params.flags & ANIM_HORIZONTAL != 0 {
        sheet_w / fw
    } else {
        sheet_h / fh
    };
    (fw, fh, count.max(1))
}

/// Scaled time `max(0, t * fps)` for an 8.8 fixed-point frame rate. Zero means the default.
pub(crate) fn frame_time(time_seconds: f64, fps_q: u16) -> f64 {
    let fps_q = if fps_q == 0 { DEFAULT_ANIM_FPS_Q } else { fps_q };
    let ft = time_seconds * f64::from(fps_q) / 256.0;
    if ft.is_finite() && ft > 0.0 { ft } else { 0.0 }
}

/// `(frame index, fractional progress toward the next frame)`.
pub(crate) fn frame_position(time_seconds: f64, fps_q: u16, count: u32) -> (u32, f64) {
    let ft = frame_time(time_seconds, fps_q);
    let whole = ft.floor();
    let idx = (whole as u64 % u64::from(count.max(1))) as u32;
    (idx, ft - whole)
}

/// Cut frame `index` out of `sheet`. Pixels outside the sheet read as 0.
pub(crate) fn crop_frame(sheet: &Image, index: u32, fw: u32, fh: u32, flags: u8) -> Image {
    let mut out = Image::solid(fw, fh, 0);
    if fw == 0 || fh == 0 {
        return out;
    }
    let (base_x, base_y) = if flags & ANIM_GRID != 0 {
        let cols = sheet.width / fw;
        let rows = sheet.height / fh;
        if cols == 0 || rows == 0 || index / cols >= rows {
            return out;
        }
        (
            u64::from(index % cols) * u64::from(fw),
            u64::from(index / cols) * u64::from(fh),
        )
    } else if flags & ANIM_HORIZONTAL != 0 {
        (u64::from(index) * u64::from(fw), 0)
    } else {
        (0, u64::from(index) * u64::from(fh))
    };

    for y in 0..fh {
        let sy = base_y + u64::from(y);
        if sy >= u64::from(sheet.height) {
            break;
        }
        for x in 0..fw {
            let sx = base_x + u64::from(x);
            if sx >= u64::from(sheet.width) {
                break;
            }
            out.pixels[y as usize * fw as usize + x as usize] = sheet.get(sx as u32, sy as u32);
        }
    }
    out
}

/// Per-channel `a + (b - a) * t`, truncated. `t <= 0` keeps `a`, `t >= 1` copies `b`,
/// mismatched sizes keep `a`.
pub(crate) fn lerp(a: &mut Image, b: &Image, t: f64) {
    if t <= 0.0 || t.is_nan() {
        return;
    }
    if t >= 1.0 {
        *a = b.clone();
        return;
    }
    if a.width != b.width || a.height != b.height {
        return;
    }
    let mix = |x: u8, y: u8| {
        let (x, y) = (f64::from(x), f64::from(y));
        clamp_u8((x + (y - x) * t) as i32)
    };
    for (pa, &pb) in a.pixels.iter_mut().zip(&b.pixels) {
        *pa = pack_argb(
            mix(argb_a(*pa), argb_a(pb)),
            mix(argb_r(*pa), argb_r(pb)),
            mix(argb_g(*pa), argb_g(pb)),
            mix(argb_b(*pa), argb_b(pb)),
        );
    }
}

/// Extract the current (and, when smooth, interpolated) frame of `sheet` at `time_seconds`.
pub(crate) fn animate(sheet: &Image, params: &AnimParams, time_seconds: f64) -> Image {
    let (fw, fh, count) = frame_layout(sheet.width, sheet.height, params);
    let (idx, frac) = frame_position(time_seconds, params.fps_q, count);
    let mut cur = crop_frame(sheet, idx, fw, fh, params.flags);
    if params.flags & ANIM_SMOOTH != 0 {
        let next = crop_frame(sheet, (idx + 1) % count, fw, fh, params.flags);
        lerp(&mut cur, &next, frac);
    }
    cur
}

#[cfg(test)]
#[path = "../../tests/unit/program/raster.rs"]
mod tests;
