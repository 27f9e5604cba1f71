use std::collections::HashMap;

use smallvec::SmallVec;

use crate::program::bytecode::{AnimParams, Instr, Op, Reader, SrcRef};
use crate::program::error::VmError;
use crate::program::raster::{self, Image};

/// Largest image (in pixels) any single operation may produce.
pub const MAX_IMAGE_PIXELS: u64 = 1 << 26;

/// Nesting limit for `Sub` sources, including bytecode that did not come from the compiler.
pub(crate) const MAX_SUB_DEPTH: usize = 64;

/// Read-only view of a raw texture handed to the VM by a provider.
///
/// The VM copies what it needs and never keeps the borrow past the call.
#[derive(Debug, Clone, Copy)]
pub struct TextureView<'a> {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// At least `width * height` ARGB pixels, row-major.
    pub pixels: &'a [u32],
}

/// Execute the main program in `code` (from byte 0 up to its `End`).
///
/// Pure in `(code, provider, time_seconds)`: the texture and sub-program caches live only
/// for this call.
pub(crate) fn run<'p>(
    code: &[u8],
    provider: impl FnMut(u32) -> Option<TextureView<'p>>,
    time_seconds: f64,
) -> Result<Image, VmError> {
    let mut vm = Vm {
        code,
        provider,
        time_seconds,
        tex_cache: HashMap::new(),
        sub_cache: HashMap::new(),
        active: SmallVec::new(),
    };
    vm.exec(0, code.len())
}

struct Vm<'c, P> {
    code: &'c [u8],
    provider: P,
    time_seconds: f64,
    tex_cache: HashMap<u32, Image>,
    sub_cache: HashMap<(u32, u32), Image>,
    active: SmallVec<[(u32, u32); 8]>,
}

fn check_size(width: u32, height: u32) -> Result<(), VmError> {
    if u64::from(width) * u64::from(height) > MAX_IMAGE_PIXELS {
        return Err(VmError::ImageTooLarge { width, height });
    }
    Ok(())
}

fn nonzero(w: u16, h: u16, at: usize, what: &str) -> Result<(), VmError> {
    if w == 0 || h == 0 {
        return Err(VmError::InvalidOperand {
            at,
            message: format!("{what} has a zero dimension ({w}x{h})"),
        });
    }
    Ok(())
}

fn base<'i>(cur: &'i mut Option<Image>, op: Op, at: usize) -> Result<&'i mut Image, VmError> {
    cur.as_mut().ok_or(VmError::MissingBase {
        op: op.mnemonic(),
        at,
    })
}

fn check_anim(params: &AnimParams, sheet: &Image) -> Result<(), VmError> {
    let (fw, fh, _) = raster::frame_layout(sheet.width, sheet.height, params);
    check_size(fw, fh)
}

impl<'p, P> Vm<'_, P>
where
    P: FnMut(u32) -> Option<TextureView<'p>>,
{
    fn exec(&mut self, start: usize, end: usize) -> Result<Image, VmError> {
        let code = self.code;
        let mut r = Reader::new(code, start, end);
        let mut cur: Option<Image> = None;

        loop {
            if r.at_end() {
                return Err(VmError::TruncatedBytecode { at: r.pos() });
            }
            let (at, instr) = r.next_instr()?;
            match instr {
                Instr::End => {
                    return cur.ok_or(VmError::MissingBase {
                        op: Op::End.mnemonic(),
                        at,
                    });
                }
                Instr::BaseTex(src) => cur = Some(self.load(src)?),
                Instr::BaseFill { w, h, argb } => {
                    nonzero(w, h, at, "fill")?;
                    check_size(u32::from(w), u32::from(h))?;
                    cur = Some(Image::solid(u32::from(w), u32::from(h), argb));
                }
                Instr::BaseAnim { src, params } => {
                    let sheet = self.load(src)?;
                    check_anim(&params, &sheet)?;
                    cur = Some(raster::animate(&sheet, &params, self.time_seconds));
                }
                Instr::Resize { w, h } => {
                    let img = base(&mut cur, Op::Resize, at)?;
                    nonzero(w, h, at, "resize")?;
                    check_size(u32::from(w), u32::from(h))?;
                    *img = raster::resize_nn(img, u32::from(w), u32::from(h));
                }
                Instr::Transform(t) => {
                    let img = base(&mut cur, Op::Transform, at)?;
                    *img = raster::transform(img, t);
                }
                Instr::Opacity(k) => raster::opacity(base(&mut cur, Op::Opacity, at)?, k),
                Instr::NoAlpha => raster::no_alpha(base(&mut cur, Op::NoAlpha, at)?),
                Instr::MakeAlpha { r: kr, g, b } => {
                    raster::make_alpha(base(&mut cur, Op::MakeAlpha, at)?, kr, g, b);
                }
                Instr::Invert(mask) => raster::invert(base(&mut cur, Op::Invert, at)?, mask),
                Instr::Brighten => raster::brighten(base(&mut cur, Op::Brighten, at)?),
                Instr::Contrast {
                    contrast,
                    brightness,
                } => raster::contrast(base(&mut cur, Op::Contrast, at)?, contrast, brightness),
                Instr::Multiply(c) => raster::multiply(base(&mut cur, Op::Multiply, at)?, c),
                Instr::Screen(c) => raster::screen(base(&mut cur, Op::Screen, at)?, c),
                Instr::Colorize { argb, ratio } => {
                    raster::colorize(base(&mut cur, Op::Colorize, at)?, argb, ratio);
                }
                Instr::Anim(params) => {
                    let sheet = base(&mut cur, Op::Anim, at)?;
                    check_anim(&params, sheet)?;
                    *sheet = raster::animate(sheet, &params, self.time_seconds);
                }
                Instr::Overlay(src) => {
                    let over = self.load(src)?;
                    match cur.as_mut() {
                        // Without a base, overlay adopts its source.
                        None => cur = Some(over),
                        Some(img) => {
                            let over = raster::resize_if_needed(over, img.width, img.height);
                            raster::alpha_over(img, &over);
                        }
                    }
                }
                Instr::Mask(src) => {
                    base(&mut cur, Op::Mask, at)?;
                    let m = self.load(src)?;
                    let img = base(&mut cur, Op::Mask, at)?;
                    let m = raster::resize_if_needed(m, img.width, img.height);
                    raster::apply_mask(img, &m);
                }
                Instr::LowPart { percent, src } => {
                    base(&mut cur, Op::LowPart, at)?;
                    let over = self.load(src)?;
                    let img = base(&mut cur, Op::LowPart, at)?;
                    let over = raster::resize_if_needed(over, img.width, img.height);
                    raster::lowpart(img, &over, percent);
                }
                Instr::Combine { w, h, parts } => {
                    nonzero(w, h, at, "combine canvas")?;
                    check_size(u32::from(w), u32::from(h))?;
                    let mut canvas = Image::solid(u32::from(w), u32::from(h), 0);
                    for part in &parts {
                        let img = self.load(part.src)?;
                        raster::overlay_at(&mut canvas, &img, u32::from(part.x), u32::from(part.y));
                    }
                    cur = Some(canvas);
                }
            }
        }
    }

    fn load(&mut self, src: SrcRef) -> Result<Image, VmError> {
        match src {
            SrcRef::TexId(id) => self.load_tex(id),
            SrcRef::Sub { offset, len } => self.load_sub(offset, len),
        }
    }

    fn load_tex(&mut self, id: u32) -> Result<Image, VmError> {
        if let Some(img) = self.tex_cache.get(&id) {
            return Ok(img.clone());
        }
        let view = (self.provider)(id).ok_or(VmError::MissingTexture { id })?;
        let n = view.width as usize * view.height as usize;
        if n == 0 || view.pixels.len() < n {
            return Err(VmError::MissingTexture { id });
        }
        let img = Image {
            width: view.width,
            height: view.height,
            pixels: view.pixels[..n].to_vec(),
        };
        self.tex_cache.insert(id, img.clone());
        Ok(img)
    }

    fn load_sub(&mut self, offset: u32, len: u32) -> Result<Image, VmError> {
        if let Some(img) = self.sub_cache.get(&(offset, len)) {
            return Ok(img.clone());
        }
        let start = offset as usize;
        let end = start + len as usize;
        if len == 0 || end > self.code.len() {
            return Err(VmError::SubRangeOutOfBounds {
                offset,
                len,
                code_len: self.code.len(),
            });
        }
        if self.active.contains(&(offset, len)) {
            return Err(VmError::RecursiveSubProgram { offset, len });
        }
        if self.active.len() >= MAX_SUB_DEPTH {
            return Err(VmError::SubProgramTooDeep {
                limit: MAX_SUB_DEPTH,
            });
        }

        self.active.push((offset, len));
        let result = self.exec(start, end);
        self.active.pop();

        let img = result?;
        self.sub_cache.insert((offset, len), img.clone());
        Ok(img)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/program/vm.rs"]
mod tests;
