use std::fmt::Write as _;

use smallvec::SmallVec;

use crate::program::compile::Patch;
use crate::program::error::DecodeError;

/// Upper bound for a compiled program, sub-program arena included.
pub const MAX_CODE_BYTES: usize = 65537;

/// `fps_q` used when a DSL animation gives no frame rate (8 fps in 8.8 fixed point).
pub const DEFAULT_ANIM_FPS_Q: u16 = 8 * 256;

/// Largest value a 24-bit operand can hold.
pub(crate) const MAX_U24: u32 = 0x00FF_FFFF;

/// Interpolate toward the next frame.
pub const ANIM_SMOOTH: u8 = 1;
/// Frames are laid out left to right.
pub const ANIM_HORIZONTAL: u8 = 2;
/// Frames are laid out in rows, left to right then top to bottom.
pub const ANIM_GRID: u8 = 4;

pub(crate) const SRC_KIND_TEX: u8 = 0;
pub(crate) const SRC_KIND_SUB: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum Op {
    End = 0,
    BaseTex = 1,
    BaseFill = 2,
    BaseAnim = 3,

    Resize = 10,
    Transform = 11,
    Opacity = 12,
    NoAlpha = 13,
    MakeAlpha = 14,
    Invert = 15,
    Brighten = 16,
    Contrast = 17,
    Multiply = 18,
    Screen = 19,
    Colorize = 20,
    Anim = 21,

    Overlay = 30,
    Mask = 31,
    LowPart = 32,

    Combine = 40,
}

impl Op {
    pub(crate) fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Op::End,
            1 => Op::BaseTex,
            2 => Op::BaseFill,
            3 => Op::BaseAnim,
            10 => Op::Resize,
            11 => Op::Transform,
            12 => Op::Opacity,
            13 => Op::NoAlpha,
            14 => Op::MakeAlpha,
            15 => Op::Invert,
            16 => Op::Brighten,
            17 => Op::Contrast,
            18 => Op::Multiply,
            19 => Op::Screen,
            20 => Op::Colorize,
            21 => Op::Anim,
            30 => Op::Overlay,
            31 => Op::Mask,
            32 => Op::LowPart,
            40 => Op::Combine,
            _ => return None,
        })
    }

    pub(crate) fn mnemonic(self) -> &'static str {
        match self {
            Op::End => "end",
            Op::BaseTex => "base_tex",
            Op::BaseFill => "base_fill",
            Op::BaseAnim => "base_anim",
            Op::Resize => "resize",
            Op::Transform => "transform",
            Op::Opacity => "opacity",
            Op::NoAlpha => "noalpha",
            Op::MakeAlpha => "make_alpha",
            Op::Invert => "invert",
            Op::Brighten => "brighten",
            Op::Contrast => "contrast",
            Op::Multiply => "multiply",
            Op::Screen => "screen",
            Op::Colorize => "colorize",
            Op::Anim => "anim",
            Op::Overlay => "overlay",
            Op::Mask => "mask",
            Op::LowPart => "lowpart",
            Op::Combine => "combine",
        }
    }
}

/// Where an image operand comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SrcRef {
    /// A raw texture, by id.
    TexId(u32),
    /// An embedded sub-program occupying `code[offset..offset + len]`.
    Sub {
        /// Absolute byte offset of the sub-program.
        offset: u32,
        /// Length in bytes, terminating `End` included.
        len: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AnimParams {
    pub(crate) frame_w: u16,
    pub(crate) frame_h: u16,
    pub(crate) frames: u16,
    pub(crate) fps_q: u16,
    pub(crate) flags: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CombinePart {
    pub(crate) x: u16,
    pub(crate) y: u16,
    pub(crate) src: SrcRef,
}

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Instr {
    End,
    BaseTex(SrcRef),
    BaseFill {
        w: u16,
        h: u16,
        argb: u32,
    },
    BaseAnim {
        src: SrcRef,
        params: AnimParams,
    },
    Resize {
        w: u16,
        h: u16,
    },
    Transform(u8),
    Opacity(u8),
    NoAlpha,
    MakeAlpha {
        r: u8,
        g: u8,
        b: u8,
    },
    Invert(u8),
    Brighten,
    Contrast {
        contrast: i16,
        brightness: i16,
    },
    Multiply(u32),
    Screen(u32),
    Colorize {
        argb: u32,
        ratio: u8,
    },
    Anim(AnimParams),
    Overlay(SrcRef),
    Mask(SrcRef),
    LowPart {
        percent: u8,
        src: SrcRef,
    },
    Combine {
        w: u16,
        h: u16,
        parts: SmallVec<[CombinePart; 4]>,
    },
}

/// Bounds-checked decoder over `code[start..end]`.
///
/// Every operand read checks the remaining length first. The offsets of the `TexId` fields in
/// the last decoded instruction are kept so callers can rewrite them in place.
pub(crate) struct Reader<'a> {
    code: &'a [u8],
    pos: usize,
    end: usize,
    tex_sites: SmallVec<[usize; 4]>,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(code: &'a [u8], start: usize, end: usize) -> Self {
        let end = end.min(code.len());
        Self {
            code,
            pos: start.min(end),
            end,
            tex_sites: SmallVec::new(),
        }
    }

    pub(crate) fn pos(&self) -> usize {
        self.pos
    }

    pub(crate) fn at_end(&self) -> bool {
        self.pos >= self.end
    }

    /// Offsets of the 24-bit `TexId` fields read by the last [`Reader::next_instr`] call.
    pub(crate) fn tex_sites(&self) -> &[usize] {
        &self.tex_sites
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.end - self.pos < n {
            return Err(DecodeError::Truncated { at: self.pos });
        }
        let s = &self.code[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u24(&mut self) -> Result<u32, DecodeError> {
        let b = self.take(3)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], 0]))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn src_ref(&mut self) -> Result<SrcRef, DecodeError> {
        let at = self.pos;
        match self.u8()? {
            SRC_KIND_TEX => {
                self.tex_sites.push(self.pos);
                Ok(SrcRef::TexId(self.u24()?))
            }
            SRC_KIND_SUB => {
                let offset = self.u24()?;
                let len = self.u24()?;
                Ok(SrcRef::Sub { offset, len })
            }
            kind => Err(DecodeError::UnknownSrcKind { kind, at }),
        }
    }

    fn anim_params(&mut self) -> Result<AnimParams, DecodeError> {
        Ok(AnimParams {
            frame_w: self.u16()?,
            frame_h: self.u16()?,
            frames: self.u16()?,
            fps_q: self.u16()?,
            flags: self.u8()?,
        })
    }

    /// Decode the instruction at the cursor. Returns its start offset too.
    pub(crate) fn next_instr(&mut self) -> Result<(usize, Instr), DecodeError> {
        self.tex_sites.clear();
        let at = self.pos;
        let raw = self.u8()?;
        let op = Op::from_u8(raw).ok_or(DecodeError::UnknownOpcode { op: raw, at })?;
        let instr = match op {
            Op::End => Instr::End,
            Op::BaseTex => Instr::BaseTex(self.src_ref()?),
            Op::BaseFill => Instr::BaseFill {
                w: self.u16()?,
                h: self.u16()?,
                argb: self.u32()?,
            },
            Op::BaseAnim => Instr::BaseAnim {
                src: self.src_ref()?,
                params: self.anim_params()?,
            },
            Op::Resize => Instr::Resize {
                w: self.u16()?,
                h: self.u16()?,
            },
            Op::Transform => Instr::Transform(self.u8()?),
            Op::Opacity => Instr::Opacity(self.u8()?),
            Op::NoAlpha => Instr::NoAlpha,
            Op::MakeAlpha => Instr::MakeAlpha {
                r: self.u8()?,
                g: self.u8()?,
                b: self.u8()?,
            },
            Op::Invert => Instr::Invert(self.u8()?),
            Op::Brighten => Instr::Brighten,
            Op::Contrast => Instr::Contrast {
                contrast: i16::from(self.u8()?) - 127,
                brightness: i16::from(self.u8()?) - 127,
            },
            Op::Multiply => Instr::Multiply(self.u32()?),
            Op::Screen => Instr::Screen(self.u32()?),
            Op::Colorize => Instr::Colorize {
                argb: self.u32()?,
                ratio: self.u8()?,
            },
            Op::Anim => Instr::Anim(self.anim_params()?),
            Op::Overlay => Instr::Overlay(self.src_ref()?),
            Op::Mask => Instr::Mask(self.src_ref()?),
            Op::LowPart => Instr::LowPart {
                percent: self.u8()?,
                src: self.src_ref()?,
            },
            Op::Combine => {
                let w = self.u16()?;
                let h = self.u16()?;
                let n = self.u16()?;
                let mut parts = SmallVec::new();
                for _ in 0..n {
                    parts.push(CombinePart {
                        x: self.u16()?,
                        y: self.u16()?,
                        src: self.src_ref()?,
                    });
                }
                Instr::Combine { w, h, parts }
            }
        };
        Ok((at, instr))
    }
}

/// Append-only bytecode emitter.
#[derive(Debug, Default)]
pub(crate) struct CodeWriter {
    buf: Vec<u8>,
}

impl CodeWriter {
    pub(crate) fn len(&self) -> usize {
        self.buf.len()
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub(crate) fn op(&mut self, op: Op) {
        self.buf.push(op as u8);
    }

    pub(crate) fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub(crate) fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub(crate) fn u24(&mut self, v: u32) {
        debug_assert!(v <= MAX_U24);
        self.buf.extend_from_slice(&v.to_le_bytes()[..3]);
    }

    pub(crate) fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub(crate) fn anim_params(&mut self, p: AnimParams) {
        self.u16(p.frame_w);
        self.u16(p.frame_h);
        self.u16(p.frames);
        self.u16(p.fps_q);
        self.u8(p.flags);
    }

    /// `TexId` source with a zero id. Returns the offset of the id field.
    pub(crate) fn tex_placeholder(&mut self) -> usize {
        self.u8(SRC_KIND_TEX);
        let at = self.len();
        self.u24(0);
        at
    }

    /// `Sub` source with zero offset and length. Returns the offset of the offset field.
    pub(crate) fn sub_placeholder(&mut self) -> usize {
        self.u8(SRC_KIND_SUB);
        let at = self.len();
        self.u24(0);
        self.u24(0);
        at
    }

    pub(crate) fn patch_u24(&mut self, at: usize, v: u32) {
        write_u24(&mut self.buf, at, v);
    }

    pub(crate) fn append(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }
}

pub(crate) fn write_u24(code: &mut [u8], at: usize, v: u32) {
    code[at..at + 3].copy_from_slice(&v.to_le_bytes()[..3]);
}

fn fmt_src(out: &mut String, src: SrcRef, site: Option<usize>, patches: &[Patch]) {
    match src {
        SrcRef::TexId(id) => {
            let _ = write!(out, "tex#{id}");
            if let Some(p) = site.and_then(|s| patches.iter().find(|p| p.offset == s)) {
                let _ = write!(out, " ({:?})", p.name);
            }
        }
        SrcRef::Sub { offset, len } => {
            let _ = write!(out, "sub@{offset}+{len}");
        }
    }
}

fn fmt_anim(out: &mut String, p: &AnimParams) {
    let axis = if p.flags & ANIM_GRID != 0 {
        "grid"
    } else if p.flags & ANIM_HORIZONTAL != 0 {
        "horizontal"
    } else {
        "vertical"
    };
    let _ = write!(
        out,
        "frame={}x{} frames={} fps={:.2} axis={axis}{}",
        p.frame_w,
        p.frame_h,
        p.frames,
        f64::from(p.fps_q) / 256.0,
        if p.flags & ANIM_SMOOTH != 0 {
            " smooth"
        } else {
            ""
        }
    );
}

/// Human-readable listing of every instruction in `code`, sub-program arena included.
///
/// Decoding stops at the first malformed instruction, which is reported on the last line.
pub(crate) fn disassemble(code: &[u8], patches: &[Patch]) -> String {
    let mut out = String::new();
    let mut r = Reader::new(code, 0, code.len());
    let mut at_block_start = true;
    while !r.at_end() {
        if at_block_start && r.pos() != 0 {
            let _ = writeln!(out, "sub@{}:", r.pos());
        }
        let start = r.pos();
        let (at, instr) = match r.next_instr() {
            Ok(v) => v,
            Err(e) => {
                let _ = writeln!(out, "{start:05}  <error: {e}>");
                break;
            }
        };
        let sites: SmallVec<[usize; 4]> = SmallVec::from_slice(r.tex_sites());
        let mut site = sites.iter().copied();
        let mut line = String::new();
        let mnemonic = match code.get(at).copied().and_then(Op::from_u8) {
            Some(op) => op.mnemonic(),
            None => "?",
        };
        line.push_str(mnemonic);
        match &instr {
            Instr::End | Instr::NoAlpha | Instr::Brighten => {}
            Instr::BaseTex(src) | Instr::Overlay(src) | Instr::Mask(src) => {
                line.push(' ');
                fmt_src(&mut line, *src, site.next(), patches);
            }
            Instr::BaseFill { w, h, argb } => {
                let _ = write!(line, " {w}x{h} #{argb:08X}");
            }
            Instr::BaseAnim { src, params } => {
                line.push(' ');
                fmt_src(&mut line, *src, site.next(), patches);
                line.push(' ');
                fmt_anim(&mut line, params);
            }
            Instr::Resize { w, h } => {
                let _ = write!(line, " {w}x{h}");
            }
            Instr::Transform(t) | Instr::Opacity(t) => {
                let _ = write!(line, " {t}");
            }
            Instr::MakeAlpha { r, g, b } => {
                let _ = write!(line, " #{r:02X}{g:02X}{b:02X}");
            }
            Instr::Invert(mask) => {
                let _ = write!(line, " mask={mask:#06b}");
            }
            Instr::Contrast {
                contrast,
                brightness,
            } => {
                let _ = write!(line, " {contrast} {brightness}");
            }
            Instr::Multiply(c) | Instr::Screen(c) => {
                let _ = write!(line, " #{c:08X}");
            }
            Instr::Colorize { argb, ratio } => {
                let _ = write!(line, " #{argb:08X} ratio={ratio}");
            }
            Instr::Anim(params) => {
                line.push(' ');
                fmt_anim(&mut line, params);
            }
            Instr::LowPart { percent, src } => {
                let _ = write!(line, " {percent}% ");
                fmt_src(&mut line, *src, site.next(), patches);
            }
            Instr::Combine { w, h, parts } => {
                let _ = write!(line, " {w}x{h}");
                for part in parts {
                    let _ = write!(line, " [{},{} ", part.x, part.y);
                    let s = match part.src {
                        SrcRef::TexId(_) => site.next(),
                        SrcRef::Sub { .. } => None,
                    };
                    fmt_src(&mut line, part.src, s, patches);
                    line.push(']');
                }
            }
        }
        let _ = writeln!(out, "{at:05}  {line}");
        at_block_start = matches!(instr, Instr::End);
    }
    out
}

#[cfg(test)]
#[path = "../../tests/unit/program/bytecode.rs"]
mod tests;
