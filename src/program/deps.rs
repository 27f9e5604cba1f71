//! Static analysis over bytecode. Mirrors the VM's opcode table without touching pixels.

use smallvec::SmallVec;

use crate::foundation::error::{TexPipeError, TexPipeResult};
use crate::program::bytecode::{AnimParams, Instr, MAX_U24, Reader, SrcRef, write_u24};
use crate::program::error::DecodeError;
use crate::program::vm::MAX_SUB_DEPTH;

/// Animation parameters found in a program, as needed for frame-change detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnimSpec {
    /// Sheet texture for a `BaseAnim` over a raw texture. `None` for stage animations and
    /// sheets produced by sub-programs, whose size is only known at bake time.
    pub tex: Option<u32>,
    /// Frame width, 0 for the sheet width.
    pub frame_w: u16,
    /// Frame height, 0 for the sheet height.
    pub frame_h: u16,
    /// Frame count, 0 to derive it from the sheet.
    pub frame_count: u16,
    /// Frames per second in 8.8 fixed point.
    pub fps_q: u16,
    /// `ANIM_*` flags.
    pub flags: u8,
}

impl AnimSpec {
    pub(crate) fn params(&self) -> AnimParams {
        AnimParams {
            frame_w: self.frame_w,
            frame_h: self.frame_h,
            frames: self.frame_count,
            fps_q: self.fps_q,
            flags: self.flags,
        }
    }
}

fn sources(instr: &Instr) -> SmallVec<[SrcRef; 4]> {
    let mut out = SmallVec::new();
    match instr {
        Instr::BaseTex(src)
        | Instr::Overlay(src)
        | Instr::Mask(src)
        | Instr::BaseAnim { src, .. }
        | Instr::LowPart { src, .. } => out.push(*src),
        Instr::Combine { parts, .. } => out.extend(parts.iter().map(|p| p.src)),
        _ => {}
    }
    out
}

#[derive(Debug)]
enum WalkError {
    Decode(DecodeError),
    BadSub { offset: u32, len: u32 },
    TooDeep,
}

/// Visit every instruction reachable from `code[start..end]`, descending into `Sub` ranges.
///
/// Each range is walked once. In lenient mode malformed bytecode simply ends the walk of the
/// range it occurs in.
struct Walker<'c, F> {
    code: &'c [u8],
    strict: bool,
    visited: Vec<(u32, u32)>,
    visit: F,
}

impl<F> Walker<'_, F>
where
    F: FnMut(&Instr, &[usize]),
{
    fn walk(&mut self, start: usize, end: usize, depth: usize) -> Result<(), WalkError> {
        let mut r = Reader::new(self.code, start, end);
        while !r.at_end() {
            let instr = match r.next_instr() {
                Ok((_, instr)) => instr,
                Err(e) if self.strict => return Err(WalkError::Decode(e)),
                Err(_) => return Ok(()),
            };
            (self.visit)(&instr, r.tex_sites());
            if matches!(instr, Instr::End) {
                return Ok(());
            }
            for src in sources(&instr) {
                let SrcRef::Sub { offset, len } = src else {
                    continue;
                };
                if self.visited.contains(&(offset, len)) {
                    continue;
                }
                let s = offset as usize;
                let e = s + len as usize;
                if len == 0 || e > self.code.len() {
                    if self.strict {
                        return Err(WalkError::BadSub { offset, len });
                    }
                    continue;
                }
                if depth + 1 > MAX_SUB_DEPTH {
                    if self.strict {
                        return Err(WalkError::TooDeep);
                    }
                    continue;
                }
                self.visited.push((offset, len));
                self.walk(s, e, depth + 1)?;
            }
        }
        if self.strict {
            return Err(WalkError::Decode(DecodeError::Truncated { at: r.pos() }));
        }
        Ok(())
    }
}

fn walk_program(
    code: &[u8],
    strict: bool,
    visit: impl FnMut(&Instr, &[usize]),
) -> Result<(), WalkError> {
    let mut w = Walker {
        code,
        strict,
        visited: Vec::new(),
        visit,
    };
    w.walk(0, code.len(), 0)
}

/// Raw texture ids the program reads, deduplicated, in first-seen order.
pub(crate) fn dependencies(code: &[u8]) -> SmallVec<[u32; 8]> {
    let mut deps: SmallVec<[u32; 8]> = SmallVec::new();
    // Lenient walks never fail.
    let _ = walk_program(code, false, |instr, _| {
        for src in sources(instr) {
            if let SrcRef::TexId(id) = src
                && !deps.contains(&id)
            {
                deps.push(id);
            }
        }
    });
    deps
}

pub(crate) fn animation_specs(code: &[u8]) -> Vec<AnimSpec> {
    let mut specs = Vec::new();
    let _ = walk_program(code, false, |instr, _| {
        let (tex, p) = match instr {
            Instr::BaseAnim {
                src: SrcRef::TexId(id),
                params,
            } => (Some(*id), params),
            Instr::BaseAnim { params, .. } | Instr::Anim(params) => (None, params),
            _ => return,
        };
        specs.push(AnimSpec {
            tex,
            frame_w: p.frame_w,
            frame_h: p.frame_h,
            frame_count: p.frames,
            fps_q: p.fps_q,
            flags: p.flags,
        });
    });
    specs
}

/// Offsets of every reachable `TexId` field. Fails on malformed bytecode.
pub(crate) fn tex_id_sites(code: &[u8]) -> TexPipeResult<Vec<usize>> {
    let mut sites = Vec::new();
    walk_program(code, true, |_, s| sites.extend_from_slice(s)).map_err(|e| match e {
        WalkError::Decode(d) => TexPipeError::input(format!("malformed bytecode: {d}")),
        WalkError::BadSub { offset, len } => TexPipeError::input(format!(
            "malformed bytecode: sub-program {offset}+{len} is out of range"
        )),
        WalkError::TooDeep => TexPipeError::input(format!(
            "malformed bytecode: sub-programs nested deeper than {MAX_SUB_DEPTH} levels"
        )),
    })?;
    sites.sort_unstable();
    sites.dedup();
    Ok(sites)
}

/// Rewrite every `TexId` as `remap[id]`. Nothing is written unless every id maps.
pub(crate) fn remap_tex_ids(code: &mut [u8], remap: &[u32]) -> TexPipeResult<()> {
    let sites = tex_id_sites(code)?;
    let mut new_ids = Vec::with_capacity(sites.len());
    for &at in &sites {
        let old = u32::from_le_bytes([code[at], code[at + 1], code[at + 2], 0]);
        let new = *remap.get(old as usize).ok_or_else(|| {
            TexPipeError::input(format!(
                "texture id {old} at byte {at} is outside the remap table ({} entries)",
                remap.len()
            ))
        })?;
        if new > MAX_U24 {
            return Err(TexPipeError::input(format!(
                "remapped texture id {new} does not fit in 24 bits"
            )));
        }
        new_ids.push(new);
    }
    for (&at, &id) in sites.iter().zip(&new_ids) {
        write_u24(code, at, id);
    }
    Ok(())
}

#[cfg(test)]
#[path = "../../tests/unit/program/deps.rs"]
mod tests;
