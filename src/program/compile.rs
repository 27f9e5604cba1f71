use std::collections::VecDeque;

use crate::foundation::error::{TexPipeError, TexPipeResult};
use crate::program::ast::{Arg, Base, Call, MAX_NESTING_DEPTH, Pipeline, Value};
use crate::program::bytecode::{
    ANIM_GRID, ANIM_HORIZONTAL, ANIM_SMOOTH, AnimParams, CodeWriter, DEFAULT_ANIM_FPS_Q,
    MAX_CODE_BYTES, MAX_U24, Op,
};
use crate::program::error::ParseError;
use crate::program::parser::parse_program;

/// A texture-name reference waiting for [`crate::TextureProgram::link`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    /// Offset of the 24-bit id field to overwrite.
    pub offset: usize,
    /// Texture name as written in the source.
    pub name: String,
}

#[derive(Debug, Clone)]
pub(crate) struct Compiled {
    pub(crate) code: Vec<u8>,
    pub(crate) patches: Vec<Patch>,
}

#[tracing::instrument(level = "trace", skip(src), fields(len = src.len()))]
pub(crate) fn compile_source(src: &str) -> TexPipeResult<Compiled> {
    let ast = parse_program(src)?;
    compile_pipeline(&ast)
}

/// Lay out `pipeline` as a main program followed by an arena of nested sub-programs.
///
/// Sub-programs are emitted breadth first after the main program's `End`. Each one ends
/// with its own `End`, and its `Sub` reference is patched with the absolute range.
pub(crate) fn compile_pipeline(pipeline: &Pipeline) -> TexPipeResult<Compiled> {
    let mut c = Compiler {
        w: CodeWriter::default(),
        patches: Vec::new(),
        queue: VecDeque::new(),
    };
    c.emit_pipeline(pipeline, 0)?;

    while let Some(job) = c.queue.pop_front() {
        let start = c.w.len();
        c.emit_pipeline(job.pipeline, job.depth)?;
        c.check_size()?;
        let len = c.w.len() - start;
        c.w.patch_u24(job.site, start as u32);
        c.w.patch_u24(job.site + 3, len as u32);
    }
    c.check_size()?;

    Ok(Compiled {
        code: c.w.into_bytes(),
        patches: c.patches,
    })
}

/// `#RRGGBB` or `#RRGGBBAA` to ARGB. Alpha defaults to 255.
pub(crate) fn parse_hex_color(s: &str) -> Option<u32> {
    let hex = s.strip_prefix('#')?;
    if !(hex.len() == 6 || hex.len() == 8) || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let v = u32::from_str_radix(hex, 16).ok()?;
    Some(if hex.len() == 6 {
        0xFF00_0000 | v
    } else {
        // RRGGBBAA -> AARRGGBB
        (v >> 8) | (v << 24)
    })
}

/// Axis argument to animation layout flags.
pub(crate) fn axis_flags(axis: &str) -> u8 {
    match axis.bytes().next().map(|b| b.to_ascii_lowercase()) {
        None | Some(b'g') => ANIM_GRID,
        Some(b'x') | Some(b'h') => ANIM_HORIZONTAL,
        Some(b'y') | Some(b'v') => 0,
        Some(_) => ANIM_GRID,
    }
}

struct PendingSub<'a> {
    site: usize,
    pipeline: &'a Pipeline,
    depth: usize,
}

struct Compiler<'a> {
    w: CodeWriter,
    patches: Vec<Patch>,
    queue: VecDeque<PendingSub<'a>>,
}

impl<'a> Compiler<'a> {
    fn check_size(&self) -> TexPipeResult<()> {
        if self.w.len() > MAX_CODE_BYTES {
            return Err(TexPipeError::compile(format!(
                "program is {} bytes, limit is {MAX_CODE_BYTES}",
                self.w.len()
            )));
        }
        Ok(())
    }

    fn emit_pipeline(&mut self, p: &'a Pipeline, depth: usize) -> TexPipeResult<()> {
        self.emit_base(&p.base, depth)?;
        for stage in &p.stages {
            self.emit_stage(stage, depth)?;
            // Bail out early on runaway inputs instead of growing without bound.
            self.check_size()?;
        }
        self.w.op(Op::End);
        Ok(())
    }

    fn emit_tex_name(&mut self, name: &str) {
        let offset = self.w.tex_placeholder();
        self.patches.push(Patch {
            offset,
            name: name.to_owned(),
        });
    }

    /// Emit a `SrcRef` for a texture-valued argument.
    fn emit_source(&mut self, arg: &'a Arg, op: &str, depth: usize) -> Result<(), ParseError> {
        match &arg.value {
            Value::Ident(name) | Value::Str(name) => {
                self.emit_tex_name(name);
                Ok(())
            }
            Value::Nested(inner) => {
                // A bare `tex(X)` needs no sub-program.
                if let (Base::Tex { name, .. }, true) = (&inner.base, inner.stages.is_empty()) {
                    self.emit_tex_name(name);
                    return Ok(());
                }
                if depth + 1 > MAX_NESTING_DEPTH {
                    return Err(ParseError::new(
                        arg.offset,
                        format!("nested tex() deeper than {MAX_NESTING_DEPTH} levels"),
                    ));
                }
                let site = self.w.sub_placeholder();
                self.queue.push_back(PendingSub {
                    site,
                    pipeline: inner,
                    depth: depth + 1,
                });
                Ok(())
            }
            Value::Int(_) => Err(ParseError::new(
                arg.offset,
                format!("{op}: expected a texture name or tex(...)"),
            )),
        }
    }

    fn emit_base(&mut self, base: &'a Base, depth: usize) -> TexPipeResult<()> {
        match base {
            Base::Tex { name, .. } => {
                self.w.op(Op::BaseTex);
                self.emit_tex_name(name);
            }
            Base::Fill {
                width,
                height,
                color,
                offset,
            } => {
                let w = dim(*width, *offset, "fill width")?;
                let h = dim(*height, *offset, "fill height")?;
                let argb = parse_hex_color(color).ok_or_else(|| {
                    ParseError::new(*offset, format!("invalid fill color '{color}'"))
                })?;
                self.w.op(Op::BaseFill);
                self.w.u16(w);
                self.w.u16(h);
                self.w.u32(argb);
            }
            Base::Anim(call) => {
                check_args(call, ANIM_BASE_NAMES, 6)?;
                let src = call
                    .arg(&["tex"], Some(0))
                    .ok_or_else(|| ParseError::new(call.offset, "anim: missing texture"))?;
                let params = anim_params(call, 1)?;
                self.w.op(Op::BaseAnim);
                self.emit_source(src, "anim", depth)?;
                self.w.anim_params(params);
            }
            Base::Combine(call) => self.emit_combine(call, depth)?,
        }
        Ok(())
    }

    fn emit_combine(&mut self, call: &'a Call, depth: usize) -> Result<(), ParseError> {
        if let Some(named) = call.args.iter().find(|a| a.name.is_some()) {
            return Err(ParseError::new(
                named.offset,
                "combine takes positional arguments only",
            ));
        }
        let args = &call.args;
        if args.len() < 2 || (args.len() - 2) % 3 != 0 {
            return Err(ParseError::new(
                call.offset,
                "combine expects (w, h, x, y, src, ...) with complete x, y, src triples",
            ));
        }
        let w = dim(int_value(&args[0], "combine")?, args[0].offset, "combine width")?;
        let h = dim(int_value(&args[1], "combine")?, args[1].offset, "combine height")?;
        let parts = &args[2..];
        let n = u16::try_from(parts.len() / 3)
            .map_err(|_| ParseError::new(call.offset, "combine: too many sources"))?;

        self.w.op(Op::Combine);
        self.w.u16(w);
        self.w.u16(h);
        self.w.u16(n);
        for triple in parts.chunks_exact(3) {
            let x = coord(int_value(&triple[0], "combine")?, triple[0].offset)?;
            let y = coord(int_value(&triple[1], "combine")?, triple[1].offset)?;
            self.w.u16(x);
            self.w.u16(y);
            self.emit_source(&triple[2], "combine", depth)?;
        }
        Ok(())
    }

    fn emit_stage(&mut self, call: &'a Call, depth: usize) -> Result<(), ParseError> {
        let op_name = call.name.as_str();
        match op_name {
            "overlay" | "mask" => {
                check_args(call, &["tex", "src"], 1)?;
                let src = required(call, &["tex", "src"], Some(0))?;
                self.w.op(if op_name == "overlay" {
                    Op::Overlay
                } else {
                    Op::Mask
                });
                self.emit_source(src, op_name, depth)?;
            }
            "lowpart" => {
                check_args(call, &["percent", "pct", "tex", "src"], 2)?;
                let pct_arg = required(call, &["percent", "pct"], Some(0))?;
                let pct = int_value(pct_arg, op_name)?;
                if pct <= 0 {
                    return Err(ParseError::new(
                        pct_arg.offset,
                        "lowpart: percent must be greater than zero",
                    ));
                }
                let src = required(call, &["tex", "src"], Some(1))?;
                self.w.op(Op::LowPart);
                self.w.u8(pct.min(100) as u8);
                self.emit_source(src, op_name, depth)?;
            }
            "resize" => {
                check_args(call, &["w", "width", "h", "height"], 2)?;
                let wa = required(call, &["w", "width"], Some(0))?;
                let ha = required(call, &["h", "height"], Some(1))?;
                let w = dim(int_value(wa, op_name)?, wa.offset, "resize width")?;
                let h = dim(int_value(ha, op_name)?, ha.offset, "resize height")?;
                self.w.op(Op::Resize);
                self.w.u16(w);
                self.w.u16(h);
            }
            "transform" => {
                check_args(call, &["t", "mode"], 1)?;
                let t = int_value(required(call, &["t", "mode"], Some(0))?, op_name)?;
                self.w.op(Op::Transform);
                self.w.u8((t & 7) as u8);
            }
            "opacity" => {
                check_args(call, &["a", "alpha", "value"], 1)?;
                let a = opt_int(call, &["a", "alpha", "value"], Some(0), op_name)?.unwrap_or(255);
                self.w.op(Op::Opacity);
                self.w.u8(a.clamp(0, 255) as u8);
            }
            "remove_alpha" | "noalpha" => {
                check_args(call, &[], 0)?;
                self.w.op(Op::NoAlpha);
            }
            "make_alpha" => {
                check_args(call, &["color"], 1)?;
                let c = color_value(required(call, &["color"], Some(0))?, op_name)?;
                self.w.op(Op::MakeAlpha);
                self.w.u8((c >> 16) as u8);
                self.w.u8((c >> 8) as u8);
                self.w.u8(c as u8);
            }
            "invert" => {
                check_args(call, &["channels"], 1)?;
                let mask = match call.arg(&["channels"], Some(0)) {
                    Some(a) => channel_mask(a)?,
                    None => 0b0111,
                };
                self.w.op(Op::Invert);
                self.w.u8(mask);
            }
            "brighten" => {
                check_args(call, &[], 0)?;
                self.w.op(Op::Brighten);
            }
            "contrast" => {
                check_args(call, &["value", "contrast", "brightness"], 2)?;
                let c = opt_int(call, &["value", "contrast"], Some(0), op_name)?.unwrap_or(0);
                let b = opt_int(call, &["brightness"], Some(1), op_name)?.unwrap_or(0);
                self.w.op(Op::Contrast);
                self.w.u8((c.clamp(-127, 127) + 127) as u8);
                self.w.u8((b.clamp(-127, 127) + 127) as u8);
            }
            "multiply" | "screen" => {
                check_args(call, &["color"], 1)?;
                let c = color_value(required(call, &["color"], Some(0))?, op_name)?;
                self.w.op(if op_name == "multiply" {
                    Op::Multiply
                } else {
                    Op::Screen
                });
                self.w.u32(c);
            }
            "colorize" => {
                check_args(call, &["color", "ratio"], 2)?;
                let c = color_value(required(call, &["color"], Some(0))?, op_name)?;
                let ratio = opt_int(call, &["ratio"], Some(1), op_name)?.unwrap_or(255);
                self.w.op(Op::Colorize);
                self.w.u32(c);
                self.w.u8(ratio.clamp(0, 255) as u8);
            }
            "anim" => {
                check_args(call, ANIM_STAGE_NAMES, 5)?;
                let params = anim_params(call, 0)?;
                self.w.op(Op::Anim);
                self.w.anim_params(params);
            }
            other => {
                return Err(ParseError::new(
                    call.offset,
                    format!("unknown operation '{other}'"),
                ));
            }
        }
        Ok(())
    }
}

const ANIM_STAGE_NAMES: &[&str] = &[
    "frame_w", "w", "frame_h", "h", "frames", "count", "fps", "smooth", "axis",
];

const ANIM_BASE_NAMES: &[&str] = &[
    "tex", "frame_w", "w", "frame_h", "h", "frames", "count", "fps", "smooth", "axis",
];

/// Animation arguments; `shift` is the position of `frame_w` among positional arguments.
fn anim_params(call: &Call, shift: usize) -> Result<AnimParams, ParseError> {
    let u16_arg = |names: &[&str], pos: usize, what: &str| -> Result<u16, ParseError> {
        match call.arg(names, Some(shift + pos)) {
            None => Ok(0),
            Some(a) => {
                let v = int_value(a, "anim")?;
                u16::try_from(v).map_err(|_| {
                    ParseError::new(a.offset, format!("anim: {what} must be 0..=65535"))
                })
            }
        }
    };
    let frame_w = u16_arg(&["frame_w", "w"], 0, "frame width")?;
    let frame_h = u16_arg(&["frame_h", "h"], 1, "frame height")?;
    let frames = u16_arg(&["frames", "count"], 2, "frame count")?;

    let fps_q = match call.arg(&["fps"], Some(shift + 3)) {
        None => DEFAULT_ANIM_FPS_Q,
        Some(a) => {
            let fps = int_value(a, "anim")?;
            if fps < 0 {
                return Err(ParseError::new(a.offset, "anim: fps must not be negative"));
            }
            if fps == 0 {
                DEFAULT_ANIM_FPS_Q
            } else {
                fps.saturating_mul(256).min(0xFFFF) as u16
            }
        }
    };

    let mut flags = 0u8;
    if let Some(a) = call.arg(&["smooth"], Some(shift + 4))
        && int_value(a, "anim")? != 0
    {
        flags |= ANIM_SMOOTH;
    }
    let axis = match call.arg(&["axis"], None) {
        Some(a) => a.value.as_text().ok_or_else(|| {
            ParseError::new(a.offset, "anim: axis must be grid, x or y")
        })?,
        None => "",
    };
    flags |= axis_flags(axis);

    Ok(AnimParams {
        frame_w,
        frame_h,
        frames,
        fps_q,
        flags,
    })
}

fn check_args(call: &Call, names: &[&str], max_positional: usize) -> Result<(), ParseError> {
    let mut positional = 0usize;
    for a in &call.args {
        match a.name.as_deref() {
            Some(n) if !names.contains(&n) => {
                return Err(ParseError::new(
                    a.offset,
                    format!("{}: unknown argument '{n}'", call.name),
                ));
            }
            Some(_) => {}
            None => {
                positional += 1;
                if positional > max_positional {
                    return Err(ParseError::new(
                        a.offset,
                        format!("{}: too many arguments", call.name),
                    ));
                }
            }
        }
    }
    Ok(())
}

fn required<'c>(call: &'c Call, names: &[&str], pos: Option<usize>) -> Result<&'c Arg, ParseError> {
    call.arg(names, pos).ok_or_else(|| {
        ParseError::new(
            call.offset,
            format!("{}: missing argument '{}'", call.name, names[0]),
        )
    })
}

fn int_value(arg: &Arg, op: &str) -> Result<i64, ParseError> {
    match arg.value {
        Value::Int(v) => Ok(v),
        _ => Err(ParseError::new(
            arg.offset,
            format!("{op}: expected a number"),
        )),
    }
}

fn opt_int(
    call: &Call,
    names: &[&str],
    pos: Option<usize>,
    op: &str,
) -> Result<Option<i64>, ParseError> {
    call.arg(names, pos).map(|a| int_value(a, op)).transpose()
}

fn color_value(arg: &Arg, op: &str) -> Result<u32, ParseError> {
    arg.value
        .as_text()
        .and_then(parse_hex_color)
        .ok_or_else(|| {
            ParseError::new(
                arg.offset,
                format!("{op}: expected a #RRGGBB or #RRGGBBAA color"),
            )
        })
}

fn channel_mask(arg: &Arg) -> Result<u8, ParseError> {
    let text = arg
        .value
        .as_text()
        .ok_or_else(|| ParseError::new(arg.offset, "invert: channels must be text like \"rgb\""))?;
    let mut mask = 0u8;
    for ch in text.chars() {
        mask |= match ch.to_ascii_lowercase() {
            'r' => 1,
            'g' => 2,
            'b' => 4,
            'a' => 8,
            other => {
                return Err(ParseError::new(
                    arg.offset,
                    format!("invert: unknown channel '{other}'"),
                ));
            }
        };
    }
    Ok(mask)
}

fn dim(v: i64, offset: usize, what: &str) -> Result<u16, ParseError> {
    if (1..=65535).contains(&v) {
        Ok(v as u16)
    } else {
        Err(ParseError::new(
            offset,
            format!("{what} must be 1..=65535 (got {v})"),
        ))
    }
}

fn coord(v: i64, offset: usize) -> Result<u16, ParseError> {
    u16::try_from(v)
        .map_err(|_| ParseError::new(offset, format!("combine: position must be 0..=65535 (got {v})")))
}

const _: () = assert!(MAX_CODE_BYTES as u32 <= MAX_U24);

#[cfg(test)]
#[path = "../../tests/unit/program/compile.rs"]
mod tests;
