use crate::program::bytecode::ANIM_SMOOTH;
use crate::program::deps::AnimSpec;
use crate::program::raster::{frame_layout, frame_position, frame_time};

/// Frame-change tracking for one cached pipeline that contains animation opcodes.
#[derive(Debug, Clone)]
pub(crate) struct AnimatedPipelineState {
    specs: Vec<AnimSpec>,
    last_frames: Vec<Option<u64>>,
    smooth: bool,
}

impl AnimatedPipelineState {
    /// `None` when the program has nothing to animate.
    pub(crate) fn from_specs(specs: Vec<AnimSpec>) -> Option<Self> {
        if specs.is_empty() {
            return None;
        }
        let smooth = specs.iter().any(|s| s.flags & ANIM_SMOOTH != 0);
        Some(Self {
            last_frames: vec![None; specs.len()],
            specs,
            smooth,
        })
    }

    /// Record the frames shown at `time_seconds` and report whether the pipeline needs a
    /// rebake.
    ///
    /// `sheet_size` returns the current size of a raw sheet texture. Specs without a known
    /// sheet compare the unwrapped frame counter instead of the wrapped index.
    pub(crate) fn advance(
        &mut self,
        time_seconds: f64,
        sheet_size: impl Fn(u32) -> Option<(u32, u32)>,
    ) -> bool {
        let mut changed = self.smooth;
        for (spec, last) in self.specs.iter().zip(&mut self.last_frames) {
            let frame = match spec.tex.and_then(&sheet_size) {
                Some((w, h)) => {
                    let (_, _, count) = frame_layout(w, h, &spec.params());
                    u64::from(frame_position(time_seconds, spec.fps_q, count).0)
                }
                None => frame_time(time_seconds, spec.fps_q).floor() as u64,
            };
            if *last != Some(frame) {
                *last = Some(frame);
                changed = true;
            }
        }
        changed
    }
}

#[cfg(test)]
#[path = "../../tests/unit/pipeline/anim.rs"]
mod tests;
