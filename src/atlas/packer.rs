//! MaxRects rectangle packer, one bin per atlas layer.

/// Axis-aligned rectangle in texels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Rect {
    pub(crate) x: u32,
    pub(crate) y: u32,
    pub(crate) w: u32,
    pub(crate) h: u32,
}

impl Rect {
    pub(crate) fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    fn right(&self) -> u32 {
        self.x + self.w
    }

    fn bottom(&self) -> u32 {
        self.y + self.h
    }

    fn contains(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    fn intersects(&self, other: &Rect) -> bool {
        !(other.x >= self.right()
            || other.right() <= self.x
            || other.y >= self.bottom()
            || other.bottom() <= self.y)
    }
}

/// Scoring rule for choosing among free rectangles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fit {
    /// Least leftover area, then shortest leftover side. Used for live placement.
    BestArea,
    /// Shortest leftover side, then longest leftover side. Used for repack trials.
    BestShortSide,
}

#[derive(Debug, Clone)]
pub(crate) struct MaxRectsBin {
    width: u32,
    height: u32,
    free: Vec<Rect>,
}

impl MaxRectsBin {
    pub(crate) fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            free: vec![Rect::new(0, 0, width, height)],
        }
    }

    pub(crate) fn width(&self) -> u32 {
        self.width
    }

    pub(crate) fn height(&self) -> u32 {
        self.height
    }

    #[cfg(test)]
    pub(crate) fn free_rects(&self) -> &[Rect] {
        &self.free
    }

    /// Place a `w x h` rectangle at the top-left corner of the best-scoring free rectangle.
    pub(crate) fn insert(&mut self, w: u32, h: u32, fit: Fit) -> Option<Rect> {
        if w == 0 || h == 0 {
            return None;
        }
        let mut best: Option<(usize, (u64, u64))> = None;
        for (i, r) in self.free.iter().enumerate() {
            if w > r.w || h > r.h {
                continue;
            }
            let dw = u64::from(r.w - w);
            let dh = u64::from(r.h - h);
            let score = match fit {
                Fit::BestArea => (
                    u64::from(r.w) * u64::from(r.h) - u64::from(w) * u64::from(h),
                    dw.min(dh),
                ),
                Fit::BestShortSide => (dw.min(dh), dw.max(dh)),
            };
            if best.is_none_or(|(_, s)| score < s) {
                best = Some((i, score));
            }
        }
        let (i, _) = best?;
        let placed = Rect::new(self.free[i].x, self.free[i].y, w, h);
        self.occupy(placed);
        Some(placed)
    }

    /// Mark `used` as taken without searching. Used to rebuild a bin from known placements.
    pub(crate) fn occupy(&mut self, used: Rect) {
        let mut next = Vec::with_capacity(self.free.len() * 2);
        for fr in &self.free {
            if !fr.intersects(&used) {
                next.push(*fr);
                continue;
            }
            if used.y > fr.y {
                next.push(Rect::new(fr.x, fr.y, fr.w, used.y - fr.y));
            }
            if used.bottom() < fr.bottom() {
                next.push(Rect::new(fr.x, used.bottom(), fr.w, fr.bottom() - used.bottom()));
            }
            let band_top = fr.y.max(used.y);
            let band_h = fr.bottom().min(used.bottom()) - band_top;
            if used.x > fr.x {
                next.push(Rect::new(fr.x, band_top, used.x - fr.x, band_h));
            }
            if used.right() < fr.right() {
                next.push(Rect::new(used.right(), band_top, fr.right() - used.right(), band_h));
            }
        }
        next.retain(|r| r.w > 0 && r.h > 0);
        self.free = next;
        self.prune();
    }

    /// Return `r` to the free list, merging it with exactly adjacent free rectangles.
    pub(crate) fn free(&mut self, r: Rect) {
        self.free.push(r);
        self.merge_adjacent();
        self.prune();
    }

    fn merge_adjacent(&mut self) {
        'restart: loop {
            for i in 0..self.free.len() {
                for j in (i + 1)..self.free.len() {
                    let (a, b) = (self.free[i], self.free[j]);
                    let merged = if a.x == b.x && a.w == b.w && a.bottom() == b.y {
                        Some(Rect::new(a.x, a.y, a.w, a.h + b.h))
                    } else if a.x == b.x && a.w == b.w && b.bottom() == a.y {
                        Some(Rect::new(b.x, b.y, b.w, a.h + b.h))
                    } else if a.y == b.y && a.h == b.h && a.right() == b.x {
                        Some(Rect::new(a.x, a.y, a.w + b.w, a.h))
                    } else if a.y == b.y && a.h == b.h && b.right() == a.x {
                        Some(Rect::new(b.x, b.y, a.w + b.w, a.h))
                    } else {
                        None
                    };
                    if let Some(m) = merged {
                        self.free[i] = m;
                        self.free.remove(j);
                        continue 'restart;
                    }
                }
            }
            return;
        }
    }

    /// Drop free rectangles contained in another one.
    fn prune(&mut self) {
        let mut i = 0;
        while i < self.free.len() {
            let mut j = i + 1;
            let mut removed_i = false;
            while j < self.free.len() {
                if self.free[i].contains(&self.free[j]) {
                    self.free.remove(j);
                } else if self.free[j].contains(&self.free[i]) {
                    self.free.remove(i);
                    removed_i = true;
                    break;
                } else {
                    j += 1;
                }
            }
            if !removed_i {
                i += 1;
            }
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/atlas/packer.rs"]
mod tests;
