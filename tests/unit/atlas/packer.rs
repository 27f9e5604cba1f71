use super::*;

fn overlaps(a: &Rect, b: &Rect) -> bool {
    a.intersects(b)
}

#[test]
fn first_insert_lands_at_origin() {
    let mut bin = MaxRectsBin::new(64, 64);
    assert_eq!(bin.insert(16, 16, Fit::BestArea), Some(Rect::new(0, 0, 16, 16)));
    // The strip to the right wastes less area than the band below.
    assert_eq!(bin.insert(16, 16, Fit::BestArea), Some(Rect::new(16, 0, 16, 16)));
}

#[test]
fn grid_aligned_tiles_fill_the_bin_exactly() {
    for fit in [Fit::BestArea, Fit::BestShortSide] {
        let mut bin = MaxRectsBin::new(64, 64);
        let mut placed = Vec::new();
        for _ in 0..16 {
            placed.push(bin.insert(16, 16, fit).expect("tile fits"));
        }
        assert_eq!(bin.insert(16, 16, fit), None);
        assert!(bin.free_rects().is_empty());
        for (i, a) in placed.iter().enumerate() {
            assert!(a.x + a.w <= 64 && a.y + a.h <= 64);
            for b in &placed[i + 1..] {
                assert!(!overlaps(a, b), "{a:?} overlaps {b:?}");
            }
        }
    }
}

#[test]
fn degenerate_and_oversized_requests_fail() {
    let mut bin = MaxRectsBin::new(32, 32);
    assert_eq!(bin.insert(0, 4, Fit::BestArea), None);
    assert_eq!(bin.insert(33, 1, Fit::BestArea), None);
    assert_eq!(bin.free_rects(), &[Rect::new(0, 0, 32, 32)]);
}

#[test]
fn freeing_merges_neighbours_back() {
    let mut bin = MaxRectsBin::new(64, 64);
    let left = bin.insert(32, 64, Fit::BestArea).unwrap();
    let right = bin.insert(32, 64, Fit::BestArea).unwrap();
    assert!(bin.free_rects().is_empty());

    bin.free(left);
    bin.free(right);
    assert_eq!(bin.free_rects(), &[Rect::new(0, 0, 64, 64)]);
    assert_eq!(bin.insert(64, 64, Fit::BestArea), Some(Rect::new(0, 0, 64, 64)));
}

#[test]
fn occupy_carves_out_known_placements() {
    let mut bin = MaxRectsBin::new(64, 64);
    bin.occupy(Rect::new(16, 16, 32, 32));
    for r in bin.free_rects() {
        assert!(!overlaps(r, &Rect::new(16, 16, 32, 32)));
    }
    let free_area: u32 = bin.free_rects().iter().map(|r| r.w * r.h).sum();
    assert_eq!(free_area, 64 * 64 - 32 * 32);

    let big = bin.insert(64, 16, Fit::BestShortSide).unwrap();
    assert_eq!(big.w, 64);
    assert!(big.y == 0 || big.y == 48);
}

#[test]
fn contained_free_rects_are_pruned() {
    let mut bin = MaxRectsBin::new(16, 16);
    bin.free(Rect::new(2, 2, 4, 4));
    assert_eq!(bin.free_rects(), &[Rect::new(0, 0, 16, 16)]);
}
