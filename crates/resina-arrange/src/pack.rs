//! First-fit packing over logical beds.
//!
//! Items are processed in priority order. Each item tries the beds in
//! index order and lands on the first one with room. On a bed, candidate
//! positions come from the no-fit polygons of the items already there and
//! from the bed outline; the feasible candidate with the best score wins.
//! Scores favour a compact pile that grows from the starting point.

use std::cmp::Ordering;

use rayon::prelude::*;
use resina_math::{BoundingBox, Point2, Vec2};
use resina_mesh::Polygon;
use tracing::{debug, info, trace};

use crate::bed::{ArrangeBed, Pivots};
use crate::error::Result;
use crate::item::{ArrangePolygon, UNARRANGED};
use crate::nfp::{inflate_convex, no_fit_polygon, strictly_inside_convex};
use crate::params::{ArrangeParams, ProgressSink};

/// Slack for touching outlines and bed edges.
const CONTACT_TOL: f64 = 1e-6;

/// Items covering more than this share of the bed count as big.
const BIG_ITEM_THRESHOLD: f64 = 0.02;

/// Circle bed directions probed at full accuracy.
const CIRCLE_PROBES: f64 = 24.0;

struct Placed {
    shape: Polygon,
    bb: BoundingBox,
    area: f64,
    big: bool,
}

struct BedContext {
    placed: Vec<Placed>,
    items: Vec<usize>,
    has_fixed: bool,
    pile_bb: BoundingBox,
    big_bb: BoundingBox,
}

impl BedContext {
    fn new() -> Self {
        Self {
            placed: Vec::new(),
            items: Vec::new(),
            has_fixed: false,
            pile_bb: BoundingBox::empty(),
            big_bb: BoundingBox::empty(),
        }
    }

    fn push(&mut self, placed: Placed) {
        self.pile_bb.merge(&placed.bb);
        if placed.big {
            self.big_bb.merge(&placed.bb);
        }
        self.placed.push(placed);
    }
}

/// What the scoring function needs to know about the whole run.
struct Kernel {
    sink: Point2,
    norm: f64,
    bin_area: f64,
    item_count: usize,
}

struct Placement {
    translation: Vec2,
    rotation: f64,
    shape: Polygon,
    score: f64,
}

impl Kernel {
    fn is_big(&self, area: f64) -> bool {
        !self.bin_area.is_finite() || area / self.bin_area > BIG_ITEM_THRESHOLD
    }

    fn score(&self, ctx: &BedContext, ibb: &BoundingBox, area: f64, remaining: usize) -> f64 {
        let norm = |v: f64| v / self.norm;
        if !self.is_big(area) {
            let target = if ctx.big_bb.is_empty() {
                self.sink
            } else {
                ctx.big_bb.center()
            };
            return norm((ibb.center() - target).norm());
        }

        let mut full_bb = ctx.pile_bb;
        full_bb.merge(ibb);
        let cc = full_bb.center();
        let anchors = [
            ibb.min,
            ibb.max,
            Point2::new(ibb.min.x, ibb.max.y),
            Point2::new(ibb.max.x, ibb.min.y),
            ibb.center(),
        ];
        let dist = anchors
            .iter()
            .map(|p| (p - cc).norm())
            .fold(f64::INFINITY, f64::min);
        let bin_dist = (ibb.center() - self.sink).norm();
        let dist = norm(0.8 * dist + 0.2 * bin_dist);

        let density = (norm(full_bb.width()) * norm(full_bb.height())).sqrt();
        if ctx.placed.is_empty() {
            return 0.5 * dist + 0.5 * density;
        }

        let query = ibb.offset(CONTACT_TOL);
        let mut alignment = 1.0f64;
        for p in &ctx.placed {
            if !boxes_touch(&p.bb, &query) {
                continue;
            }
            let mut joined = p.bb;
            joined.merge(ibb);
            let joined_area = joined.area();
            if joined_area > 0.0 {
                alignment = alignment.min(1.0 - (area + p.area) / joined_area);
            }
        }
        let r = remaining as f64 / self.item_count.max(1) as f64;
        0.5 * dist + (1.0 - r) * 0.2 * density + 0.3 * alignment
    }
}

fn boxes_touch(a: &BoundingBox, b: &BoundingBox) -> bool {
    a.min.x <= b.max.x && b.min.x <= a.max.x && a.min.y <= b.max.y && b.min.y <= a.max.y
}

fn translated(poly: &Polygon, t: &Vec2) -> Polygon {
    let mut p = poly.clone();
    p.translate(t);
    p
}

/// Positions worth trying for `shape` on a bed holding `ctx`.
fn candidates(
    ctx: &BedContext,
    shape: &Polygon,
    bed: &ArrangeBed,
    params: &ArrangeParams,
) -> (Vec<Vec2>, Vec<Polygon>) {
    let sbb = shape.bounding_box();
    let bed_bb = bed.bounding_box();
    let start = params.starting_point;
    let mut out = vec![start.point_of(&bed_bb) - start.point_of(&sbb)];

    let nfps: Vec<Polygon> = ctx
        .placed
        .iter()
        .map(|p| no_fit_polygon(&p.shape, shape))
        .collect();
    let midpoints = params.accuracy >= 0.5;
    for nfp in &nfps {
        let n = nfp.len();
        for i in 0..n {
            let a = nfp.points[i];
            out.push(a.coords);
            if midpoints {
                out.push((a.coords + nfp.points[(i + 1) % n].coords) / 2.0);
            }
        }
    }

    match bed {
        ArrangeBed::Rectangle { bb } | ArrangeBed::SegmentedRectangle { bb, .. } => {
            for pivot in [
                Pivots::BottomLeft,
                Pivots::BottomRight,
                Pivots::TopLeft,
                Pivots::TopRight,
            ] {
                out.push(pivot.point_of(bb) - pivot.point_of(&sbb));
            }
        }
        ArrangeBed::Circle { center, radius } => {
            let c = sbb.center();
            let reach = shape
                .points
                .iter()
                .map(|p| (p - c).norm())
                .fold(0.0, f64::max);
            let along = radius - reach;
            if along > 0.0 {
                let probes = (CIRCLE_PROBES * params.accuracy as f64).ceil().max(4.0) as usize;
                for k in 0..probes {
                    let (s, co) = (2.0 * std::f64::consts::PI * k as f64 / probes as f64).sin_cos();
                    out.push(center - c + Vec2::new(co, s) * along);
                }
            }
        }
        ArrangeBed::Irregular { polygons } => {
            let c = sbb.center();
            for ex in polygons {
                for v in &ex.contour.points {
                    out.push(v - c);
                }
            }
        }
        ArrangeBed::Infinite { .. } => {}
    }
    (out, nfps)
}

fn feasible(t: &Vec2, shape: &Polygon, bed: &ArrangeBed, nfps: &[Polygon]) -> bool {
    let p = Point2::from(*t);
    if nfps.iter().any(|nfp| strictly_inside_convex(nfp, &p, CONTACT_TOL)) {
        return false;
    }
    bed.contains_ring(&translated(shape, t).points, CONTACT_TOL)
}

fn cmp_candidates(a: &(f64, usize, Vec2), b: &(f64, usize, Vec2)) -> Ordering {
    a.0.total_cmp(&b.0).then(a.1.cmp(&b.1))
}

/// Best placement of `shape` on the bed holding `ctx`, if any.
fn best_position(
    ctx: &BedContext,
    shape: &Polygon,
    area: f64,
    bed: &ArrangeBed,
    params: &ArrangeParams,
    kernel: &Kernel,
    remaining: usize,
) -> Option<(f64, Vec2)> {
    let (cands, nfps) = candidates(ctx, shape, bed, params);
    let sbb = shape.bounding_box();
    let eval = |(idx, t): (usize, &Vec2)| {
        if !feasible(t, shape, bed, &nfps) {
            return None;
        }
        let score = kernel.score(ctx, &sbb.translated(t), area, remaining);
        Some((score, idx, *t))
    };
    let best = if params.parallel {
        cands
            .par_iter()
            .enumerate()
            .filter_map(eval)
            .min_by(cmp_candidates)
    } else {
        cands.iter().enumerate().filter_map(eval).min_by(cmp_candidates)
    };
    best.map(|(score, _, t)| (score, t))
}

fn rotations(item: &ArrangePolygon, params: &ArrangeParams) -> Vec<f64> {
    if params.allow_rotations && !item.allowed_rotations.is_empty() {
        item.allowed_rotations.clone()
    } else {
        vec![item.rotation]
    }
}

fn try_bed(
    ctx: &BedContext,
    item: &ArrangePolygon,
    inflation: f64,
    bed: &ArrangeBed,
    params: &ArrangeParams,
    kernel: &Kernel,
    remaining: usize,
) -> Option<Placement> {
    let mut best: Option<Placement> = None;
    for rotation in rotations(item, params) {
        let shape = inflate_convex(&item.rotated_hull(rotation), inflation);
        let area = shape.area();
        let Some((score, translation)) =
            best_position(ctx, &shape, area, bed, params, kernel, remaining)
        else {
            continue;
        };
        if best.as_ref().map_or(true, |b| score < b.score) {
            best = Some(Placement {
                translation,
                rotation,
                shape,
                score,
            });
        }
    }
    best
}

fn item_inflation(item: &ArrangePolygon, params: &ArrangeParams) -> f64 {
    item.inflation + params.min_obj_distance / 2.0
}

/// Place `items` onto `bed` and its virtual copies.
///
/// `excludes` with a bed index are fixed obstacles on that logical bed,
/// given in bed-local coordinates. Every item gets a bed index, a
/// translation and a rotation, or stays [`UNARRANGED`] when it cannot be
/// placed. Each item's setter is called once packing finishes.
pub fn arrange(
    items: &mut [ArrangePolygon],
    excludes: &[ArrangePolygon],
    bed: &ArrangeBed,
    params: &ArrangeParams,
    sink: &mut dyn ProgressSink,
) -> Result<()> {
    params.validate()?;
    let work_bed = bed.offset(params.min_obj_distance / 2.0 - params.min_bed_distance);

    for item in items.iter_mut() {
        item.bed_idx = UNARRANGED;
    }

    let mut order: Vec<(usize, f64)> = items
        .iter()
        .enumerate()
        .filter(|(_, item)| item.is_packable())
        .map(|(idx, item)| (idx, item.poly.convex_hull().area()))
        .collect();
    order.sort_by(|a, b| {
        items[b.0]
            .priority
            .cmp(&items[a.0].priority)
            .then(b.1.total_cmp(&a.1))
    });

    let bin_area = work_bed.area();
    let norm = if bin_area.is_finite() {
        bin_area.sqrt()
    } else {
        order.iter().map(|(_, a)| a).sum::<f64>().sqrt()
    }
    .max(1.0);
    let kernel = Kernel {
        sink: params.starting_point.point_of(&work_bed.bounding_box()),
        norm,
        bin_area,
        item_count: order.len(),
    };

    let mut beds: Vec<BedContext> = Vec::new();
    for fixed in excludes.iter().filter(|e| e.bed_idx >= 0 && e.is_packable()) {
        let idx = fixed.bed_idx as usize;
        while beds.len() <= idx {
            beds.push(BedContext::new());
        }
        let mut shape = inflate_convex(&fixed.rotated_hull(fixed.rotation), item_inflation(fixed, params));
        shape.translate(&fixed.translation);
        let area = shape.area();
        beds[idx].has_fixed = true;
        beds[idx].push(Placed {
            bb: shape.bounding_box(),
            big: kernel.is_big(area),
            shape,
            area,
        });
    }

    let total = order.len();
    let mut stopped = false;
    for (done, &(idx, _)) in order.iter().enumerate() {
        if sink.stop_condition() {
            stopped = true;
            break;
        }
        let remaining = total - done - 1;
        let inflation = item_inflation(&items[idx], params);

        let mut bed_idx = 0;
        loop {
            if sink.stop_condition() {
                stopped = true;
                break;
            }
            if beds.len() <= bed_idx {
                beds.push(BedContext::new());
            }
            let ctx = &beds[bed_idx];
            if let Some(placement) =
                try_bed(ctx, &items[idx], inflation, &work_bed, params, &kernel, remaining)
            {
                let item = &mut items[idx];
                item.translation = placement.translation;
                item.rotation = placement.rotation;
                item.bed_idx = bed_idx as i32;
                let shape = translated(&placement.shape, &placement.translation);
                let area = shape.area();
                let ctx = &mut beds[bed_idx];
                ctx.push(Placed {
                    bb: shape.bounding_box(),
                    big: kernel.is_big(area),
                    shape,
                    area,
                });
                ctx.items.push(idx);
                trace!(item = idx, bed = bed_idx, "item packed");
                break;
            }
            if ctx.placed.is_empty() {
                debug!(item = idx, "item does not fit an empty bed");
                break;
            }
            bed_idx += 1;
        }
        if stopped {
            break;
        }

        sink.progress(remaining);
        if items[idx].is_arranged() {
            sink.on_packed(&items[idx]);
        }
    }

    align_piles(items, &beds, bed, &work_bed, params);

    for item in items.iter() {
        item.apply();
    }

    let arranged = items.iter().filter(|i| i.is_arranged()).count();
    info!(
        arranged,
        unarranged = items.len() - arranged,
        beds = beds.iter().filter(|b| !b.items.is_empty()).count(),
        stopped,
        "arrangement finished"
    );
    Ok(())
}

/// Move each pile on a rectangular bed to its alignment pivot. Segmented
/// beds snap the pile to a block of whole cells first.
fn align_piles(
    items: &mut [ArrangePolygon],
    beds: &[BedContext],
    bed: &ArrangeBed,
    work_bed: &ArrangeBed,
    params: &ArrangeParams,
) {
    let work_bb = work_bed.bounding_box();
    for ctx in beds.iter().filter(|c| !c.has_fixed && !c.items.is_empty()) {
        let pile = ctx.pile_bb;
        let shift = match bed {
            ArrangeBed::Rectangle { .. } => {
                params.alignment.point_of(&work_bb) - params.alignment.point_of(&pile)
            }
            ArrangeBed::SegmentedRectangle {
                bb,
                segments_x,
                segments_y,
            } => {
                let cell = Vec2::new(
                    bb.width() / *segments_x as f64,
                    bb.height() / *segments_y as f64,
                );
                let cells = snap_to_cells(bb, &cell, &pile, params.alignment);
                cells.center() - pile.center()
            }
            _ => continue,
        };
        let shift = clamp_shift(&pile, shift, &work_bb);
        for &idx in &ctx.items {
            items[idx].translation += shift;
        }
    }
}

/// The block of whole cells that `pile` is moved into.
fn snap_to_cells(bed: &BoundingBox, cell: &Vec2, pile: &BoundingBox, pivot: Pivots) -> BoundingBox {
    let snap = |len: f64, cell: f64, bed_len: f64| ((len / cell).ceil() * cell).min(bed_len);
    let size = Vec2::new(
        snap(pile.width(), cell.x, bed.width()),
        snap(pile.height(), cell.y, bed.height()),
    );
    let anchor = pivot.point_of(bed);
    let min = match pivot {
        Pivots::Center => {
            let raw = anchor - size / 2.0;
            let cells = ((raw - bed.min).component_div(cell)).map(f64::floor);
            bed.min + cells.component_mul(cell)
        }
        Pivots::BottomLeft => anchor,
        Pivots::BottomRight => Point2::new(anchor.x - size.x, anchor.y),
        Pivots::TopLeft => Point2::new(anchor.x, anchor.y - size.y),
        Pivots::TopRight => anchor - size,
    };
    BoundingBox::new(min, min + size)
}

/// Reduce `shift` so the moved pile stays inside `bounds`.
fn clamp_shift(pile: &BoundingBox, shift: Vec2, bounds: &BoundingBox) -> Vec2 {
    let moved = pile.translated(&shift);
    let mut out = shift;
    for axis in 0..2 {
        if moved.max[axis] > bounds.max[axis] {
            out[axis] -= moved.max[axis] - bounds.max[axis];
        }
        if moved.min[axis] < bounds.min[axis] {
            out[axis] += bounds.min[axis] - moved.min[axis];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::NoProgress;
    use approx::assert_relative_eq;
    use resina_mesh::ExPolygon;

    fn square_item(size: f64) -> ArrangePolygon {
        let bb = BoundingBox::new(Point2::origin(), Point2::new(size, size));
        ArrangePolygon::new(ExPolygon::new(Polygon::rectangle(&bb)))
    }

    fn bed(size: f64) -> ArrangeBed {
        ArrangeBed::Rectangle {
            bb: BoundingBox::new(Point2::origin(), Point2::new(size, size)),
        }
    }

    fn inflated(item: &ArrangePolygon, d: f64) -> Polygon {
        let mut shape = inflate_convex(&item.rotated_hull(item.rotation), d);
        shape.translate(&item.translation);
        shape
    }

    fn overlap(a: &Polygon, b: &Polygon) -> bool {
        // Convex polygons overlap when the origin lies inside their no-fit polygon.
        strictly_inside_convex(&no_fit_polygon(a, b), &Point2::origin(), 1e-6)
    }

    #[derive(Default)]
    struct Recorder {
        progress: Vec<usize>,
        packed: Vec<i32>,
        stop_after: Option<usize>,
    }

    impl ProgressSink for Recorder {
        fn stop_condition(&mut self) -> bool {
            self.stop_after.is_some_and(|n| self.packed.len() >= n)
        }
        fn progress(&mut self, remaining: usize) {
            self.progress.push(remaining);
        }
        fn on_packed(&mut self, item: &ArrangePolygon) {
            self.packed.push(item.bed_idx);
        }
    }

    #[test]
    fn test_two_squares_on_one_bed() {
        let mut items = vec![square_item(10.0), square_item(10.0)];
        let params = ArrangeParams::default().with_min_obj_distance(0.0);
        arrange(&mut items, &[], &bed(100.0), &params, &mut NoProgress).unwrap();
        assert!(items.iter().all(|i| i.bed_idx == 0));
        assert!(!overlap(&inflated(&items[0], 0.0), &inflated(&items[1], 0.0)));
    }

    #[test]
    fn test_clearance_and_bed_membership() {
        let mut items: Vec<_> = (0..12).map(|i| square_item(8.0 + (i % 3) as f64)).collect();
        let params = ArrangeParams::default()
            .with_min_obj_distance(4.0)
            .with_min_bed_distance(2.0);
        arrange(&mut items, &[], &bed(100.0), &params, &mut NoProgress).unwrap();

        let inner = BoundingBox::new(Point2::new(2.0, 2.0), Point2::new(98.0, 98.0));
        for (i, a) in items.iter().enumerate() {
            assert_eq!(a.bed_idx, 0);
            assert!(inner.contains_box(&a.transformed_poly().bounding_box(), 1e-6));
            for b in &items[i + 1..] {
                assert!(!overlap(&inflated(a, 2.0 - 1e-3), &inflated(b, 2.0 - 1e-3)));
            }
        }
    }

    #[test]
    fn test_overflow_to_virtual_bed() {
        let mut items: Vec<_> = (0..3).map(|_| square_item(40.0)).collect();
        let params = ArrangeParams::default().with_min_obj_distance(2.0);
        let mut rec = Recorder::default();
        arrange(&mut items, &[], &bed(50.0), &params, &mut rec).unwrap();
        let mut beds: Vec<i32> = items.iter().map(|i| i.bed_idx).collect();
        beds.sort();
        assert_eq!(beds, vec![0, 1, 2]);
        assert_eq!(rec.progress, vec![2, 1, 0]);
        assert_eq!(rec.packed.len(), 3);
    }

    #[test]
    fn test_priority_keeps_lower_bed() {
        let mut items = vec![square_item(40.0), square_item(40.0).with_priority(1)];
        let params = ArrangeParams::default().with_min_obj_distance(2.0);
        arrange(&mut items, &[], &bed(50.0), &params, &mut NoProgress).unwrap();
        assert_eq!(items[1].bed_idx, 0);
        assert_eq!(items[0].bed_idx, 1);
    }

    #[test]
    fn test_invalid_and_oversized_items_stay_unarranged() {
        let bowtie = Polygon::new(vec![
            Point2::new(0.0, 0.0),
            Point2::new(10.0, 10.0),
            Point2::new(10.0, 0.0),
            Point2::new(0.0, 10.0),
        ]);
        let mut items = vec![
            ArrangePolygon::new(ExPolygon::new(bowtie)),
            square_item(200.0),
            square_item(10.0),
        ];
        arrange(&mut items, &[], &bed(100.0), &ArrangeParams::default(), &mut NoProgress).unwrap();
        assert!(!items[0].is_arranged());
        assert!(!items[1].is_arranged());
        assert_eq!(items[2].bed_idx, 0);
    }

    #[test]
    fn test_excludes_are_avoided() {
        let mut fixed = square_item(30.0).with_translation(Vec2::new(35.0, 35.0));
        fixed.bed_idx = 0;
        let mut items = vec![square_item(30.0)];
        let params = ArrangeParams::default().with_min_obj_distance(2.0);
        arrange(&mut items, &[fixed.clone()], &bed(100.0), &params, &mut NoProgress).unwrap();
        assert_eq!(items[0].bed_idx, 0);
        assert!(!overlap(&inflated(&items[0], 1.0 - 1e-3), &inflated(&fixed, 1.0 - 1e-3)));
    }

    #[test]
    fn test_stop_condition_leaves_rest_unarranged() {
        let mut items: Vec<_> = (0..4).map(|_| square_item(10.0)).collect();
        let mut rec = Recorder {
            stop_after: Some(2),
            ..Default::default()
        };
        arrange(&mut items, &[], &bed(100.0), &ArrangeParams::default(), &mut rec).unwrap();
        assert_eq!(items.iter().filter(|i| i.is_arranged()).count(), 2);
    }

    #[test]
    fn test_single_item_is_centered() {
        let mut items = vec![square_item(10.0)];
        arrange(&mut items, &[], &bed(100.0), &ArrangeParams::default(), &mut NoProgress).unwrap();
        let bb = items[0].transformed_poly().bounding_box();
        assert_relative_eq!(bb.center().x, 50.0, epsilon = 1e-6);
        assert_relative_eq!(bb.center().y, 50.0, epsilon = 1e-6);
    }

    #[test]
    fn test_bottom_left_alignment() {
        let mut items = vec![square_item(10.0)];
        let params = ArrangeParams::default()
            .with_min_obj_distance(0.0)
            .with_min_bed_distance(5.0)
            .with_alignment(Pivots::BottomLeft);
        arrange(&mut items, &[], &bed(100.0), &params, &mut NoProgress).unwrap();
        let bb = items[0].transformed_poly().bounding_box();
        assert_relative_eq!(bb.min.x, 5.0, epsilon = 1e-6);
        assert_relative_eq!(bb.min.y, 5.0, epsilon = 1e-6);
    }

    #[test]
    fn test_segmented_bed_snaps_to_cells() {
        let bb = BoundingBox::new(Point2::origin(), Point2::new(100.0, 100.0));
        let bed = ArrangeBed::segmented(bb, 4, 4);
        let mut items = vec![square_item(20.0)];
        let params = ArrangeParams::default()
            .with_min_obj_distance(0.0)
            .with_alignment(Pivots::BottomLeft);
        arrange(&mut items, &[], &bed, &params, &mut NoProgress).unwrap();
        let out = items[0].transformed_poly().bounding_box();
        // A 20 mm item fills one 25 mm cell at the corner, centered in it.
        assert_relative_eq!(out.center().x, 12.5, epsilon = 1e-6);
        assert_relative_eq!(out.center().y, 12.5, epsilon = 1e-6);
    }

    #[test]
    fn test_circle_bed() {
        let bed = ArrangeBed::Circle {
            center: Point2::new(0.0, 0.0),
            radius: 50.0,
        };
        let mut items: Vec<_> = (0..5).map(|_| square_item(15.0)).collect();
        let params = ArrangeParams::default().with_min_obj_distance(2.0);
        arrange(&mut items, &[], &bed, &params, &mut NoProgress).unwrap();
        for item in items.iter().filter(|i| i.bed_idx == 0) {
            for p in &item.transformed_poly().contour.points {
                assert!(p.coords.norm() <= 50.0 + 1e-6);
            }
        }
        assert!(items.iter().all(|i| i.is_arranged()));
    }

    #[test]
    fn test_rotation_search_fits_long_item() {
        let bb = BoundingBox::new(Point2::origin(), Point2::new(60.0, 10.0));
        let bed = ArrangeBed::Rectangle {
            bb: BoundingBox::new(Point2::origin(), Point2::new(20.0, 80.0)),
        };
        let mut item = ArrangePolygon::new(ExPolygon::new(Polygon::rectangle(&bb)));
        item.allowed_rotations = vec![0.0, std::f64::consts::FRAC_PI_2];
        let mut items = vec![item];
        let params = ArrangeParams::default()
            .with_min_obj_distance(0.0)
            .with_rotations(true);
        arrange(&mut items, &[], &bed, &params, &mut NoProgress).unwrap();
        assert_eq!(items[0].bed_idx, 0);
        assert_relative_eq!(items[0].rotation, std::f64::consts::FRAC_PI_2);
    }
}
