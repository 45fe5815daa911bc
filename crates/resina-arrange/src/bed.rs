//! Bed shapes items are packed onto.

use resina_math::{BoundingBox, Point2, Vec2};
use resina_mesh::clipper::{offset, OffsetJoinType};
use resina_mesh::polygon::{bounding_box_of, segments_cross, total_area};
use resina_mesh::{ExPolygon, ExPolygons, Polygon};

/// Gap between consecutive logical beds as a fraction of the bed width.
pub const LOGICAL_BED_GAP: f64 = 1.0 / 5.0;

/// Edge length of the square standing in for an infinite bed.
const INFINITE_BED_EXTENT: f64 = 1000.0;

/// Edges of the polygon approximating a circular bed.
const CIRCLE_EDGES: usize = 24;

/// Anchor points of a box, used for pile alignment and the packing sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pivots {
    /// Box center.
    #[default]
    Center,
    /// Minimum corner.
    BottomLeft,
    /// Maximum X, minimum Y.
    BottomRight,
    /// Minimum X, maximum Y.
    TopLeft,
    /// Maximum corner.
    TopRight,
}

impl Pivots {
    /// The anchor point of `bb`.
    pub fn point_of(&self, bb: &BoundingBox) -> Point2 {
        match self {
            Pivots::Center => bb.center(),
            Pivots::BottomLeft => bb.min,
            Pivots::BottomRight => Point2::new(bb.max.x, bb.min.y),
            Pivots::TopLeft => Point2::new(bb.min.x, bb.max.y),
            Pivots::TopRight => bb.max,
        }
    }
}

/// A logical print bed.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrangeBed {
    /// Unbounded plane; items pile around `center`.
    Infinite {
        /// Where the pile starts.
        center: Point2,
    },
    /// Axis-aligned rectangle.
    Rectangle {
        /// Bed extents.
        bb: BoundingBox,
    },
    /// Disc.
    Circle {
        /// Disc center.
        center: Point2,
        /// Disc radius.
        radius: f64,
    },
    /// Rectangle split into a grid of equal cells; piles snap to cells.
    SegmentedRectangle {
        /// Bed extents.
        bb: BoundingBox,
        /// Cell count along X.
        segments_x: usize,
        /// Cell count along Y.
        segments_y: usize,
    },
    /// Any other outline.
    Irregular {
        /// Printable area.
        polygons: ExPolygons,
    },
}

impl Default for ArrangeBed {
    fn default() -> Self {
        ArrangeBed::Infinite {
            center: Point2::origin(),
        }
    }
}

impl ArrangeBed {
    /// Segmented rectangle with at least one cell per axis.
    pub fn segmented(bb: BoundingBox, segments_x: usize, segments_y: usize) -> Self {
        ArrangeBed::SegmentedRectangle {
            bb,
            segments_x: segments_x.max(1),
            segments_y: segments_y.max(1),
        }
    }

    /// Bounding box of the printable area.
    pub fn bounding_box(&self) -> BoundingBox {
        match self {
            ArrangeBed::Infinite { center } => {
                BoundingBox::new(*center, *center).offset(INFINITE_BED_EXTENT / 2.0)
            }
            ArrangeBed::Rectangle { bb } | ArrangeBed::SegmentedRectangle { bb, .. } => *bb,
            ArrangeBed::Circle { center, radius } => {
                BoundingBox::new(*center, *center).offset(*radius)
            }
            ArrangeBed::Irregular { polygons } => bounding_box_of(polygons),
        }
    }

    /// Printable area; infinite for [`ArrangeBed::Infinite`].
    pub fn area(&self) -> f64 {
        match self {
            ArrangeBed::Infinite { .. } => f64::INFINITY,
            ArrangeBed::Rectangle { bb } | ArrangeBed::SegmentedRectangle { bb, .. } => bb.area(),
            ArrangeBed::Circle { radius, .. } => std::f64::consts::PI * radius * radius,
            ArrangeBed::Irregular { polygons } => total_area(polygons),
        }
    }

    /// The bed grown by `delta` (shrunk when negative).
    pub fn offset(&self, delta: f64) -> ArrangeBed {
        match self {
            ArrangeBed::Infinite { .. } => self.clone(),
            ArrangeBed::Rectangle { bb } => ArrangeBed::Rectangle { bb: bb.offset(delta) },
            ArrangeBed::SegmentedRectangle {
                bb,
                segments_x,
                segments_y,
            } => ArrangeBed::SegmentedRectangle {
                bb: bb.offset(delta),
                segments_x: *segments_x,
                segments_y: *segments_y,
            },
            ArrangeBed::Circle { center, radius } => ArrangeBed::Circle {
                center: *center,
                radius: (radius + delta).max(0.0),
            },
            ArrangeBed::Irregular { polygons } => ArrangeBed::Irregular {
                polygons: offset(polygons, delta, OffsetJoinType::Miter),
            },
        }
    }

    /// Outline of the printable area.
    pub fn to_expolygons(&self) -> ExPolygons {
        match self {
            ArrangeBed::Infinite { .. }
            | ArrangeBed::Rectangle { .. }
            | ArrangeBed::SegmentedRectangle { .. } => {
                vec![ExPolygon::new(Polygon::rectangle(&self.bounding_box()))]
            }
            ArrangeBed::Circle { center, radius } => {
                vec![ExPolygon::new(Polygon::circle(*center, *radius, CIRCLE_EDGES))]
            }
            ArrangeBed::Irregular { polygons } => polygons.clone(),
        }
    }

    /// Distance between the origins of consecutive logical beds along X.
    pub fn stride(&self) -> f64 {
        self.bounding_box().width() * (1.0 + LOGICAL_BED_GAP)
    }

    /// Offset of logical bed `bed_idx` relative to the physical bed.
    pub fn logical_bed_offset(&self, bed_idx: i32) -> Vec2 {
        Vec2::new(self.stride() * bed_idx.max(0) as f64, 0.0)
    }

    /// Whether `points` (closed ring) lies inside the bed with `tol` slack.
    pub(crate) fn contains_ring(&self, points: &[Point2], tol: f64) -> bool {
        match self {
            ArrangeBed::Infinite { .. } => true,
            ArrangeBed::Rectangle { bb } | ArrangeBed::SegmentedRectangle { bb, .. } => {
                bb.contains_box(&BoundingBox::from_points(points), tol)
            }
            ArrangeBed::Circle { center, radius } => {
                points.iter().all(|p| (p - center).norm() <= radius + tol)
            }
            ArrangeBed::Irregular { polygons } => polygons.iter().any(|ex| ring_inside(ex, points)),
        }
    }
}

fn ring_inside(ex: &ExPolygon, points: &[Point2]) -> bool {
    if !points.iter().all(|p| ex.contains(p)) || rings_cross(&ex.contour, points) {
        return false;
    }
    let item = Polygon::new(points.to_vec());
    ex.holes.iter().all(|hole| {
        !rings_cross(hole, points) && hole.points.first().map_or(true, |p| !item.contains(p))
    })
}

fn rings_cross(ring: &Polygon, points: &[Point2]) -> bool {
    let (n, m) = (points.len(), ring.points.len());
    (0..m).any(|j| {
        let (c, d) = (ring.points[j], ring.points[(j + 1) % m]);
        (0..n).any(|i| segments_cross(&points[i], &points[(i + 1) % n], &c, &d))
    })
}

/// Classify a raw bed outline.
///
/// No points yields an infinite bed at the origin and one point an
/// infinite bed centered there. Outlines filling their bounding box become
/// rectangles, outlines filling their circumscribed disc become circles and
/// anything else stays irregular.
pub fn to_arrange_bed(points: &[Point2]) -> ArrangeBed {
    match points {
        [] => return ArrangeBed::default(),
        [p] => return ArrangeBed::Infinite { center: *p },
        _ => {}
    }

    let poly = Polygon::new(points.to_vec());
    let area = poly.area();
    let bb = poly.bounding_box();
    if area > 0.0 && is_box(area, &bb) {
        return ArrangeBed::Rectangle { bb };
    }

    let center = poly.centroid();
    let radius = points.iter().map(|p| (p - center).norm()).sum::<f64>() / points.len() as f64;
    let circle_area = std::f64::consts::PI * radius * radius;
    if circle_area > 0.0 && 1.0 - area / circle_area < 1e-2 {
        return ArrangeBed::Circle { center, radius };
    }

    ArrangeBed::Irregular {
        polygons: vec![ExPolygon::new(poly)],
    }
}

fn is_box(area: f64, bb: &BoundingBox) -> bool {
    let bb_area = bb.area();
    bb_area > 0.0 && 1.0 - area / bb_area < 1e-3
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn rect(w: f64, h: f64) -> BoundingBox {
        BoundingBox::new(Point2::origin(), Point2::new(w, h))
    }

    #[test]
    fn test_classify_empty_and_single_point() {
        assert_eq!(to_arrange_bed(&[]), ArrangeBed::default());
        let p = Point2::new(3.0, 4.0);
        assert_eq!(to_arrange_bed(&[p]), ArrangeBed::Infinite { center: p });
    }

    #[test]
    fn test_classify_box() {
        let bed = to_arrange_bed(&rect(250.0, 210.0).corners());
        assert_eq!(bed, ArrangeBed::Rectangle { bb: rect(250.0, 210.0) });
    }

    #[test]
    fn test_classify_circle() {
        let ring = Polygon::circle(Point2::new(10.0, 10.0), 100.0, 64);
        match to_arrange_bed(&ring.points) {
            ArrangeBed::Circle { center, radius } => {
                assert_relative_eq!(center.x, 10.0, epsilon = 1e-9);
                assert_relative_eq!(radius, 100.0, epsilon = 1e-9);
            }
            other => panic!("expected circle, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_irregular() {
        let l_shape = vec![
            Point2::new(0.0, 0.0),
            Point2::new(100.0, 0.0),
            Point2::new(100.0, 50.0),
            Point2::new(50.0, 50.0),
            Point2::new(50.0, 100.0),
            Point2::new(0.0, 100.0),
        ];
        assert!(matches!(to_arrange_bed(&l_shape), ArrangeBed::Irregular { .. }));
    }

    #[test]
    fn test_area_and_stride() {
        let bed = ArrangeBed::Rectangle { bb: rect(100.0, 50.0) };
        assert_relative_eq!(bed.area(), 5000.0);
        assert_relative_eq!(bed.stride(), 120.0);
        assert_relative_eq!(bed.logical_bed_offset(2).x, 240.0);
        assert!(ArrangeBed::default().area().is_infinite());
        let disc = ArrangeBed::Circle {
            center: Point2::origin(),
            radius: 1.0,
        };
        assert_relative_eq!(disc.area(), std::f64::consts::PI);
        assert_eq!(disc.to_expolygons()[0].contour.len(), CIRCLE_EDGES);
    }

    #[test]
    fn test_offset_shrinks() {
        let bed = ArrangeBed::Rectangle { bb: rect(100.0, 100.0) }.offset(-5.0);
        assert_relative_eq!(bed.bounding_box().min.x, 5.0);
        assert_relative_eq!(bed.bounding_box().max.y, 95.0);
    }

    #[test]
    fn test_contains_ring() {
        let bed = ArrangeBed::Circle {
            center: Point2::origin(),
            radius: 10.0,
        };
        let inside = [Point2::new(-1.0, -1.0), Point2::new(1.0, -1.0), Point2::new(0.0, 1.0)];
        let outside = [Point2::new(9.0, 9.0), Point2::new(10.0, 9.0), Point2::new(9.0, 10.0)];
        assert!(bed.contains_ring(&inside, 1e-9));
        assert!(!bed.contains_ring(&outside, 1e-9));
    }
}
