//! Polygon boolean and offset operations.
//!
//! Thin layer over `geo`'s overlay and buffer algorithms, converting
//! between [`ExPolygon`] and `geo` polygons at the boundary.

use geo::algorithm::buffer::{BufferStyle, LineJoin};
use geo::{unary_union, BooleanOps, Buffer, Coord, LineString, MultiPolygon, Polygon as GeoPolygon};
use resina_math::Point2;

use crate::polygon::{ExPolygon, ExPolygons, Polygon};

/// Corner style used when offsetting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OffsetJoinType {
    /// Cut corners off.
    Square,
    /// Rounded corners.
    #[default]
    Round,
    /// Sharp corners.
    Miter,
}

impl From<OffsetJoinType> for LineJoin<f64> {
    fn from(jt: OffsetJoinType) -> Self {
        match jt {
            OffsetJoinType::Square => LineJoin::Bevel,
            OffsetJoinType::Round => LineJoin::Round(0.2),
            OffsetJoinType::Miter => LineJoin::Miter(0.5),
        }
    }
}

fn ring_to_geo(poly: &Polygon) -> LineString<f64> {
    LineString::new(poly.points.iter().map(|p| Coord { x: p.x, y: p.y }).collect())
}

fn geo_to_ring(ls: &LineString<f64>) -> Polygon {
    let mut points: Vec<Point2> = ls.coords().map(|c| Point2::new(c.x, c.y)).collect();
    if points.len() > 1 && points.first() == points.last() {
        points.pop();
    }
    Polygon::new(points)
}

fn expolygon_to_geo(ex: &ExPolygon) -> GeoPolygon<f64> {
    GeoPolygon::new(
        ring_to_geo(&ex.contour),
        ex.holes.iter().map(ring_to_geo).collect(),
    )
}

fn geo_to_expolygon(poly: &GeoPolygon<f64>) -> ExPolygon {
    ExPolygon::with_holes(
        geo_to_ring(poly.exterior()),
        poly.interiors().iter().map(geo_to_ring).collect(),
    )
}

fn to_multi(polys: &[ExPolygon]) -> MultiPolygon<f64> {
    MultiPolygon::new(
        polys
            .iter()
            .filter(|p| !p.is_empty())
            .map(expolygon_to_geo)
            .collect(),
    )
}

fn from_multi(multi: &MultiPolygon<f64>) -> ExPolygons {
    multi
        .0
        .iter()
        .map(geo_to_expolygon)
        .filter(|p| !p.is_empty())
        .collect()
}

/// Merge possibly overlapping polygons into a disjoint set.
pub fn union_ex(polys: &[ExPolygon]) -> ExPolygons {
    match polys.len() {
        0 => Vec::new(),
        1 => polys.to_vec(),
        _ => {
            let geo: Vec<GeoPolygon<f64>> = polys
                .iter()
                .filter(|p| !p.is_empty())
                .map(expolygon_to_geo)
                .collect();
            from_multi(&unary_union(&geo))
        }
    }
}

/// Union of two polygon sets.
pub fn union(subject: &[ExPolygon], clip: &[ExPolygon]) -> ExPolygons {
    if subject.is_empty() {
        return union_ex(clip);
    }
    if clip.is_empty() {
        return union_ex(subject);
    }
    from_multi(&to_multi(subject).union(&to_multi(clip)))
}

/// Intersection of two polygon sets.
pub fn intersection(subject: &[ExPolygon], clip: &[ExPolygon]) -> ExPolygons {
    if subject.is_empty() || clip.is_empty() {
        return Vec::new();
    }
    from_multi(&to_multi(subject).intersection(&to_multi(clip)))
}

/// `subject` minus `clip`.
pub fn difference(subject: &[ExPolygon], clip: &[ExPolygon]) -> ExPolygons {
    if subject.is_empty() {
        return Vec::new();
    }
    if clip.is_empty() {
        return subject.to_vec();
    }
    from_multi(&to_multi(subject).difference(&to_multi(clip)))
}

/// Grow (positive `delta`) or shrink (negative `delta`) a polygon set.
pub fn offset(polys: &[ExPolygon], delta: f64, join: OffsetJoinType) -> ExPolygons {
    if polys.is_empty() {
        return Vec::new();
    }
    if delta == 0.0 {
        return union_ex(polys);
    }
    let style = BufferStyle::new(delta).line_join(join.into());
    from_multi(&to_multi(polys).buffer_with_style(style))
}

/// Grow then shrink by `distance`: fills gaps narrower than twice the distance.
pub fn closing(polys: &[ExPolygon], distance: f64, join: OffsetJoinType) -> ExPolygons {
    if polys.is_empty() || distance <= 0.0 {
        return polys.to_vec();
    }
    let grown = offset(polys, distance, join);
    offset(&grown, -distance, join)
}

/// Shrink then grow by `distance`: removes features thinner than twice the distance.
pub fn opening(polys: &[ExPolygon], distance: f64, join: OffsetJoinType) -> ExPolygons {
    if polys.is_empty() || distance <= 0.0 {
        return polys.to_vec();
    }
    let shrunk = offset(polys, -distance, join);
    offset(&shrunk, distance, join)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polygon::total_area;
    use approx::assert_relative_eq;
    use resina_math::{BoundingBox, Vec2};

    fn square(x: f64, y: f64, size: f64) -> ExPolygon {
        ExPolygon::new(Polygon::rectangle(&BoundingBox::new(
            Point2::new(x, y),
            Point2::new(x + size, y + size),
        )))
    }

    #[test]
    fn test_union_of_overlapping_squares() {
        let merged = union_ex(&[square(0.0, 0.0, 10.0), square(5.0, 0.0, 10.0)]);
        assert_eq!(merged.len(), 1);
        assert_relative_eq!(total_area(&merged), 150.0, epsilon = 1e-6);
    }

    #[test]
    fn test_disjoint_union_keeps_both() {
        let merged = union(&[square(0.0, 0.0, 1.0)], &[square(5.0, 5.0, 1.0)]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_difference_creates_hole() {
        let result = difference(&[square(0.0, 0.0, 10.0)], &[square(4.0, 4.0, 2.0)]);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].holes.len(), 1);
        assert_relative_eq!(total_area(&result), 96.0, epsilon = 1e-6);
    }

    #[test]
    fn test_intersection_area() {
        let result = intersection(&[square(0.0, 0.0, 10.0)], &[square(5.0, 5.0, 10.0)]);
        assert_relative_eq!(total_area(&result), 25.0, epsilon = 1e-6);
    }

    #[test]
    fn test_offset_grow_and_shrink() {
        let grown = offset(&[square(0.0, 0.0, 10.0)], 1.0, OffsetJoinType::Miter);
        let bb = crate::polygon::bounding_box_of(&grown);
        assert_relative_eq!(bb.min.x, -1.0, epsilon = 1e-3);
        assert_relative_eq!(bb.max.y, 11.0, epsilon = 1e-3);

        let shrunk = offset(&[square(0.0, 0.0, 10.0)], -2.0, OffsetJoinType::Miter);
        assert_relative_eq!(total_area(&shrunk), 36.0, epsilon = 1e-3);

        assert!(offset(&[square(0.0, 0.0, 1.0)], -1.0, OffsetJoinType::Round).is_empty());
    }

    #[test]
    fn test_closing_bridges_narrow_gap() {
        let mut right = square(0.0, 0.0, 10.0);
        right.translate(&Vec2::new(10.5, 0.0));
        let closed = closing(&[square(0.0, 0.0, 10.0), right], 1.0, OffsetJoinType::Miter);
        assert_eq!(closed.len(), 1);
    }
}
