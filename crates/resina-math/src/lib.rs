#![warn(missing_docs)]

//! Math types shared by the resina crates.
//!
//! Thin wrappers around nalgebra: point and vector aliases, an affine
//! [`Transform`], axis-aligned boxes in 2D and 3D, and the tolerance
//! constants used throughout the geometry code.

use nalgebra::{Matrix4, Rotation3, Unit, Vector2, Vector3, Vector4};

/// A point in 3D space (mm).
pub type Point3 = nalgebra::Point3<f64>;

/// A vector in 3D space.
pub type Vec3 = Vector3<f64>;

/// A unit direction vector in 3D space.
pub type Dir3 = Unit<Vector3<f64>>;

/// A point on the print bed plane (mm).
pub type Point2 = nalgebra::Point2<f64>;

/// A vector in 2D space.
pub type Vec2 = Vector2<f64>;

/// Generic small number for geometric predicates (mm, mm² or mm³).
pub const EPSILON: f64 = 1e-4;

/// Linear tolerance used when deduplicating coincident vertices (mm).
pub const MERGE_TOLERANCE: f64 = 1e-6;

/// Upward unit vector.
pub fn up() -> Vec3 {
    Vec3::z()
}

/// Downward unit vector.
pub fn down() -> Vec3 {
    -Vec3::z()
}

/// A 4x4 affine transformation matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    /// The underlying 4x4 matrix.
    pub matrix: Matrix4<f64>,
}

impl Transform {
    /// Identity transform.
    pub fn identity() -> Self {
        Self {
            matrix: Matrix4::identity(),
        }
    }

    /// Translation by `(dx, dy, dz)`.
    pub fn translation(dx: f64, dy: f64, dz: f64) -> Self {
        Self {
            matrix: Matrix4::new_translation(&Vec3::new(dx, dy, dz)),
        }
    }

    /// Non-uniform scale.
    pub fn scale(sx: f64, sy: f64, sz: f64) -> Self {
        Self {
            matrix: Matrix4::new_nonuniform_scaling(&Vec3::new(sx, sy, sz)),
        }
    }

    /// Rotation about the Z axis by `angle` radians.
    pub fn rotation_z(angle: f64) -> Self {
        Self::rotation_about_axis(&Vec3::z_axis(), angle)
    }

    /// Rotation about an axis through the origin by `angle` radians.
    pub fn rotation_about_axis(axis: &Dir3, angle: f64) -> Self {
        Self {
            matrix: Rotation3::from_axis_angle(axis, angle).to_homogeneous(),
        }
    }

    /// Rotation that maps direction `from` onto direction `to`.
    ///
    /// Antiparallel inputs produce a half turn about an axis perpendicular
    /// to `from`.
    pub fn rotation_between(from: &Vec3, to: &Vec3) -> Self {
        let rot = match Rotation3::rotation_between(from, to) {
            Some(r) => r,
            None => {
                let helper = if from.x.abs() < 0.9 { Vec3::x() } else { Vec3::y() };
                let axis = Unit::new_normalize(from.cross(&helper));
                Rotation3::from_axis_angle(&axis, std::f64::consts::PI)
            }
        };
        Self {
            matrix: rot.to_homogeneous(),
        }
    }

    /// Compose: the result applies `other` first, then `self`.
    pub fn then(&self, other: &Transform) -> Self {
        Self {
            matrix: self.matrix * other.matrix,
        }
    }

    /// Transform a point.
    pub fn apply_point(&self, p: &Point3) -> Point3 {
        let v = self.matrix * Vector4::new(p.x, p.y, p.z, 1.0);
        Point3::new(v.x, v.y, v.z)
    }

    /// Transform a direction (translation ignored).
    pub fn apply_vec(&self, v: &Vec3) -> Vec3 {
        let r = self.matrix * Vector4::new(v.x, v.y, v.z, 0.0);
        Vec3::new(r.x, r.y, r.z)
    }

    /// Translation component.
    pub fn translation_part(&self) -> Vec3 {
        Vec3::new(
            self.matrix[(0, 3)],
            self.matrix[(1, 3)],
            self.matrix[(2, 3)],
        )
    }

    /// Determinant of the linear part. Negative for mirroring transforms.
    pub fn linear_determinant(&self) -> f64 {
        self.matrix.fixed_view::<3, 3>(0, 0).determinant()
    }

    /// Whether this is the identity within `tol`.
    pub fn is_identity(&self, tol: f64) -> bool {
        (self.matrix - Matrix4::identity()).abs().max() <= tol
    }

    /// Inverse of this transform, if it exists.
    pub fn inverse(&self) -> Option<Self> {
        self.matrix.try_inverse().map(|matrix| Self { matrix })
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

/// Axis-aligned bounding box in 3D.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb3 {
    /// Minimum corner.
    pub min: Point3,
    /// Maximum corner.
    pub max: Point3,
}

impl Aabb3 {
    /// Box from two corners.
    pub fn new(min: Point3, max: Point3) -> Self {
        Self { min, max }
    }

    /// An inverted box that contains nothing and absorbs the first point.
    pub fn empty() -> Self {
        Self {
            min: Point3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY),
            max: Point3::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
        }
    }

    /// Smallest box containing all `points`.
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Point3>) -> Self {
        let mut bb = Self::empty();
        for p in points {
            bb.include_point(p);
        }
        bb
    }

    /// Whether no point was ever included.
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Grow to contain `p`.
    pub fn include_point(&mut self, p: &Point3) {
        self.min = self.min.inf(p);
        self.max = self.max.sup(p);
    }

    /// Grow to contain `other`.
    pub fn merge(&mut self, other: &Aabb3) {
        if other.is_empty() {
            return;
        }
        self.include_point(&other.min);
        self.include_point(&other.max);
    }

    /// Whether the boxes overlap, with `tol` slack.
    pub fn overlaps(&self, other: &Aabb3, tol: f64) -> bool {
        self.min.x <= other.max.x + tol
            && self.max.x + tol >= other.min.x
            && self.min.y <= other.max.y + tol
            && self.max.y + tol >= other.min.y
            && self.min.z <= other.max.z + tol
            && self.max.z + tol >= other.min.z
    }

    /// Whether `p` lies inside or on the box.
    pub fn contains_point(&self, p: &Point3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    /// Box padded by `margin` on every side.
    pub fn expand(&self, margin: f64) -> Self {
        let m = Vec3::repeat(margin);
        Self {
            min: self.min - m,
            max: self.max + m,
        }
    }

    /// Center point.
    pub fn center(&self) -> Point3 {
        nalgebra::center(&self.min, &self.max)
    }

    /// Edge lengths.
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Index of the longest axis (0 = X, 1 = Y, 2 = Z).
    pub fn longest_axis(&self) -> usize {
        self.size().imax()
    }
}

/// Axis-aligned bounding box on the bed plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    /// Minimum corner.
    pub min: Point2,
    /// Maximum corner.
    pub max: Point2,
}

impl BoundingBox {
    /// Box from two corners.
    pub fn new(min: Point2, max: Point2) -> Self {
        Self { min, max }
    }

    /// An inverted box that absorbs the first point.
    pub fn empty() -> Self {
        Self {
            min: Point2::new(f64::INFINITY, f64::INFINITY),
            max: Point2::new(f64::NEG_INFINITY, f64::NEG_INFINITY),
        }
    }

    /// Smallest box containing all `points`.
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Point2>) -> Self {
        let mut bb = Self::empty();
        for p in points {
            bb.include_point(p);
        }
        bb
    }

    /// Whether the box is inverted or degenerate.
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y
    }

    /// Grow to contain `p`.
    pub fn include_point(&mut self, p: &Point2) {
        self.min = self.min.inf(p);
        self.max = self.max.sup(p);
    }

    /// Grow to contain `other`.
    pub fn merge(&mut self, other: &BoundingBox) {
        if other.is_empty() {
            return;
        }
        self.include_point(&other.min);
        self.include_point(&other.max);
    }

    /// Width along X.
    pub fn width(&self) -> f64 {
        self.max.x - self.min.x
    }

    /// Height along Y.
    pub fn height(&self) -> f64 {
        self.max.y - self.min.y
    }

    /// Edge lengths.
    pub fn size(&self) -> Vec2 {
        self.max - self.min
    }

    /// Center point.
    pub fn center(&self) -> Point2 {
        nalgebra::center(&self.min, &self.max)
    }

    /// Enclosed area, zero for empty boxes.
    pub fn area(&self) -> f64 {
        if self.is_empty() {
            0.0
        } else {
            self.width() * self.height()
        }
    }

    /// Whether `p` lies inside or on the box.
    pub fn contains(&self, p: &Point2) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }

    /// Whether `other` lies entirely inside this box, with `tol` slack.
    pub fn contains_box(&self, other: &BoundingBox, tol: f64) -> bool {
        other.min.x >= self.min.x - tol
            && other.min.y >= self.min.y - tol
            && other.max.x <= self.max.x + tol
            && other.max.y <= self.max.y + tol
    }

    /// Box grown (or shrunk, for negative `delta`) on every side.
    pub fn offset(&self, delta: f64) -> Self {
        let d = Vec2::repeat(delta);
        Self {
            min: self.min - d,
            max: self.max + d,
        }
    }

    /// Box moved by `v`.
    pub fn translated(&self, v: &Vec2) -> Self {
        Self {
            min: self.min + v,
            max: self.max + v,
        }
    }

    /// Corners in counter-clockwise order starting at `min`.
    pub fn corners(&self) -> [Point2; 4] {
        [
            self.min,
            Point2::new(self.max.x, self.min.y),
            self.max,
            Point2::new(self.min.x, self.max.y),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    #[test]
    fn test_translation_and_inverse() {
        let t = Transform::translation(1.0, 2.0, 3.0);
        let p = t.apply_point(&Point3::new(5.0, 6.0, 7.0));
        assert_relative_eq!(p, Point3::new(6.0, 8.0, 10.0), epsilon = 1e-12);

        let inv = t.inverse().unwrap();
        assert!(t.then(&inv).is_identity(1e-12));
        assert_relative_eq!(t.translation_part(), Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_rotation_z_quarter_turn() {
        let t = Transform::rotation_z(PI / 2.0);
        let p = t.apply_point(&Point3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(p, Point3::new(0.0, 1.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn test_compose_applies_right_operand_first() {
        let translate = Transform::translation(1.0, 0.0, 0.0);
        let scale = Transform::scale(2.0, 2.0, 2.0);
        let p = scale.then(&translate).apply_point(&Point3::origin());
        assert_relative_eq!(p.x, 2.0);
    }

    #[test]
    fn test_rotation_between_maps_directions() {
        let t = Transform::rotation_between(&Vec3::z(), &Vec3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(t.apply_vec(&Vec3::z()), Vec3::x(), epsilon = 1e-12);

        let flip = Transform::rotation_between(&Vec3::z(), &-Vec3::z());
        assert_relative_eq!(flip.apply_vec(&Vec3::z()), -Vec3::z(), epsilon = 1e-12);
        assert_relative_eq!(flip.linear_determinant(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_mirror_has_negative_determinant() {
        assert!(Transform::scale(-1.0, 1.0, 1.0).linear_determinant() < 0.0);
    }

    #[test]
    fn test_aabb3_merge_and_overlap() {
        let mut a = Aabb3::from_points(&[Point3::origin(), Point3::new(1.0, 1.0, 1.0)]);
        let b = Aabb3::new(Point3::new(2.0, 0.0, 0.0), Point3::new(3.0, 1.0, 1.0));
        assert!(!a.overlaps(&b, 0.0));
        assert!(a.overlaps(&b, 1.0));
        a.merge(&b);
        assert_eq!(a.longest_axis(), 0);
        assert_relative_eq!(a.center(), Point3::new(1.5, 0.5, 0.5));
        assert!(Aabb3::empty().is_empty());
    }

    #[test]
    fn test_bounding_box_2d() {
        let bb = BoundingBox::from_points(&[Point2::new(-1.0, -2.0), Point2::new(3.0, 2.0)]);
        assert_relative_eq!(bb.area(), 16.0);
        assert_relative_eq!(bb.center(), Point2::new(1.0, 0.0));
        assert!(bb.contains(&Point2::new(0.0, 0.0)));
        assert!(bb.offset(1.0).contains_box(&bb, 0.0));
        assert!(!bb.contains_box(&bb.offset(1.0), 0.0));
        assert_relative_eq!(BoundingBox::empty().area(), 0.0);
    }
}
