//! The pad: a plate under the support tree, optionally wrapping the
//! model when it is embedded at zero elevation.

use resina_math::{Point2, Point3, Vec2, Vec3, EPSILON, MERGE_TOLERANCE};
use resina_mesh::clipper::{closing, difference, offset, union, union_ex, OffsetJoinType};
use resina_mesh::triangulate::triangulate_expolygon;
use resina_mesh::{slice_mesh, slice_mesh_solid, ExPolygon, ExPolygons, Polygon, TriangleMesh};
use tracing::debug;

use crate::config::PadConfig;
use crate::ctl::JobController;
use crate::error::Result;
use crate::point::{ground_level, SupportableMesh};

/// Layer height used to sample footprints for the pad outline.
pub const PAD_SAMPLING_LH: f64 = 0.1;

/// Heights from `zstart` up to `zend`, `PAD_SAMPLING_LH` apart.
pub fn sample_heights(zstart: f64, zend: f64) -> Vec<f64> {
    if zend <= zstart {
        return Vec::new();
    }
    let n = ((zend - zstart) / PAD_SAMPLING_LH).ceil() as usize;
    (0..=n)
        .map(|i| zstart + i as f64 * PAD_SAMPLING_LH)
        .filter(|z| *z <= zend)
        .collect()
}

/// Union of the footprints of a support mesh over `heights`.
pub fn support_blueprint(mesh: &TriangleMesh, heights: &[f64]) -> ExPolygons {
    union_ex(&slice_mesh_solid(mesh, heights, 0.0).concat())
}

/// Union of the footprints of a model over `heights`.
pub fn model_blueprint(mesh: &TriangleMesh, heights: &[f64]) -> ExPolygons {
    union_ex(&slice_mesh(mesh, heights, 0.0).concat())
}

/// Move every vertex of `ring` outward by `d` along its corner bisector.
///
/// Vertex count and order are kept, so the result pairs with the input
/// for wall quads. Outward is to the right of the edges, which is away
/// from the material for both contours and holes.
fn grow_ring(ring: &Polygon, d: f64) -> Polygon {
    let pts = &ring.points;
    let n = pts.len();
    if n < 3 || d.abs() <= EPSILON {
        return ring.clone();
    }
    let normal = |a: &Point2, b: &Point2| {
        let e = b - a;
        Vec2::new(e.y, -e.x).try_normalize(1e-12).unwrap_or_else(Vec2::zeros)
    };
    let grown = (0..n)
        .map(|i| {
            let prev = &pts[(i + n - 1) % n];
            let next = &pts[(i + 1) % n];
            let n1 = normal(prev, &pts[i]);
            let n2 = normal(&pts[i], next);
            let Some(bis) = (n1 + n2).try_normalize(1e-9) else {
                return pts[i] + n1 * d;
            };
            let cos_half = bis.dot(&n1).max(0.5);
            pts[i] + bis * (d / cos_half)
        })
        .collect();
    Polygon::new(grown)
}

fn lift(p: &Point2, z: f64) -> Point3 {
    Point3::new(p.x, p.y, z)
}

fn add_cap(mesh: &mut TriangleMesh, ex: &ExPolygon, z: f64, facing_up: bool) {
    let (pts, tris) = triangulate_expolygon(ex);
    let base = mesh.vertices.len() as u32;
    mesh.vertices.extend(pts.iter().map(|p| lift(p, z)));
    mesh.indices.extend(tris.iter().map(|t| {
        if facing_up {
            [base + t[0], base + t[1], base + t[2]]
        } else {
            [base + t[0], base + t[2], base + t[1]]
        }
    }));
}

fn add_walls(mesh: &mut TriangleMesh, bottom: &Polygon, top: &Polygon, zb: f64, zt: f64) {
    let n = top.points.len();
    if n < 3 || bottom.points.len() != n {
        return;
    }
    let base = mesh.vertices.len() as u32;
    mesh.vertices.extend(bottom.points.iter().map(|p| lift(p, zb)));
    mesh.vertices.extend(top.points.iter().map(|p| lift(p, zt)));
    let b = |i: usize| base + (i % n) as u32;
    let t = |i: usize| base + (n + i % n) as u32;
    for i in 0..n {
        mesh.indices.push([b(i), b(i + 1), t(i + 1)]);
        mesh.indices.push([b(i), t(i + 1), t(i)]);
    }
}

/// Side walls between `ex` at `zt` and `ex` grown by `grow` at `zb`.
/// Returns the grown outline.
fn add_side_walls(mesh: &mut TriangleMesh, ex: &ExPolygon, grow: f64, zb: f64, zt: f64) -> ExPolygon {
    let bottom = ExPolygon {
        contour: grow_ring(&ex.contour, grow),
        holes: ex.holes.iter().map(|h| grow_ring(h, grow)).collect(),
    };
    add_walls(mesh, &bottom.contour, &ex.contour, zb, zt);
    for (hb, ht) in bottom.holes.iter().zip(&ex.holes) {
        add_walls(mesh, hb, ht, zb, zt);
    }
    bottom
}

/// Closed solid between `ex` at `zt` and `ex` grown by `grow` at `zb`.
fn extrude(ex: &ExPolygon, grow: f64, zb: f64, zt: f64) -> TriangleMesh {
    let mut mesh = TriangleMesh::new();
    if ex.is_empty() || zt - zb <= EPSILON {
        return mesh;
    }
    let bottom = add_side_walls(&mut mesh, ex, grow, zb, zt);
    add_cap(&mut mesh, ex, zt, true);
    add_cap(&mut mesh, &bottom, zb, false);
    mesh
}

/// Floor under `ex` with a rim of width `wt` standing on its border.
///
/// The floor top is capped only inside the rim and the rim has no bottom
/// cap, so the two share their boundary at z = 0 without inner faces.
fn floor_with_rim(ex: &ExPolygon, grow: f64, wt: f64, wh: f64) -> TriangleMesh {
    let mut mesh = TriangleMesh::new();
    if ex.is_empty() {
        return mesh;
    }
    let bottom = add_side_walls(&mut mesh, ex, grow, -wt, 0.0);
    add_cap(&mut mesh, &bottom, -wt, false);
    let inner = offset(std::slice::from_ref(ex), -wt, OffsetJoinType::Miter);
    for floor_top in &inner {
        add_cap(&mut mesh, floor_top, 0.0, true);
    }
    for rim in difference(std::slice::from_ref(ex), &inner) {
        add_side_walls(&mut mesh, &rim, 0.0, 0.0, wh);
        add_cap(&mut mesh, &rim, wh, true);
    }
    mesh
}

/// Connector rectangles from the model outline across the object gap,
/// one every `stick_stride_mm` along each outer contour. Only sticks
/// ending on `pad` are kept.
fn embed_sticks(model: &[ExPolygon], pad: &[ExPolygon], cfg: &PadConfig) -> ExPolygons {
    let eo = &cfg.embed_object;
    if eo.stick_stride_mm <= EPSILON || eo.stick_width_mm <= EPSILON {
        return Vec::new();
    }
    let reach = eo.object_gap_mm + cfg.wall_thickness_mm;
    let half_w = eo.stick_width_mm / 2.0;
    let mut sticks = Vec::new();
    for ex in model {
        let pts = &ex.contour.points;
        let n = pts.len();
        let mut next_at = eo.stick_stride_mm / 2.0;
        let mut walked = 0.0;
        for i in 0..n {
            let (a, b) = (pts[i], pts[(i + 1) % n]);
            let e = b - a;
            let len = e.norm();
            if len <= EPSILON {
                continue;
            }
            let dir = e / len;
            let out = Vec2::new(dir.y, -dir.x);
            while next_at <= walked + len {
                let p = a + dir * (next_at - walked);
                let inner = p - out * eo.stick_penetration_mm;
                let outer = p + out * reach;
                next_at += eo.stick_stride_mm;
                if !pad.iter().any(|ex| ex.contains(&outer)) {
                    continue;
                }
                sticks.push(ExPolygon::new(Polygon::new(vec![
                    inner - dir * half_w,
                    outer - dir * half_w,
                    outer + dir * half_w,
                    inner + dir * half_w,
                ])));
            }
            walked += len;
        }
    }
    sticks
}

/// 2D outline of the pad from support and model footprints.
pub fn pad_outline(sup: &[ExPolygon], model: &[ExPolygon], cfg: &PadConfig) -> ExPolygons {
    let eo = &cfg.embed_object;
    let join = OffsetJoinType::Round;
    if !eo.enabled {
        let all = union(sup, model);
        let merged = closing(&all, cfg.max_merge_dist_mm / 2.0, join);
        return offset(&merged, cfg.brim_size_mm, join);
    }

    let model = union_ex(model);
    let mut area = sup.to_vec();
    if eo.everywhere {
        area.extend(model.iter().cloned());
    }
    let merged = closing(&union_ex(&area), cfg.max_merge_dist_mm / 2.0, join);
    let outline = offset(&merged, cfg.brim_size_mm + eo.object_gap_mm, join);
    let keepout = offset(&model, eo.object_gap_mm, join);
    let pad = difference(&outline, &keepout);
    let sticks = embed_sticks(&model, &pad, cfg);
    union(&pad, &sticks)
}

/// Pad mesh for the given footprints, with its top at z = 0.
///
/// A floor plate spans `-wall_thickness..0`; elevated pads slope its
/// sides by `wall_slope`. A rim of `wall_thickness` width rises to
/// `wall_height` along the outline.
pub fn create_pad_geometry(sup: &[ExPolygon], model: &[ExPolygon], cfg: &PadConfig) -> TriangleMesh {
    let outline = pad_outline(sup, model, cfg);
    let wt = cfg.wall_thickness_mm;
    let wh = cfg.wall_height_mm;
    let grow = if cfg.embed_object.enabled || cfg.wall_slope.tan() <= EPSILON {
        0.0
    } else {
        wt / cfg.wall_slope.tan()
    };

    let mut mesh = TriangleMesh::new();
    for ex in &outline {
        if wh > EPSILON {
            mesh.merge(&floor_with_rim(ex, grow, wt, wh));
        } else {
            mesh.merge(&extrude(ex, grow, -wt, 0.0));
        }
    }
    mesh.merge_vertices(MERGE_TOLERANCE);
    mesh
}

/// Build the pad under `support_mesh` and place it at ground level.
///
/// Model footprints count when supports are disabled or the model is
/// embedded in the pad.
pub fn create_pad(
    sm: &SupportableMesh,
    support_mesh: &TriangleMesh,
    ctl: &JobController,
) -> Result<TriangleMesh> {
    let pcfg = &sm.pad_cfg;
    let embed = pcfg.embed_object.enabled;
    let gnd = ground_level(sm);
    let zstart = if embed { gnd - pcfg.wall_thickness_mm } else { gnd };
    let zend = zstart + pcfg.full_height() + PAD_SAMPLING_LH + EPSILON;
    let heights = sample_heights(zstart, zend);

    ctl.check()?;
    let sup = support_blueprint(support_mesh, &heights);
    let model = if !sm.cfg.enabled || embed {
        model_blueprint(sm.emesh.mesh(), &heights)
    } else {
        Vec::new()
    };

    ctl.check()?;
    let mut pad = create_pad_geometry(&sup, &model, pcfg);
    pad.translate(&Vec3::new(0.0, 0.0, gnd));
    pad.merge_vertices(MERGE_TOLERANCE);
    debug!(
        triangles = pad.num_triangles(),
        support_islands = sup.len(),
        model_islands = model.len(),
        "pad created"
    );
    Ok(pad)
}

/// An empty pad is only fine when the model is embedded and the pad is
/// wanted under the supports alone.
pub fn validate_pad(pad: &TriangleMesh, cfg: &PadConfig) -> bool {
    !pad.is_empty() || (cfg.embed_object.enabled && !cfg.embed_object.everywhere)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use resina_math::BoundingBox;
    use resina_mesh::polygon::total_area;

    fn square(x0: f64, y0: f64, side: f64) -> ExPolygon {
        ExPolygon::new(Polygon::rectangle(&BoundingBox::new(
            Point2::new(x0, y0),
            Point2::new(x0 + side, y0 + side),
        )))
    }

    #[test]
    fn test_sample_heights() {
        let hs = sample_heights(1.0, 1.35);
        assert_eq!(hs.len(), 4);
        assert_relative_eq!(hs[3], 1.3, epsilon = 1e-9);
        assert!(sample_heights(2.0, 1.0).is_empty());
    }

    #[test]
    fn test_grow_ring_square() {
        let ring = square(0.0, 0.0, 2.0).contour;
        let grown = grow_ring(&ring, 1.0);
        assert_eq!(grown.len(), 4);
        assert_relative_eq!(grown.area(), 16.0, epsilon = 1e-9);
    }

    #[test]
    fn test_elevated_pad_geometry() {
        let cfg = PadConfig::default();
        let pad = create_pad_geometry(&[square(-5.0, -5.0, 10.0)], &[], &cfg);
        assert!(!pad.is_empty());
        let bb = pad.bounding_box();
        assert_relative_eq!(bb.min.z, -cfg.wall_thickness_mm, epsilon = 1e-9);
        assert_relative_eq!(bb.max.z, cfg.wall_height_mm, epsilon = 1e-9);
        assert!(bb.max.x >= 5.0 + cfg.brim_size_mm - 1e-6);

        let floor = slice_mesh(&pad, &[-0.5], 0.0);
        assert_eq!(floor[0].len(), 1);
        let rim = slice_mesh(&pad, &[0.5], 0.0);
        assert_eq!(rim[0].len(), 1);
        assert_eq!(rim[0][0].holes.len(), 1);
        assert!(total_area(&rim[0]) < total_area(&floor[0]));
    }

    #[test]
    fn test_empty_footprint_gives_empty_pad() {
        let pad = create_pad_geometry(&[], &[], &PadConfig::default());
        assert!(pad.is_empty());
        assert!(!validate_pad(&pad, &PadConfig::default()));
        let mut cfg = PadConfig::default();
        cfg.embed_object.enabled = true;
        assert!(validate_pad(&pad, &cfg));
        cfg.embed_object.everywhere = true;
        assert!(!validate_pad(&pad, &cfg));
    }

    #[test]
    fn test_rim_stands_on_floor_without_inner_faces() {
        let cfg = PadConfig::default();
        let sup = [square(-5.0, -5.0, 10.0)];
        let pad = create_pad_geometry(&sup, &[], &cfg);
        let outline = pad_outline(&sup, &[], &cfg);
        let inner = offset(&outline, -cfg.wall_thickness_mm, OffsetJoinType::Miter);

        let mut up_area = 0.0;
        for i in 0..pad.num_triangles() {
            let [a, b, c] = pad.triangle(i);
            if [a.z, b.z, c.z].iter().any(|z| z.abs() > 1e-9) {
                continue;
            }
            let n = (b - a).cross(&(c - a));
            assert!(n.z > -1e-9, "downward face at z = 0");
            up_area += n.norm() / 2.0;
        }
        assert_relative_eq!(up_area, total_area(&inner), epsilon = 1e-6);
        let rim = slice_mesh(&pad, &[0.5], 0.0);
        assert_eq!(rim[0][0].holes.len(), 1);
    }

    #[test]
    fn test_embedded_pad_without_footprint_validates() {
        let mut pad_cfg = PadConfig::default();
        pad_cfg.embed_object.enabled = true;
        pad_cfg.embed_object.everywhere = false;
        let sm = SupportableMesh::new(
            resina_mesh::primitives::cube(10.0, 10.0, 10.0),
            Vec::new(),
            crate::config::SupportTreeConfig::default(),
        )
        .with_pad(pad_cfg.clone());

        let pad = create_pad(&sm, &TriangleMesh::new(), &JobController::new()).unwrap();
        assert!(pad.is_empty());
        assert!(validate_pad(&pad, &pad_cfg));
    }

    #[test]
    fn test_embedded_pad_keeps_gap_with_sticks() {
        let mut cfg = PadConfig {
            wall_height_mm: 0.0,
            ..Default::default()
        };
        cfg.embed_object.enabled = true;
        cfg.embed_object.everywhere = true;
        let model = [square(0.0, 0.0, 10.0)];
        let outline = pad_outline(&[], &model, &cfg);
        assert_eq!(outline.len(), 1);
        assert_eq!(outline[0].holes.len(), 1);
        let inside = |p: Point2| outline.iter().any(|ex| ex.contains(&p));
        assert!(!inside(Point2::new(5.0, 5.0)));
        assert!(!inside(Point2::new(2.0, -0.5)));
        assert!(inside(Point2::new(5.0, -0.5)));
        assert!(inside(Point2::new(5.0, -1.5)));

        let pad = create_pad_geometry(&[], &model, &cfg);
        let bb = pad.bounding_box();
        assert_relative_eq!(bb.min.z, -cfg.wall_thickness_mm, epsilon = 1e-9);
        assert_relative_eq!(bb.max.z, 0.0, epsilon = 1e-9);
    }
}
