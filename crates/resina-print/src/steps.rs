//! Bodies of the object steps.
//!
//! Every body reads the outputs of earlier steps and stores its own output
//! only after its last cancellation check.

use std::sync::Arc;

use rayon::prelude::*;
use resina_boolean::{
    check_csgmesh_booleans, csgmesh_merge_positive_parts, difference, perform_csgmesh_booleans,
    BooleanOp, CsgPart,
};
use resina_math::{Transform, Vec3, EPSILON};
use resina_mesh::clipper::{offset, OffsetJoinType};
use resina_mesh::polygon::total_area;
use resina_mesh::primitives::cylinder;
use resina_mesh::{slice_mesh, slice_mesh_solid, ExPolygon, ExPolygons, TriangleMesh};
use resina_support::{
    create_pad, create_support_tree, validate_pad, SupportError, SupportableMesh, DEFAULT_MESH_STEPS,
};
use resina_voxel::{generate_interior, hollow_mesh};
use tracing::{debug, info, warn};

use crate::config::{
    is_zero_elevation, make_hollowing_cfg, make_pad_cfg, make_support_cfg, support_head_diameter,
    SlaMaterialConfig, SlaPrinterConfig, SlicingMode,
};
use crate::error::{PrintError, Result};
use crate::job::{support_controller, JobControl};
use crate::model::{DrainHole, ModelObject, PointsStatus, VolumeType};
use crate::object::{PrintObject, SliceIndex, SliceRecord};
use crate::step::{ObjectStep, Step};
use crate::support_points::{filter_by_modifiers, generate_support_points, SupportPointsConfig};

/// How far drain hole cylinders start outside the surface (mm).
pub const HOLE_STICK_OUT_MM: f64 = 1.0;

/// What a step body may read besides its object.
pub(crate) struct StepContext<'a> {
    pub printer: &'a SlaPrinterConfig,
    pub material: &'a SlaMaterialConfig,
    /// Layer height shared by every object of the print.
    pub layer_height: f64,
    pub job: &'a Arc<dyn JobControl>,
    /// Status when the step started and the share of progress it owns.
    pub status: f64,
    pub status_span: f64,
}

impl StepContext<'_> {
    fn canceled(&self) -> bool {
        self.job.was_canceled()
    }

    fn check(&self) -> Result<()> {
        if self.canceled() {
            Err(PrintError::Canceled)
        } else {
            Ok(())
        }
    }
}

pub(crate) fn execute(po: &mut PrintObject, step: ObjectStep, ctx: &StepContext<'_>) -> Result<()> {
    match step {
        ObjectStep::Assembly => assembly(po, ctx),
        ObjectStep::Hollowing => hollowing(po, ctx),
        ObjectStep::DrillHoles => drill_holes(po, ctx),
        ObjectStep::ObjectSlice => slice_model(po, ctx),
        ObjectStep::SupportPoints => support_points(po, ctx),
        ObjectStep::SupportTree => support_tree(po, ctx),
        ObjectStep::Pad => generate_pad(po, ctx),
        ObjectStep::SliceSupports => slice_supports(po, ctx),
    }
}

fn csg_parts(mo: &ModelObject, trafo: &Transform) -> Vec<CsgPart> {
    let place = |kind: VolumeType, op: BooleanOp| {
        mo.volumes
            .iter()
            .filter(move |v| v.volume_type == kind)
            .map(move |v| CsgPart::new(v.mesh.clone(), op).with_transform(trafo.then(&v.transform)))
    };
    place(VolumeType::ModelPart, BooleanOp::Union)
        .chain(place(VolumeType::NegativeVolume, BooleanOp::Difference))
        .collect()
}

fn assembly(po: &mut PrintObject, ctx: &StepContext<'_>) -> Result<()> {
    let parts = csg_parts(&po.model_object, &po.trafo);
    let name = &po.model_object.name;
    let mesh = if parts.len() <= 1 {
        csgmesh_merge_positive_parts(&parts)
    } else {
        let bad = check_csgmesh_booleans(&parts, |idx, v| {
            warn!(object = %name, part = idx, validation = ?v, "part is not a valid boolean operand");
        });
        if bad.is_some() {
            warn!(object = %name, "merging positive parts without booleans");
            csgmesh_merge_positive_parts(&parts)
        } else {
            perform_csgmesh_booleans(&parts)
        }
    };
    ctx.check()?;
    debug!(object = %name, parts = parts.len(), triangles = mesh.num_triangles(), "assembled");
    po.assembled_mesh = mesh;
    Ok(())
}

fn hollowing(po: &mut PrintObject, ctx: &StepContext<'_>) -> Result<()> {
    if !po.config.hollowing_enable {
        po.interior = None;
        return Ok(());
    }
    let hc = make_hollowing_cfg(&po.config);
    let interior = generate_interior(&po.assembled_mesh, &hc, &|| ctx.canceled())?;
    ctx.check()?;
    if interior.mesh.is_empty() {
        warn!(object = %po.model_object.name, "hollowing left no cavity");
        po.interior = None;
    } else {
        po.interior = Some(interior);
    }
    Ok(())
}

fn hole_mesh(hole: &DrainHole, trafo: &Transform) -> Option<TriangleMesh> {
    let normal = trafo.apply_vec(&hole.normal).try_normalize(EPSILON)?;
    let start = trafo.apply_point(&hole.pos) + normal * HOLE_STICK_OUT_MM;
    let mut mesh = cylinder(hole.radius, hole.height + HOLE_STICK_OUT_MM, DEFAULT_MESH_STEPS);
    let place = Transform::translation(start.x, start.y, start.z)
        .then(&Transform::rotation_between(&Vec3::z(), &-normal));
    mesh.transform(&place);
    Some(mesh)
}

fn drill_holes(po: &mut PrintObject, ctx: &StepContext<'_>) -> Result<()> {
    let mut mesh = po.assembled_mesh.clone();
    if let Some(interior) = &po.interior {
        hollow_mesh(&mut mesh, interior);
    }
    for hole in &po.model_object.drain_holes {
        ctx.check()?;
        let Some(cyl) = hole_mesh(hole, &po.trafo) else {
            warn!(object = %po.model_object.name, "drain hole without direction skipped");
            continue;
        };
        if !difference(&mut mesh, &cyl) {
            return Err(PrintError::Slicing(
                "Drilling holes into the mesh failed. This is usually caused by broken model. Try to fix it first."
                    .into(),
            ));
        }
    }
    ctx.check()?;
    po.mesh_to_print = mesh;
    Ok(())
}

/// Absolute correction on every layer, elephant foot compensation fading
/// out over the first layers. `start` is the first record with a slice.
pub(crate) fn apply_printer_corrections(
    slices: &mut [ExPolygons],
    start: usize,
    records: usize,
    faded_layers: u32,
    printer: &SlaPrinterConfig,
) {
    let absolute = printer.absolute_correction;
    if absolute != 0.0 {
        slices
            .par_iter_mut()
            .for_each(|s| *s = offset(s, absolute, OffsetJoinType::Miter));
    }

    let start_efc = printer.elefant_foot_compensation;
    if start_efc > 0.0 {
        let faded = (faded_layers as usize).min(records);
        let n = faded.saturating_sub(1).max(1);
        let min_w = 0.5 * printer.elefant_foot_min_width;
        for i in 0..faded {
            let Some(s) = i.checked_sub(start).and_then(|idx| slices.get_mut(idx)) else {
                continue;
            };
            let delta = n.saturating_sub(i) as f64 * start_efc / n as f64;
            *s = elephant_foot(s, min_w, delta);
        }
    }
}

/// Shrink every island by `delta`, leaving those too thin to survive it.
fn elephant_foot(polys: &[ExPolygon], min_w: f64, delta: f64) -> ExPolygons {
    if delta <= 0.0 {
        return polys.to_vec();
    }
    let mut out = Vec::with_capacity(polys.len());
    for p in polys {
        let one = std::slice::from_ref(p);
        if total_area(&offset(one, -(delta + min_w), OffsetJoinType::Miter)) <= EPSILON {
            out.push(p.clone());
        } else {
            out.extend(offset(one, -delta, OffsetJoinType::Miter));
        }
    }
    out
}

fn slice_model(po: &mut PrintObject, ctx: &StepContext<'_>) -> Result<()> {
    let unsliceable = || {
        PrintError::Slicing(format!(
            "Model named: {} can not be sliced. Please check if the model is sane.",
            po.model_object.name
        ))
    };
    let lh = ctx.layer_height;
    let ilh = ctx.material.initial_layer_height;
    if po.mesh_to_print.is_empty() {
        return Err(unsliceable());
    }
    if lh <= 0.0 || ilh <= 0.0 {
        return Err(PrintError::Config("layer heights must be positive".into()));
    }

    let bb = po.mesh_to_print.bounding_box();
    let min_z = bb.min.z - po.get_elevation();
    let max_z = bb.max.z;

    let mut records = vec![SliceRecord {
        print_level: min_z + ilh,
        slice_level: min_z + ilh / 2.0,
        layer_height: ilh,
    }];
    for k in 1.. {
        let h = min_z + ilh + k as f64 * lh;
        if h > max_z + 1e-9 {
            break;
        }
        records.push(SliceRecord {
            print_level: h,
            slice_level: h - lh / 2.0,
            layer_height: lh,
        });
    }

    let model_start = records
        .iter()
        .position(|r| r.slice_level >= bb.min.z - EPSILON)
        .ok_or_else(unsliceable)?;
    let index = SliceIndex { records, model_start };
    let levels = index.model_levels();
    ctx.check()?;

    let closing = po.config.slice_closing_radius;
    let mut slices = match po.config.slicing_mode {
        SlicingMode::CloseHoles => slice_mesh_solid(&po.mesh_to_print, &levels, closing),
        SlicingMode::Regular | SlicingMode::EvenOdd => slice_mesh(&po.mesh_to_print, &levels, closing),
    };
    apply_printer_corrections(
        &mut slices,
        model_start,
        index.records.len(),
        po.config.faded_layers,
        ctx.printer,
    );
    ctx.check()?;

    debug!(
        object = %po.model_object.name,
        records = index.records.len(),
        model_layers = slices.len(),
        "model sliced"
    );
    po.slice_index = index;
    po.model_slices = slices;
    Ok(())
}

fn slice_volumes(po: &PrintObject, kind: VolumeType, levels: &[f64]) -> Vec<ExPolygons> {
    let mut mesh = po.model_object.volumes_mesh(kind);
    if mesh.is_empty() {
        return Vec::new();
    }
    mesh.transform(&po.trafo);
    slice_mesh(&mesh, levels, po.config.slice_closing_radius)
}

fn support_points(po: &mut PrintObject, ctx: &StepContext<'_>) -> Result<()> {
    let c = &po.config;
    if !c.supports_enable && !c.pad_enable {
        po.support_input = None;
        return Ok(());
    }
    let zoffset = po.mesh_to_print.bounding_box().min.z;
    let mut sm = SupportableMesh::new(po.mesh_to_print.clone(), Vec::new(), make_support_cfg(c))
        .with_pad(make_pad_cfg(c))
        .with_zoffset(zoffset);
    ctx.check()?;

    if c.supports_enable {
        let mo = &po.model_object;
        sm.pts = if mo.points_status == PointsStatus::UserModified {
            mo.support_points
                .iter()
                .map(|sp| {
                    let mut sp = *sp;
                    sp.pos = po.trafo.apply_point(&sp.pos);
                    sp
                })
                .collect()
        } else {
            let cfg = SupportPointsConfig {
                density_relative: f64::from(c.support_points_density_relative) / 100.0,
                minimal_distance: c.support_points_minimal_distance,
                head_diameter: support_head_diameter(c),
            };
            let levels = po.slice_index.model_levels();
            let mut pts = generate_support_points(
                &sm.emesh,
                &po.model_slices,
                &levels,
                &cfg,
                &|| ctx.canceled(),
            )?;
            ctx.check()?;
            let blockers = slice_volumes(po, VolumeType::SupportBlocker, &levels);
            let enforcers = slice_volumes(po, VolumeType::SupportEnforcer, &levels);
            filter_by_modifiers(&mut pts, &blockers, &enforcers, c.support_enforcers_only, &levels);
            pts
        };
    }
    ctx.check()?;

    debug!(object = %po.model_object.name, points = sm.pts.len(), "support points ready");
    po.support_input = Some(sm);
    Ok(())
}

/// Support input with the current tree and pad settings.
fn tree_input(po: &PrintObject) -> Option<SupportableMesh> {
    let mut sm = po.support_input.clone()?;
    sm.cfg = make_support_cfg(&po.config);
    sm.pad_cfg = make_pad_cfg(&po.config);
    if is_zero_elevation(&po.config) {
        let bottom = sm.zoffset + EPSILON;
        sm.pts.retain(|p| p.pos.z > bottom);
    }
    Some(sm)
}

fn support_tree(po: &mut PrintObject, ctx: &StepContext<'_>) -> Result<()> {
    let Some(sm) = tree_input(po) else {
        po.support_mesh = TriangleMesh::new();
        return Ok(());
    };
    let label = ObjectStep::SupportTree.label();
    let ctl = support_controller(ctx.job, ctx.status, ctx.status_span, label);
    let mesh = match create_support_tree(&sm, &ctl) {
        Ok(mesh) => mesh,
        Err(SupportError::NotImplemented(what)) => {
            warn!(object = %po.model_object.name, %what, "continuing without supports");
            TriangleMesh::new()
        }
        Err(e) => return Err(e.into()),
    };
    ctx.check()?;
    info!(
        object = %po.model_object.name,
        points = sm.pts.len(),
        triangles = mesh.num_triangles(),
        "support tree ready"
    );
    po.support_mesh = mesh;
    Ok(())
}

fn generate_pad(po: &mut PrintObject, ctx: &StepContext<'_>) -> Result<()> {
    if !po.config.pad_enable {
        po.pad_mesh = TriangleMesh::new();
        return Ok(());
    }
    let pcfg = make_pad_cfg(&po.config);
    pcfg.validate().map_err(|e| PrintError::Slicing(e.to_string()))?;
    let Some(sm) = tree_input(po) else {
        po.pad_mesh = TriangleMesh::new();
        return Ok(());
    };
    let label = ObjectStep::Pad.label();
    let ctl = support_controller(ctx.job, ctx.status, ctx.status_span, label);
    let pad = create_pad(&sm, &po.support_mesh, &ctl)?;
    if !validate_pad(&pad, &pcfg) {
        return Err(PrintError::Slicing(
            "No pad can be generated for this model with the current configuration".into(),
        ));
    }
    ctx.check()?;
    po.pad_mesh = pad;
    Ok(())
}

fn slice_supports(po: &mut PrintObject, ctx: &StepContext<'_>) -> Result<()> {
    if !po.config.supports_enable && !po.config.pad_enable {
        po.support_slices = Vec::new();
        return Ok(());
    }
    let heights: Vec<f64> = po.slice_index.records.iter().map(|r| r.slice_level).collect();
    let mut slices = resina_support::slice(
        &po.support_mesh,
        &po.pad_mesh,
        &heights,
        po.config.slice_closing_radius,
    );
    apply_printer_corrections(&mut slices, 0, heights.len(), po.config.faded_layers, ctx.printer);
    ctx.check()?;
    po.support_slices = slices;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use resina_math::{BoundingBox, Point2, Point3};
    use resina_mesh::primitives::cube;
    use resina_mesh::Polygon;

    use crate::config::SlaPrintObjectConfig;
    use crate::job::SimpleJob;
    use crate::model::ModelVolume;

    fn square(side: f64) -> ExPolygon {
        ExPolygon::new(Polygon::rectangle(&BoundingBox::new(
            Point2::new(0.0, 0.0),
            Point2::new(side, side),
        )))
    }

    fn run(po: &mut PrintObject, steps: &[ObjectStep], material: &SlaMaterialConfig) -> Result<()> {
        let printer = SlaPrinterConfig::default();
        let job: Arc<dyn JobControl> = Arc::new(SimpleJob::new());
        let ctx = StepContext {
            printer: &printer,
            material,
            layer_height: po.config.layer_height,
            job: &job,
            status: 0.0,
            status_span: 10.0,
        };
        for step in steps {
            execute(po, *step, &ctx)?;
        }
        Ok(())
    }

    fn object(mo: ModelObject, config: SlaPrintObjectConfig) -> PrintObject {
        PrintObject::new(mo, config, Transform::identity(), Vec::new())
    }

    #[test]
    fn test_assembly_removes_negative_volumes() {
        let mut mo = ModelObject::new("block", cube(10.0, 10.0, 10.0));
        mo.volumes.push(
            ModelVolume::new(cube(4.0, 4.0, 20.0))
                .with_type(VolumeType::NegativeVolume)
                .with_transform(Transform::translation(3.0, 3.0, -5.0)),
        );
        let mut po = object(mo, SlaPrintObjectConfig::default());
        run(&mut po, &[ObjectStep::Assembly], &SlaMaterialConfig::default()).unwrap();
        assert_relative_eq!(po.assembled_mesh().volume(), 1000.0 - 160.0, epsilon = 1e-3);
    }

    #[test]
    fn test_slice_grid_starts_below_elevated_model() {
        let mut config = SlaPrintObjectConfig::default();
        config.layer_height = 0.5;
        config.support_object_elevation = 5.0;
        config.pad_wall_thickness = 2.0;
        let material = SlaMaterialConfig {
            initial_layer_height: 0.5,
            ..Default::default()
        };
        let mut po = object(ModelObject::new("cube", cube(10.0, 10.0, 10.0)), config);
        run(
            &mut po,
            &[ObjectStep::Assembly, ObjectStep::Hollowing, ObjectStep::DrillHoles, ObjectStep::ObjectSlice],
            &material,
        )
        .unwrap();

        let idx = po.slice_index();
        assert_relative_eq!(idx.records[0].print_level, -6.5, epsilon = 1e-9);
        assert_relative_eq!(idx.records[0].slice_level, -6.75, epsilon = 1e-9);
        assert!(idx.records[idx.model_start].slice_level >= -EPSILON);
        assert!(idx.records[idx.model_start - 1].slice_level < 0.0);
        assert_eq!(po.model_slices().len(), idx.records.len() - idx.model_start);
        assert_relative_eq!(total_area(&po.model_slices()[0]), 100.0, epsilon = 1e-6);
    }

    #[test]
    fn test_user_points_are_transformed() {
        let mut mo = ModelObject::new("cube", cube(10.0, 10.0, 10.0));
        mo.points_status = PointsStatus::UserModified;
        mo.support_points = vec![resina_support::SupportPoint::new(Point3::new(5.0, 5.0, 0.0), 0.3)];
        let mut config = SlaPrintObjectConfig::default();
        config.layer_height = 1.0;
        let mut po = PrintObject::new(mo, config, Transform::translation(0.0, 0.0, 2.0), Vec::new());
        let material = SlaMaterialConfig {
            initial_layer_height: 1.0,
            ..Default::default()
        };
        run(
            &mut po,
            &[
                ObjectStep::Assembly,
                ObjectStep::Hollowing,
                ObjectStep::DrillHoles,
                ObjectStep::ObjectSlice,
                ObjectStep::SupportPoints,
            ],
            &material,
        )
        .unwrap();
        assert_eq!(po.support_points().len(), 1);
        assert_relative_eq!(po.support_points()[0].pos.z, 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_elephant_foot_fades_out() {
        let printer = SlaPrinterConfig {
            elefant_foot_compensation: 0.2,
            elefant_foot_min_width: 0.2,
            ..Default::default()
        };
        let mut slices = vec![vec![square(10.0)]; 4];
        apply_printer_corrections(&mut slices, 0, 4, 3, &printer);
        // Three faded layers compensate 0.2, 0.1, 0.0.
        assert_relative_eq!(total_area(&slices[0]), 9.6 * 9.6, epsilon = 1e-6);
        assert_relative_eq!(total_area(&slices[1]), 9.8 * 9.8, epsilon = 1e-6);
        assert_relative_eq!(total_area(&slices[2]), 100.0, epsilon = 1e-6);
        assert_relative_eq!(total_area(&slices[3]), 100.0, epsilon = 1e-6);
    }

    #[test]
    fn test_elephant_foot_keeps_thin_islands() {
        let thin = ExPolygon::new(Polygon::rectangle(&BoundingBox::new(
            Point2::new(0.0, 0.0),
            Point2::new(0.3, 5.0),
        )));
        let out = elephant_foot(&[thin.clone()], 0.1, 0.2);
        assert_eq!(out, vec![thin]);
    }

    #[test]
    fn test_absolute_correction_grows_layers() {
        let printer = SlaPrinterConfig {
            absolute_correction: 0.5,
            ..Default::default()
        };
        let mut slices = vec![vec![square(10.0)]];
        apply_printer_corrections(&mut slices, 0, 1, 0, &printer);
        let bb = resina_mesh::polygon::bounding_box_of(&slices[0]);
        assert_relative_eq!(bb.min.x, -0.5, epsilon = 1e-3);
        assert_relative_eq!(bb.max.y, 10.5, epsilon = 1e-3);
        assert!(total_area(&slices[0]) > 100.0);
    }

    #[test]
    fn test_drain_hole_cylinder_points_into_model() {
        let hole = DrainHole {
            pos: Point3::new(5.0, 5.0, 10.0),
            normal: Vec3::z(),
            radius: 1.0,
            height: 3.0,
        };
        let mesh = hole_mesh(&hole, &Transform::identity()).unwrap();
        let bb = mesh.bounding_box();
        assert_relative_eq!(bb.max.z, 11.0, epsilon = 1e-9);
        assert_relative_eq!(bb.min.z, 7.0, epsilon = 1e-9);
        assert_relative_eq!(bb.center().x, 5.0, epsilon = 1e-6);
    }
}
