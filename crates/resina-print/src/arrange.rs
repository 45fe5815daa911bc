//! Bed arrangement of model instances.

use resina_arrange::{arrange, ArrangeBed, ArrangeParams, ArrangePolygon, ProgressSink};
use resina_math::{Point2, Transform, Vec2};
use resina_mesh::polygon::convex_hull;
use resina_mesh::ExPolygon;
use tracing::info;

use crate::error::Result;
use crate::model::{Model, ModelInstance, ModelObject, VolumeType};

/// Outline of one instance in its own frame: scaled, not rotated.
fn footprint(mo: &ModelObject, inst: &ModelInstance) -> ExPolygon {
    let scale = Transform::scale(inst.scaling.x, inst.scaling.y, inst.scaling.z);
    let mesh = mo.volumes_mesh(VolumeType::ModelPart);
    let pts: Vec<Point2> = mesh
        .vertices
        .iter()
        .map(|v| {
            let p = scale.apply_point(v);
            Point2::new(p.x, p.y)
        })
        .collect();
    ExPolygon::new(convex_hull(&pts))
}

/// Place every printable instance of `model` onto `bed` and its virtual
/// copies. Instances that fit get new offsets and rotations; the others
/// keep theirs. Returns how many instances stayed unarranged.
pub fn arrange_objects(
    model: &mut Model,
    bed: &ArrangeBed,
    params: &ArrangeParams,
    sink: &mut dyn ProgressSink,
) -> Result<usize> {
    let mut slots = Vec::new();
    let mut items = Vec::new();
    for (oi, mo) in model.objects.iter().enumerate() {
        for (ii, inst) in mo.instances.iter().enumerate().filter(|(_, i)| i.printable) {
            let mut item = ArrangePolygon::new(footprint(mo, inst))
                .with_translation(Vec2::new(inst.offset.x, inst.offset.y));
            item.rotation = inst.rotation_z;
            items.push(item);
            slots.push((oi, ii));
        }
    }

    arrange(&mut items, &[], bed, params, sink)?;

    let mut unarranged = 0;
    for (item, (oi, ii)) in items.iter().zip(slots) {
        if !item.is_arranged() {
            unarranged += 1;
            continue;
        }
        let inst = &mut model.objects[oi].instances[ii];
        let pos = item.translation + bed.logical_bed_offset(item.bed_idx);
        inst.offset.x = pos.x;
        inst.offset.y = pos.y;
        inst.rotation_z = item.rotation;
    }
    info!(instances = items.len(), unarranged, "model arranged");
    Ok(unarranged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use resina_arrange::{to_arrange_bed, NoProgress};
    use resina_mesh::primitives::cube;

    fn bed(side: f64) -> ArrangeBed {
        to_arrange_bed(&[
            Point2::new(0.0, 0.0),
            Point2::new(side, 0.0),
            Point2::new(side, side),
            Point2::new(0.0, side),
        ])
    }

    fn placed_box(mo: &ModelObject) -> resina_math::BoundingBox {
        let inst = &mo.instances[0];
        let mut p = footprint(mo, inst);
        p.rotate(inst.rotation_z);
        p.translate(&Vec2::new(inst.offset.x, inst.offset.y));
        p.bounding_box()
    }

    #[test]
    fn test_two_cubes_share_the_bed() {
        let mut model = Model::new();
        model.add_object(ModelObject::new("a", cube(20.0, 20.0, 5.0)));
        model.add_object(ModelObject::new("b", cube(20.0, 20.0, 5.0)));
        let params = ArrangeParams::default().with_min_obj_distance(2.0);
        let left = arrange_objects(&mut model, &bed(100.0), &params, &mut NoProgress).unwrap();
        assert_eq!(left, 0);

        let a = placed_box(&model.objects[0]);
        let b = placed_box(&model.objects[1]);
        for bb in [&a, &b] {
            assert!(bb.min.x >= -1e-6 && bb.max.x <= 100.0 + 1e-6);
            assert!(bb.min.y >= -1e-6 && bb.max.y <= 100.0 + 1e-6);
        }
        let apart = a.max.x <= b.min.x + 1e-6
            || b.max.x <= a.min.x + 1e-6
            || a.max.y <= b.min.y + 1e-6
            || b.max.y <= a.min.y + 1e-6;
        assert!(apart, "{a:?} overlaps {b:?}");
    }

    #[test]
    fn test_overflow_goes_to_a_virtual_bed() {
        let mut model = Model::new();
        model.add_object(ModelObject::new("a", cube(40.0, 40.0, 5.0)));
        model.add_object(ModelObject::new("b", cube(40.0, 40.0, 5.0)));
        let params = ArrangeParams::default().with_min_obj_distance(2.0);
        let left = arrange_objects(&mut model, &bed(50.0), &params, &mut NoProgress).unwrap();
        assert_eq!(left, 0);
        let xs: Vec<f64> = model
            .objects
            .iter()
            .map(|mo| placed_box(mo).min.x)
            .collect();
        assert!(xs.iter().any(|x| *x > 50.0), "{xs:?}");
    }

    #[test]
    fn test_non_printable_instances_are_left_alone() {
        let mut model = Model::new();
        let mo = model.add_object(ModelObject::new("a", cube(10.0, 10.0, 5.0)));
        mo.instances[0].printable = false;
        mo.instances[0].offset.x = 500.0;
        let left = arrange_objects(
            &mut model,
            &bed(100.0),
            &ArrangeParams::default(),
            &mut NoProgress,
        )
        .unwrap();
        assert_eq!(left, 0);
        assert_relative_eq!(model.objects[0].instances[0].offset.x, 500.0);
    }
}
