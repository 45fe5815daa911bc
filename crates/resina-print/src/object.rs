//! Per-object pipeline state and caches.

use std::sync::{Mutex, MutexGuard, PoisonError};

use resina_math::{Transform, Vec2};
use resina_mesh::{ExPolygons, TriangleMesh};
use resina_support::{SupportPoint, SupportableMesh};
use resina_voxel::Interior;

use crate::config::{is_zero_elevation, make_pad_cfg, make_support_cfg, SlaPrintObjectConfig};
use crate::model::{ModelObject, ObjectId};
use crate::step::{ObjectStep, PrintState, StepState};

/// Placement of one printed copy on the bed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrintInstance {
    /// Instance this copy comes from.
    pub instance_id: ObjectId,
    /// Bed position of the object origin.
    pub shift: Vec2,
    /// Rotation about Z relative to the object's own orientation.
    pub rotation: f64,
}

/// One level of an object's slice grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SliceRecord {
    /// Top of the layer.
    pub print_level: f64,
    /// Height the geometry is cut at.
    pub slice_level: f64,
    /// Thickness of the layer.
    pub layer_height: f64,
}

/// The slice grid of an object and where its model layers start.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SliceIndex {
    /// Levels from the bottom of the pad or supports up.
    pub records: Vec<SliceRecord>,
    /// First record that cuts the model.
    pub model_start: usize,
}

impl SliceIndex {
    /// Slice levels of the records that cut the model.
    pub fn model_levels(&self) -> Vec<f64> {
        self.records
            .iter()
            .skip(self.model_start)
            .map(|r| r.slice_level)
            .collect()
    }

    /// Index into the model slices for record `i`.
    pub fn model_slice_idx(&self, i: usize) -> Option<usize> {
        i.checked_sub(self.model_start)
    }
}

/// A model object prepared for printing.
///
/// Each step owns its cache and writes it only when the step completes, so
/// an interrupted step leaves the outputs of the steps before it as they
/// were.
#[derive(Debug)]
pub struct PrintObject {
    pub(crate) model_object: ModelObject,
    pub(crate) config: SlaPrintObjectConfig,
    pub(crate) trafo: Transform,
    pub(crate) instances: Vec<PrintInstance>,
    pub(crate) state: Mutex<StepState<ObjectStep>>,

    // Assembly
    pub(crate) assembled_mesh: TriangleMesh,
    // Hollowing
    pub(crate) interior: Option<Interior>,
    // DrillHoles
    pub(crate) mesh_to_print: TriangleMesh,
    // ObjectSlice
    pub(crate) slice_index: SliceIndex,
    pub(crate) model_slices: Vec<ExPolygons>,
    // SupportPoints
    pub(crate) support_input: Option<SupportableMesh>,
    // SupportTree
    pub(crate) support_mesh: TriangleMesh,
    // Pad
    pub(crate) pad_mesh: TriangleMesh,
    // SliceSupports
    pub(crate) support_slices: Vec<ExPolygons>,
}

impl PrintObject {
    pub(crate) fn new(
        model_object: ModelObject,
        config: SlaPrintObjectConfig,
        trafo: Transform,
        instances: Vec<PrintInstance>,
    ) -> Self {
        Self {
            model_object,
            config,
            trafo,
            instances,
            state: Mutex::new(StepState::new()),
            assembled_mesh: TriangleMesh::new(),
            interior: None,
            mesh_to_print: TriangleMesh::new(),
            slice_index: SliceIndex::default(),
            model_slices: Vec::new(),
            support_input: None,
            support_mesh: TriangleMesh::new(),
            pad_mesh: TriangleMesh::new(),
            support_slices: Vec::new(),
        }
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, StepState<ObjectStep>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Identity shared with the model object.
    pub fn id(&self) -> ObjectId {
        self.model_object.id
    }

    /// Snapshot of the model object this was built from.
    pub fn model_object(&self) -> &ModelObject {
        &self.model_object
    }

    /// Effective object config: defaults with the object's overrides.
    pub fn config(&self) -> &SlaPrintObjectConfig {
        &self.config
    }

    /// Object to print space: corrections, first instance rotation and
    /// scale, Z lift.
    pub fn trafo(&self) -> &Transform {
        &self.trafo
    }

    /// Printed copies.
    pub fn instances(&self) -> &[PrintInstance] {
        &self.instances
    }

    /// State of `step`.
    pub fn step_state(&self, step: ObjectStep) -> PrintState {
        self.lock_state().state(step)
    }

    /// Whether `step` holds valid output.
    pub fn is_step_done(&self, step: ObjectStep) -> bool {
        self.lock_state().is_done(step)
    }

    /// Parts combined with negative volumes removed.
    pub fn assembled_mesh(&self) -> &TriangleMesh {
        &self.assembled_mesh
    }

    /// Cavity made by hollowing, if any.
    pub fn interior(&self) -> Option<&Interior> {
        self.interior.as_ref()
    }

    /// Hollowed and drilled mesh that gets sliced.
    pub fn mesh_to_print(&self) -> &TriangleMesh {
        &self.mesh_to_print
    }

    /// Slice grid.
    pub fn slice_index(&self) -> &SliceIndex {
        &self.slice_index
    }

    /// Model cross sections, one per model level.
    pub fn model_slices(&self) -> &[ExPolygons] {
        &self.model_slices
    }

    /// Support points in print space.
    pub fn support_points(&self) -> &[SupportPoint] {
        self.support_input.as_ref().map_or(&[], |sm| sm.pts.as_slice())
    }

    /// Merged support tree.
    pub fn support_mesh(&self) -> &TriangleMesh {
        &self.support_mesh
    }

    /// Pad under the tree.
    pub fn pad_mesh(&self) -> &TriangleMesh {
        &self.pad_mesh
    }

    /// Support and pad cross sections, one per record.
    pub fn support_slices(&self) -> &[ExPolygons] {
        &self.support_slices
    }

    /// Model bottom to printer ground distance this config asks for.
    pub fn get_elevation(&self) -> f64 {
        let c = &self.config;
        if is_zero_elevation(c) {
            return 0.0;
        }
        let mut elevation = if c.supports_enable {
            make_support_cfg(c).object_elevation_mm
        } else {
            0.0
        };
        if c.pad_enable {
            let pcfg = make_pad_cfg(c);
            if !pcfg.embed_object.enabled {
                elevation += pcfg.required_elevation();
            }
        }
        elevation
    }

    /// Elevation of what has been built so far.
    pub fn get_current_elevation(&self) -> f64 {
        if is_zero_elevation(&self.config) {
            return 0.0;
        }
        let has_supports = self.is_step_done(ObjectStep::SupportTree);
        let has_pad = self.is_step_done(ObjectStep::Pad);
        match (has_supports, has_pad) {
            (false, false) => 0.0,
            (true, false) => make_support_cfg(&self.config).object_elevation_mm,
            _ => self.get_elevation(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use resina_mesh::primitives::cube;

    fn object(config: SlaPrintObjectConfig) -> PrintObject {
        let mo = ModelObject::new("cube", cube(10.0, 10.0, 10.0));
        PrintObject::new(mo, config, Transform::identity(), Vec::new())
    }

    #[test]
    fn test_elevation_modes() {
        let mut c = SlaPrintObjectConfig::default();
        c.support_object_elevation = 5.0;
        c.pad_wall_thickness = 2.0;
        assert_relative_eq!(object(c.clone()).get_elevation(), 7.0);

        c.pad_enable = false;
        assert_relative_eq!(object(c.clone()).get_elevation(), 5.0);

        c.supports_enable = false;
        assert_relative_eq!(object(c.clone()).get_elevation(), 0.0);

        c.supports_enable = true;
        c.pad_enable = true;
        c.pad_around_object = true;
        assert_relative_eq!(object(c).get_elevation(), 0.0);
    }

    #[test]
    fn test_current_elevation_follows_steps() {
        let mut c = SlaPrintObjectConfig::default();
        c.support_object_elevation = 5.0;
        c.pad_wall_thickness = 2.0;
        let po = object(c);
        assert_relative_eq!(po.get_current_elevation(), 0.0);
        {
            let mut st = po.lock_state();
            assert!(st.set_started(ObjectStep::SupportTree));
            assert!(st.set_done(ObjectStep::SupportTree));
        }
        assert_relative_eq!(po.get_current_elevation(), 5.0);
        {
            let mut st = po.lock_state();
            assert!(st.set_started(ObjectStep::Pad));
            assert!(st.set_done(ObjectStep::Pad));
        }
        assert_relative_eq!(po.get_current_elevation(), 7.0);
    }

    #[test]
    fn test_slice_index_model_levels() {
        let idx = SliceIndex {
            records: (0..5)
                .map(|i| SliceRecord {
                    print_level: i as f64 + 1.0,
                    slice_level: i as f64 + 0.5,
                    layer_height: 1.0,
                })
                .collect(),
            model_start: 2,
        };
        assert_eq!(idx.model_levels(), vec![2.5, 3.5, 4.5]);
        assert_eq!(idx.model_slice_idx(1), None);
        assert_eq!(idx.model_slice_idx(3), Some(1));
    }
}
