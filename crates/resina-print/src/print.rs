//! The print aggregate: owns the print objects, reconciles them with the
//! model, drives the steps and merges the result into printable layers.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rayon::prelude::*;
use resina_math::{Transform, Vec2, Vec3, EPSILON};
use resina_mesh::clipper::{difference, union_ex};
use resina_mesh::polygon::total_area;
use resina_mesh::ExPolygons;
use serde::Serialize;
use tracing::{debug, info};

use crate::archive::{Archiver, RawArchiver, Sl1Archiver};
use crate::config::{
    diff_keys, make_pad_cfg, make_support_cfg, object_option_step, print_option_bucket,
    unbucketed, FullPrintConfig, MaterialPrintSpeed, PrintBucket, SlaMaterialConfig,
    SlaPrintConfig, SlaPrintObjectConfig, SlaPrinterConfig,
};
use crate::error::{PrintError, Result};
use crate::job::JobControl;
use crate::model::{Model, ModelObject, ObjectId, PointsStatus};
use crate::object::{PrintInstance, PrintObject};
use crate::raster::{rasterize, Raster, RasterSettings};
use crate::step::{
    invalidate_all_object_steps, invalidate_object_step, invalidate_print_step, ObjectStep,
    PrintStep, Step, StepState,
};
use crate::steps::{self, StepContext};

/// Progress at which object processing starts.
pub const MIN_OBJSTATUS: f64 = 0.0;
/// Progress at which object processing ends and print steps begin.
pub const MAX_OBJSTATUS: f64 = 70.0;

/// Layer levels closer than this fall into the same print layer (mm).
const LEVEL_GRID: f64 = EPSILON;

/// How much an [`Print::apply`] call changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum ApplyStatus {
    /// Nothing changed.
    #[default]
    Unchanged,
    /// Inputs changed without touching any computed output.
    Changed,
    /// Some computed output was invalidated.
    Invalidated,
}

impl ApplyStatus {
    fn update(&mut self, invalidated: bool) {
        let next = if invalidated {
            ApplyStatus::Invalidated
        } else {
            ApplyStatus::Changed
        };
        *self = (*self).max(next);
    }
}

/// One merged print layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrintLayer {
    level: f64,
    slices: ExPolygons,
}

impl PrintLayer {
    /// Top of the layer above the ground (mm).
    pub fn level(&self) -> f64 {
        self.level
    }

    /// Model and support outlines of every object and instance, in bed
    /// coordinates.
    pub fn transformed_slices(&self) -> &[resina_mesh::ExPolygon] {
        &self.slices
    }
}

/// Material use and time estimates of a merged print.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PrintStatistics {
    /// Model volume (mm³).
    pub objects_used_material: f64,
    /// Support and pad volume (mm³).
    pub support_used_material: f64,
    /// Sum of layer times (s); NaN without layers.
    pub estimated_print_time: f64,
    /// Layers tilting fast.
    pub fast_layers_count: usize,
    /// Layers tilting slow.
    pub slow_layers_count: usize,
    /// Exposed area per layer (mm²).
    pub layers_areas: Vec<f64>,
    /// Elapsed time at the end of each layer (s).
    pub layers_times_running_total: Vec<f64>,
}

impl PrintStatistics {
    /// Total resin use in ml.
    pub fn used_material_ml(&self) -> f64 {
        (self.objects_used_material + self.support_used_material) / 1000.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ModelObjectStatus {
    Old,
    New,
    Moved,
}

/// An SLA print of a model.
pub struct Print {
    model: Model,
    print_config: SlaPrintConfig,
    printer_config: SlaPrinterConfig,
    material_config: SlaMaterialConfig,
    default_object_config: SlaPrintObjectConfig,
    objects: Vec<PrintObject>,
    state: Mutex<StepState<PrintStep>>,
    layers: Vec<PrintLayer>,
    statistics: PrintStatistics,
    rasters: Vec<Raster>,
    archivers: BTreeMap<String, Box<dyn Archiver>>,
}

impl fmt::Debug for Print {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Print")
            .field("objects", &self.objects.len())
            .field("layers", &self.layers.len())
            .field("statistics", &self.statistics)
            .field("archivers", &self.archivers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for Print {
    fn default() -> Self {
        Self::new()
    }
}

fn state_mut<T>(m: &mut Mutex<T>) -> &mut T {
    m.get_mut().unwrap_or_else(PoisonError::into_inner)
}

fn check(job: &Arc<dyn JobControl>) -> Result<()> {
    if job.was_canceled() {
        Err(PrintError::Canceled)
    } else {
        Ok(())
    }
}

/// Same objects in the same order.
fn object_list_equal(a: &Model, b: &Model) -> bool {
    a.objects.len() == b.objects.len()
        && a.objects.iter().zip(&b.objects).all(|(x, y)| x.id == y.id)
}

/// `b` is `a` with objects appended.
fn object_list_extended(a: &Model, b: &Model) -> bool {
    a.objects.len() < b.objects.len()
        && a.objects.iter().zip(&b.objects).all(|(x, y)| x.id == y.id)
}

/// Object to print space: Z lift, scale corrections and the first
/// instance's rotation and scale.
fn sla_trafo(mo: &ModelObject, corr: &Vec3) -> Option<Transform> {
    let inst = mo.instances.first()?;
    Some(
        Transform::translation(0.0, 0.0, inst.offset.z * corr.z)
            .then(&Transform::scale(corr.x, corr.y, corr.z))
            .then(&inst.linear_transform()),
    )
}

fn trafo_approx_eq(a: &Transform, b: &Transform) -> bool {
    (a.matrix - b.matrix).amax() <= 1e-9
}

/// Printable instances placed relative to the first one.
fn sla_instances(mo: &ModelObject) -> Vec<PrintInstance> {
    let Some(first) = mo.instances.first() else {
        return Vec::new();
    };
    mo.instances
        .iter()
        .filter(|i| i.printable)
        .map(|i| PrintInstance {
            instance_id: i.id,
            shift: Vec2::new(i.offset.x, i.offset.y),
            rotation: i.rotation_z - first.rotation_z,
        })
        .collect()
}

/// Invalidate the steps of `po` that `keys` feed.
fn invalidate_object_by_options(
    po: &mut PrintObject,
    print: &mut StepState<PrintStep>,
    keys: &[String],
) -> Result<bool> {
    let mut steps = Vec::new();
    for key in keys {
        steps.push(object_option_step(key).ok_or_else(|| unbucketed(key))?);
    }
    steps.sort();
    steps.dedup();
    let state = state_mut(&mut po.state);
    Ok(steps
        .into_iter()
        .fold(false, |acc, s| invalidate_object_step(state, print, s) | acc))
}

struct LayerInfo {
    slices: ExPolygons,
    time: f64,
    area: f64,
    is_fast: bool,
    models_volume: f64,
    supports_volume: f64,
}

impl Print {
    /// An empty print with the default configs and the built-in archivers.
    pub fn new() -> Self {
        let mut print = Self {
            model: Model::new(),
            print_config: SlaPrintConfig::default(),
            printer_config: SlaPrinterConfig::default(),
            material_config: SlaMaterialConfig::default(),
            default_object_config: SlaPrintObjectConfig::default(),
            objects: Vec::new(),
            state: Mutex::new(StepState::new()),
            layers: Vec::new(),
            statistics: PrintStatistics::default(),
            rasters: Vec::new(),
            archivers: BTreeMap::new(),
        };
        print.register_archiver("raw", Box::new(RawArchiver));
        print.register_archiver("SL1", Box::new(Sl1Archiver));
        print
    }

    /// Make `archiver` available as the `sla_archive_format` value `name`.
    pub fn register_archiver(&mut self, name: impl Into<String>, archiver: Box<dyn Archiver>) {
        self.archivers.insert(name.into(), archiver);
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, StepState<PrintStep>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Print objects in model order.
    pub fn objects(&self) -> &[PrintObject] {
        &self.objects
    }

    /// The print object of model object `id`.
    pub fn object(&self, id: ObjectId) -> Option<&PrintObject> {
        self.objects.iter().find(|po| po.id() == id)
    }

    /// The model as last applied.
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Print options.
    pub fn print_config(&self) -> &SlaPrintConfig {
        &self.print_config
    }

    /// Printer options.
    pub fn printer_config(&self) -> &SlaPrinterConfig {
        &self.printer_config
    }

    /// Material options.
    pub fn material_config(&self) -> &SlaMaterialConfig {
        &self.material_config
    }

    /// Object options before per-object overrides.
    pub fn default_object_config(&self) -> &SlaPrintObjectConfig {
        &self.default_object_config
    }

    /// Merged layers, bottom up.
    pub fn layers(&self) -> &[PrintLayer] {
        &self.layers
    }

    /// Statistics of the merged layers.
    pub fn statistics(&self) -> &PrintStatistics {
        &self.statistics
    }

    /// One image per merged layer.
    pub fn rasters(&self) -> &[Raster] {
        &self.rasters
    }

    /// Display geometry used by the rasterizer.
    pub fn raster_settings(&self) -> RasterSettings {
        RasterSettings::from_printer(&self.printer_config)
    }

    /// Printer scale correction times material shrinkage correction.
    pub fn relative_correction(&self) -> Vec3 {
        let p = &self.printer_config;
        let m = &self.material_config;
        Vec3::new(
            p.relative_correction_x * m.material_correction_x,
            p.relative_correction_y * m.material_correction_y,
            p.relative_correction_z * m.material_correction_z,
        )
    }

    /// Whether `step` holds valid output on every object. False without
    /// objects.
    pub fn is_step_done(&self, step: ObjectStep) -> bool {
        !self.objects.is_empty() && self.objects.iter().all(|po| po.is_step_done(step))
    }

    /// Whether the print step `step` holds valid output.
    pub fn is_print_step_done(&self, step: PrintStep) -> bool {
        self.lock_state().is_done(step)
    }

    /// Every step of the print is done.
    pub fn finished(&self) -> bool {
        self.lock_state().all_done()
    }

    /// Output file name for an input named `base`.
    pub fn output_filename(&self, base: &str) -> String {
        self.print_config
            .output_filename_format
            .replace("{input_filename_base}", base)
    }

    /// Bring the print in line with `model` and `config`, invalidating the
    /// steps whose inputs changed. Calling it again with the same
    /// arguments changes nothing.
    pub fn apply(&mut self, model: &Model, config: &FullPrintConfig) -> Result<ApplyStatus> {
        let print_diff = diff_keys(&self.print_config, &config.print)?;
        let printer_diff = diff_keys(&self.printer_config, &config.printer)?;
        let material_diff = diff_keys(&self.material_config, &config.material)?;
        let object_diff = diff_keys(&self.default_object_config, &config.object)?;

        let mut status = ApplyStatus::Unchanged;
        if !(print_diff.is_empty()
            && printer_diff.is_empty()
            && material_diff.is_empty()
            && object_diff.is_empty())
        {
            status.update(false);
        }

        let mut invalidate_all_model_objects = false;
        for diff in [&print_diff, &printer_diff, &material_diff] {
            if !diff.is_empty() {
                let invalidated =
                    self.invalidate_by_print_options(diff, &mut invalidate_all_model_objects)?;
                status.update(invalidated);
            }
        }
        self.print_config = config.print.clone();
        self.printer_config = config.printer.clone();
        self.material_config = config.material.clone();
        self.default_object_config = config.object.clone();
        let corr = self.relative_correction();

        let mut mo_status: HashMap<ObjectId, ModelObjectStatus> = HashMap::new();
        let pstate = state_mut(&mut self.state);

        // Model objects
        if model.id != self.model.id || invalidate_all_model_objects {
            status.update(pstate.invalidate_all());
            for po in &mut self.objects {
                status.update(state_mut(&mut po.state).invalidate_all());
            }
            self.objects.clear();
            self.model = model.clone();
            for mo in &self.model.objects {
                mo_status.insert(mo.id, ModelObjectStatus::New);
            }
        } else if object_list_equal(&self.model, model) {
            for mo in &self.model.objects {
                mo_status.insert(mo.id, ModelObjectStatus::Old);
            }
        } else if object_list_extended(&self.model, model) {
            status.update(invalidate_print_step(pstate, PrintStep::MergeSlicesAndEval));
            for mo in &self.model.objects {
                mo_status.insert(mo.id, ModelObjectStatus::Old);
            }
            for mo in &model.objects[self.model.objects.len()..] {
                mo_status.insert(mo.id, ModelObjectStatus::New);
                self.model.objects.push(mo.clone());
            }
        } else {
            status.update(invalidate_print_step(pstate, PrintStep::MergeSlicesAndEval));
            let mut old: HashMap<ObjectId, ModelObject> = self
                .model
                .objects
                .drain(..)
                .map(|mo| (mo.id, mo))
                .collect();
            for mo in &model.objects {
                match old.remove(&mo.id) {
                    Some(existing) => {
                        mo_status.insert(mo.id, ModelObjectStatus::Moved);
                        self.model.objects.push(existing);
                    }
                    None => {
                        mo_status.insert(mo.id, ModelObjectStatus::New);
                        self.model.objects.push(mo.clone());
                    }
                }
            }
            if !old.is_empty() {
                self.objects.retain_mut(|po| {
                    if old.contains_key(&po.id()) {
                        status.update(state_mut(&mut po.state).invalidate_all());
                        false
                    } else {
                        true
                    }
                });
            }
        }

        // Print objects
        let old_ids: Vec<ObjectId> = self.objects.iter().map(PrintObject::id).collect();
        let mut old_objects: HashMap<ObjectId, PrintObject> =
            self.objects.drain(..).map(|po| (po.id(), po)).collect();
        let mut print_objects = Vec::with_capacity(model.objects.len());
        let mut new_objects = false;

        for (idx, mo_new) in model.objects.iter().enumerate() {
            let mo = &mut self.model.objects[idx];
            let mut existing = None;
            if mo_status.get(&mo.id) != Some(&ModelObjectStatus::New) {
                existing = old_objects.remove(&mo.id);
                let parts_differ = mo.volume_signature() != mo_new.volume_signature();
                let trafo_differs = match (sla_trafo(mo, &corr), sla_trafo(mo_new, &corr)) {
                    (Some(a), Some(b)) => {
                        !trafo_approx_eq(&a, &b)
                            || mo.instances[0].is_left_handed() != mo_new.instances[0].is_left_handed()
                    }
                    (None, None) => false,
                    _ => true,
                };
                if parts_differ || trafo_differs {
                    if let Some(mut po) = existing.take() {
                        status.update(invalidate_all_object_steps(state_mut(&mut po.state), pstate));
                    }
                    *mo = mo_new.clone();
                } else {
                    let config_changed = mo.config != mo_new.config;
                    if config_changed {
                        mo.config = mo_new.config.clone();
                    }
                    if !object_diff.is_empty() || config_changed {
                        let new_config = self.default_object_config.with_overrides(&mo.config)?;
                        if let Some(po) = existing.as_mut() {
                            let diff = diff_keys(&po.config, &new_config)?;
                            if !diff.is_empty() {
                                status.update(invalidate_object_by_options(po, pstate, &diff)?);
                                po.config = new_config;
                            }
                        }
                    }

                    let old_user = mo.points_status == PointsStatus::UserModified;
                    let new_user = mo_new.points_status == PointsStatus::UserModified;
                    if old_user != new_user || (new_user && mo.support_points != mo_new.support_points) {
                        if let Some(po) = existing.as_mut() {
                            status.update(invalidate_object_step(
                                state_mut(&mut po.state),
                                pstate,
                                ObjectStep::SupportPoints,
                            ));
                        }
                        mo.support_points = mo_new.support_points.clone();
                    }
                    mo.points_status = mo_new.points_status;

                    if mo.drain_holes != mo_new.drain_holes {
                        mo.drain_holes = mo_new.drain_holes.clone();
                        if let Some(po) = existing.as_mut() {
                            status.update(invalidate_object_step(
                                state_mut(&mut po.state),
                                pstate,
                                ObjectStep::DrillHoles,
                            ));
                        }
                    }

                    mo.name = mo_new.name.clone();
                    mo.input_file = mo_new.input_file.clone();
                    mo.instances = mo_new.instances.clone();
                }
            }

            let instances = sla_instances(mo);
            match existing {
                Some(mut po) if !instances.is_empty() => {
                    if instances != po.instances {
                        po.instances = instances;
                        status.update(invalidate_print_step(pstate, PrintStep::MergeSlicesAndEval));
                    }
                    let snapshot = &mut po.model_object;
                    snapshot.name = mo.name.clone();
                    snapshot.input_file = mo.input_file.clone();
                    snapshot.instances = mo.instances.clone();
                    snapshot.config = mo.config.clone();
                    snapshot.support_points = mo.support_points.clone();
                    snapshot.points_status = mo.points_status;
                    snapshot.drain_holes = mo.drain_holes.clone();
                    print_objects.push(po);
                }
                Some(mut po) => {
                    status.update(state_mut(&mut po.state).invalidate_all());
                }
                None => {
                    let trafo = sla_trafo(mo, &corr).filter(|_| !instances.is_empty());
                    if let Some(trafo) = trafo {
                        let config = self.default_object_config.with_overrides(&mo.config)?;
                        print_objects.push(PrintObject::new(mo.clone(), config, trafo, instances));
                        new_objects = true;
                    }
                }
            }
        }

        for (_, mut po) in old_objects {
            status.update(state_mut(&mut po.state).invalidate_all());
        }

        let new_ids: Vec<ObjectId> = print_objects.iter().map(PrintObject::id).collect();
        if new_objects || new_ids != old_ids {
            status.update(pstate.invalidate_all());
            if new_objects {
                status.update(false);
            }
        }
        self.objects = print_objects;

        if self.objects.is_empty() {
            self.layers.clear();
            self.rasters.clear();
            self.statistics = PrintStatistics::default();
        }

        debug!(status = ?status, objects = self.objects.len(), "print applied");
        Ok(status)
    }

    fn invalidate_by_print_options(
        &mut self,
        keys: &[String],
        invalidate_all_model_objects: &mut bool,
    ) -> Result<bool> {
        let mut merge = false;
        let mut slice = false;
        for key in keys {
            match print_option_bucket(key) {
                Some(PrintBucket::Rasterize) => merge = true,
                Some(PrintBucket::Full) => {
                    merge = true;
                    slice = true;
                    *invalidate_all_model_objects = true;
                }
                Some(PrintBucket::Ignore) => {}
                None => return Err(unbucketed(key)),
            }
        }
        let pstate = state_mut(&mut self.state);
        let mut invalidated = false;
        if merge {
            invalidated |= invalidate_print_step(pstate, PrintStep::MergeSlicesAndEval);
        }
        if slice {
            for po in &mut self.objects {
                invalidated |=
                    invalidate_object_step(state_mut(&mut po.state), pstate, ObjectStep::ObjectSlice);
            }
        }
        debug!(keys = keys.len(), invalidated, "print options changed");
        Ok(invalidated)
    }

    /// Check the configuration before processing. The error message is
    /// user facing.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(PrintError::Validation(msg.to_string()));
        for po in &self.objects {
            let mo = &po.model_object;
            let supports_en = po.config.supports_enable;
            if supports_en
                && mo.points_status == PointsStatus::UserModified
                && mo.support_points.is_empty()
            {
                return fail(
                    "Cannot proceed without support points! Add support points or disable support generation.",
                );
            }

            let cfg = make_support_cfg(&po.config);
            let padcfg = make_pad_cfg(&po.config);
            let builtin = &padcfg.embed_object;
            if supports_en && !builtin.enabled && cfg.object_elevation_mm < cfg.head_fullwidth() {
                return fail(
                    "Elevation is too low for object. Use the \"Pad around object\" feature to print the object without elevation.",
                );
            }
            if supports_en
                && builtin.enabled
                && cfg.pillar_base_safety_distance_mm < builtin.object_gap_mm
            {
                return fail(
                    "The endings of the support pillars will be deployed on the gap between the object and the pad. 'Support base safety distance' has to be greater than the 'Pad object gap' parameter to avoid this.",
                );
            }
            if let Err(e) = padcfg.validate() {
                return Err(PrintError::Validation(e.to_string()));
            }
        }

        let p = &self.printer_config;
        let m = &self.material_config;
        if m.exposure_time < p.min_exposure_time || m.exposure_time > p.max_exposure_time {
            return fail("Exposition time is out of printer profile bounds.");
        }
        if m.initial_exposure_time < p.min_initial_exposure_time
            || m.initial_exposure_time > p.max_initial_exposure_time
        {
            return fail("Initial exposition time is out of printer profile bounds.");
        }
        Ok(())
    }

    /// Run every step that is not done. On cancellation the running step
    /// is marked canceled and every completed step keeps its output.
    pub fn process(&mut self, job: &Arc<dyn JobControl>) -> Result<()> {
        if self.objects.is_empty() {
            return Ok(());
        }
        info!(objects = self.objects.len(), "slicing started");
        let scale = (MAX_OBJSTATUS - MIN_OBJSTATUS) / (self.objects.len() as f64 * 100.0);
        let layer_height = self.objects[0].config.layer_height;

        let mut st = MIN_OBJSTATUS;
        for level in [ObjectStep::LEVEL_1, ObjectStep::LEVEL_2] {
            let mut incr = 0.0;
            for idx in 0..self.objects.len() {
                for &step in level {
                    check(job)?;
                    st += incr;
                    let span = f64::from(step.progress_level()) * scale;
                    self.run_object_step(idx, step, layer_height, st, span, job)?;
                    incr = span;
                }
            }
        }

        st = MAX_OBJSTATUS;
        for &step in PrintStep::ALL {
            check(job)?;
            if self.lock_state().set_started(step) {
                job.update_status(st.round() as u32, step.label());
                info!(step = ?step, "print step started");
                let result = match step {
                    PrintStep::MergeSlicesAndEval => self.merge_slices_and_eval(job),
                    PrintStep::Rasterize => self.rasterize(job, st),
                };
                let result = result.and_then(|()| check(job));
                let mut state = self.lock_state();
                match result {
                    Ok(()) => {
                        state.set_done(step);
                    }
                    Err(e) => {
                        state.set_canceled(step);
                        return Err(e);
                    }
                }
            }
            st += f64::from(step.progress_level()) * (100.0 - MAX_OBJSTATUS) / 100.0;
        }

        job.update_status(100, "Slicing done");
        info!(layers = self.layers.len(), "slicing done");
        Ok(())
    }

    fn run_object_step(
        &mut self,
        idx: usize,
        step: ObjectStep,
        layer_height: f64,
        status: f64,
        status_span: f64,
        job: &Arc<dyn JobControl>,
    ) -> Result<()> {
        let Print {
            objects,
            printer_config,
            material_config,
            ..
        } = self;
        let po = &mut objects[idx];
        if !po.lock_state().set_started(step) {
            return Ok(());
        }
        job.update_status(status.round() as u32, step.label());
        info!(object = %po.model_object.name, step = ?step, "step started");

        let ctx = StepContext {
            printer: printer_config,
            material: material_config,
            layer_height,
            job,
            status,
            status_span,
        };
        let result = steps::execute(po, step, &ctx).and_then(|()| check(job));
        let mut state = po.lock_state();
        match result {
            Ok(()) => {
                state.set_done(step);
                debug!(object = %po.model_object.name, step = ?step, "step done");
                Ok(())
            }
            Err(e) => {
                state.set_canceled(step);
                Err(e)
            }
        }
    }

    /// Group object records into print layers by their height above each
    /// object's ground.
    fn layer_grid(&self) -> Result<BTreeMap<i64, Vec<(usize, usize)>>> {
        let ilh = self.material_config.initial_layer_height;
        let mut grid: BTreeMap<i64, Vec<(usize, usize)>> = BTreeMap::new();
        for (oi, po) in self.objects.iter().enumerate() {
            let records = &po.slice_index.records;
            let Some(first) = records.first() else {
                continue;
            };
            let gnd = first.print_level - ilh;
            for (ri, record) in records.iter().enumerate() {
                let has_model = po
                    .slice_index
                    .model_slice_idx(ri)
                    .is_some_and(|i| i < po.model_slices.len());
                if !has_model && ri >= po.support_slices.len() {
                    return Err(PrintError::Slicing(
                        "There are unprintable objects. Try to adjust support settings to make the objects printable."
                            .into(),
                    ));
                }
                let key = ((record.print_level - gnd) / LEVEL_GRID).round() as i64;
                grid.entry(key).or_default().push((oi, ri));
            }
        }
        Ok(grid)
    }

    fn placed(po: &PrintObject, polys: &[resina_mesh::ExPolygon], out: &mut ExPolygons) {
        for poly in polys.iter().filter(|p| !p.contour.points.is_empty()) {
            for inst in &po.instances {
                let mut p = poly.clone();
                p.rotate(inst.rotation);
                p.translate(&inst.shift);
                out.push(p);
            }
        }
    }

    fn eval_layer(&self, idx: usize, records: &[(usize, usize)]) -> LayerInfo {
        let printer = &self.printer_config;
        let material = &self.material_config;
        let l_height = records
            .first()
            .map_or(0.0, |&(oi, ri)| self.objects[oi].slice_index.records[ri].layer_height);

        let mut model = ExPolygons::new();
        let mut supports = ExPolygons::new();
        for &(oi, ri) in records {
            let po = &self.objects[oi];
            if let Some(s) = po
                .slice_index
                .model_slice_idx(ri)
                .and_then(|i| po.model_slices.get(i))
            {
                Self::placed(po, s, &mut model);
            }
            if let Some(s) = po.support_slices.get(ri) {
                Self::placed(po, s, &mut supports);
            }
        }

        let model = union_ex(&model);
        let model_area = total_area(&model);
        if !supports.is_empty() {
            supports = if model.is_empty() {
                union_ex(&supports)
            } else {
                difference(&supports, &model)
            };
        }
        let support_area = total_area(&supports);
        let area = model_area + support_area;

        let mut all = model;
        all.extend(supports);
        let slices = union_ex(&all);

        let display_area = printer.display_width * printer.display_height;
        let is_fast = area <= display_area * material.area_fill * 0.01;
        let mut time = match material.material_print_speed {
            MaterialPrintSpeed::Slow => printer.slow_tilt_time + 3.0,
            MaterialPrintSpeed::HighViscosity => printer.high_viscosity_tilt_time + 3.5,
            MaterialPrintSpeed::Fast if is_fast => printer.fast_tilt_time,
            MaterialPrintSpeed::Fast => printer.slow_tilt_time + 1.0,
        };
        time += l_height * 5.0;

        let fade = f64::from(self.default_object_config.faded_layers);
        let exp = material.exposure_time;
        let init = material.initial_exposure_time;
        let delta_fade = (init - exp) / (fade + 1.0);
        time += exp.max(init - idx as f64 * delta_fade);

        LayerInfo {
            slices,
            time,
            area,
            is_fast,
            models_volume: model_area * l_height,
            supports_volume: support_area * l_height,
        }
    }

    fn merge_slices_and_eval(&mut self, job: &Arc<dyn JobControl>) -> Result<()> {
        let grid = self.layer_grid()?;
        let entries: Vec<(i64, Vec<(usize, usize)>)> = grid.into_iter().collect();
        let infos: Vec<LayerInfo> = entries
            .par_iter()
            .enumerate()
            .map(|(i, (_, records))| self.eval_layer(i, records))
            .collect();
        check(job)?;

        let mut stats = PrintStatistics::default();
        if infos.is_empty() {
            stats.estimated_print_time = f64::NAN;
        }
        let mut layers = Vec::with_capacity(infos.len());
        for ((key, _), info) in entries.into_iter().zip(infos) {
            if info.is_fast {
                stats.fast_layers_count += 1;
            } else {
                stats.slow_layers_count += 1;
            }
            stats.layers_areas.push(info.area);
            stats.estimated_print_time += info.time;
            let total = stats.layers_times_running_total.last().copied().unwrap_or(0.0) + info.time;
            stats.layers_times_running_total.push(total);
            stats.objects_used_material += info.models_volume;
            stats.support_used_material += info.supports_volume;
            layers.push(PrintLayer {
                level: key as f64 * LEVEL_GRID,
                slices: info.slices,
            });
        }

        info!(
            layers = layers.len(),
            fast = stats.fast_layers_count,
            slow = stats.slow_layers_count,
            print_time_s = stats.estimated_print_time,
            "layers merged"
        );
        self.layers = layers;
        self.statistics = stats;
        Ok(())
    }

    fn rasterize(&mut self, job: &Arc<dyn JobControl>, status: f64) -> Result<()> {
        let settings = self.raster_settings();
        let n = self.layers.len().max(1) as f64;
        let slot = f64::from(PrintStep::Rasterize.progress_level());
        let increment = slot * (100.0 - MAX_OBJSTATUS) / 100.0 / n;
        let progress = Mutex::new((status, status));
        let label = PrintStep::Rasterize.label();

        let rasters: Option<Vec<Raster>> = self
            .layers
            .par_iter()
            .map(|layer| {
                if job.was_canceled() {
                    return None;
                }
                let raster = rasterize(&layer.slices, &settings);
                let mut guard = progress.lock().unwrap_or_else(PoisonError::into_inner);
                let (current, reported) = &mut *guard;
                *current += increment;
                let st = current.round();
                if st > *reported {
                    job.update_status(st as u32, label);
                    *reported = st;
                }
                Some(raster)
            })
            .collect();
        let rasters = rasters.ok_or(PrintError::Canceled)?;
        check(job)?;
        debug!(layers = rasters.len(), width = settings.width, height = settings.height, "rasterized");
        self.rasters = rasters;
        Ok(())
    }

    /// Write the rasterized print to `path` with the archiver named by
    /// `sla_archive_format`.
    pub fn export(&self, path: &Path) -> Result<()> {
        let fmt = &self.printer_config.sla_archive_format;
        let archiver = self
            .archivers
            .get(fmt)
            .ok_or_else(|| PrintError::Export(format!("Unknown archive format: {fmt}")))?;
        if !self.is_print_step_done(PrintStep::Rasterize) {
            return Err(PrintError::Export("The print has not been sliced yet".into()));
        }
        archiver.export(self, path)?;
        info!(path = %path.display(), format = %fmt, "print exported");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use resina_mesh::primitives::cube;
    use resina_support::{SupportPoint, SupportTreeType};

    use crate::job::{CancelToken, SimpleJob};
    use crate::model::{DrainHole, ModelInstance};
    use crate::step::StepStatus;

    fn small_config() -> FullPrintConfig {
        let mut cfg = FullPrintConfig::default();
        cfg.printer.display_width = 64.0;
        cfg.printer.display_height = 36.0;
        cfg.printer.display_pixels_x = 64;
        cfg.printer.display_pixels_y = 36;
        cfg.material.initial_layer_height = 0.5;
        cfg.object.layer_height = 0.5;
        cfg.object.faded_layers = 3;
        cfg
    }

    fn no_supports(mut cfg: FullPrintConfig) -> FullPrintConfig {
        cfg.object.supports_enable = false;
        cfg.object.pad_enable = false;
        cfg
    }

    fn cube_at(name: &str, x: f64, y: f64, side: f64) -> ModelObject {
        let mut mo = ModelObject::new(name, cube(side, side, side));
        mo.instances = vec![ModelInstance::at(x, y)];
        mo
    }

    fn two_cubes() -> Model {
        let mut model = Model::new();
        model.add_object(cube_at("a", 5.0, 5.0, 4.0));
        model.add_object(cube_at("b", 30.0, 5.0, 4.0));
        model
    }

    fn job() -> Arc<dyn JobControl> {
        Arc::new(SimpleJob::new())
    }

    fn recording_job(token: CancelToken) -> (Arc<dyn JobControl>, Arc<Mutex<Vec<(u32, String)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let job = SimpleJob::new()
            .with_token(token)
            .with_status(move |p, m| s.lock().unwrap().push((p, m.to_string())));
        (Arc::new(job), seen)
    }

    #[test]
    fn test_apply_is_idempotent() {
        let model = two_cubes();
        let cfg = no_supports(small_config());
        let mut print = Print::new();
        assert_ne!(print.apply(&model, &cfg).unwrap(), ApplyStatus::Unchanged);
        print.process(&job()).unwrap();
        assert!(print.finished());

        assert_eq!(print.apply(&model, &cfg).unwrap(), ApplyStatus::Unchanged);
        assert!(print.finished());
        let (job, seen) = recording_job(CancelToken::new());
        print.process(&job).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![(100, "Slicing done".to_string())]);
    }

    #[test]
    fn test_merged_layers_and_statistics() {
        let model = two_cubes();
        let cfg = no_supports(small_config());
        let mut print = Print::new();
        print.apply(&model, &cfg).unwrap();
        print.process(&job()).unwrap();

        assert_eq!(print.layers().len(), 8);
        assert_relative_eq!(print.layers()[0].level(), 0.5, epsilon = 1e-9);
        for layer in print.layers() {
            assert_eq!(layer.transformed_slices().len(), 2);
            assert_relative_eq!(total_area(layer.transformed_slices()), 32.0, epsilon = 1e-3);
        }
        let stats = print.statistics();
        assert_relative_eq!(stats.objects_used_material, 128.0, epsilon = 1e-2);
        assert_relative_eq!(stats.support_used_material, 0.0);
        assert_eq!(stats.fast_layers_count, 8);
        assert_eq!(stats.layers_times_running_total.len(), 8);
        assert_relative_eq!(
            *stats.layers_times_running_total.last().unwrap(),
            stats.estimated_print_time,
            epsilon = 1e-9
        );
        // Fast tilt, tower move and the faded first exposure.
        assert_relative_eq!(stats.layers_times_running_total[0], 5.0 + 2.5 + 15.0, epsilon = 1e-9);

        assert_eq!(print.rasters().len(), 8);
        let exposed = print.rasters()[0].exposed_area(print.raster_settings().pixel_area());
        assert_relative_eq!(exposed, 32.0, epsilon = 0.1);
    }

    #[test]
    fn test_instances_are_placed_and_rotated() {
        let mut mo = cube_at("a", 10.0, 10.0, 4.0);
        mo.instances.push(ModelInstance {
            rotation_z: std::f64::consts::FRAC_PI_2,
            ..ModelInstance::at(40.0, 10.0)
        });
        let mut model = Model::new();
        model.add_object(mo);
        let mut print = Print::new();
        print.apply(&model, &no_supports(small_config())).unwrap();
        print.process(&job()).unwrap();

        let po = &print.objects()[0];
        assert_eq!(po.instances().len(), 2);
        assert_relative_eq!(po.instances()[0].rotation, 0.0, epsilon = 1e-12);
        assert_relative_eq!(
            po.instances()[1].rotation,
            std::f64::consts::FRAC_PI_2,
            epsilon = 1e-12
        );
        // The second copy turns about its origin: x spans [36, 40].
        let bb = resina_mesh::polygon::bounding_box_of(print.layers()[0].transformed_slices());
        assert_relative_eq!(bb.min.x, 10.0, epsilon = 1e-3);
        assert_relative_eq!(bb.max.x, 40.0, epsilon = 1e-3);
    }

    #[test]
    fn test_object_option_invalidates_only_its_object() {
        let mut model = two_cubes();
        let cfg = no_supports(small_config());
        let mut print = Print::new();
        print.apply(&model, &cfg).unwrap();
        print.process(&job()).unwrap();

        model.objects[0]
            .config
            .insert("hollowing_quality".into(), serde_json::json!(0.8));
        assert_eq!(print.apply(&model, &cfg).unwrap(), ApplyStatus::Invalidated);

        let a = &print.objects()[0];
        let b = &print.objects()[1];
        assert!(a.is_step_done(ObjectStep::Assembly));
        for step in &ObjectStep::ALL[1..] {
            assert!(!a.is_step_done(*step), "{step:?} still done");
            assert!(b.is_step_done(*step), "{step:?} lost on sibling");
        }
        assert!(!print.is_print_step_done(PrintStep::MergeSlicesAndEval));
        print.process(&job()).unwrap();
        assert!(print.finished());
    }

    #[test]
    fn test_config_buckets_on_apply() {
        let model = two_cubes();
        let cfg = no_supports(small_config());
        let mut print = Print::new();
        print.apply(&model, &cfg).unwrap();
        print.process(&job()).unwrap();

        let mut ignored = cfg.clone();
        ignored.material.bottle_cost = 99.0;
        assert_eq!(print.apply(&model, &ignored).unwrap(), ApplyStatus::Changed);
        assert!(print.finished());

        let mut exposure = ignored.clone();
        exposure.material.exposure_time = 8.0;
        assert_eq!(print.apply(&model, &exposure).unwrap(), ApplyStatus::Invalidated);
        assert!(!print.is_print_step_done(PrintStep::MergeSlicesAndEval));
        assert!(print.is_step_done(ObjectStep::ObjectSlice));
    }

    #[test]
    fn test_model_changes_reconcile_objects() {
        let mut model = two_cubes();
        let cfg = no_supports(small_config());
        let mut print = Print::new();
        print.apply(&model, &cfg).unwrap();
        print.process(&job()).unwrap();
        let first = model.objects[0].id;

        // Appending keeps the existing objects' steps.
        model.add_object(cube_at("c", 50.0, 20.0, 3.0));
        assert_eq!(print.apply(&model, &cfg).unwrap(), ApplyStatus::Invalidated);
        assert_eq!(print.objects().len(), 3);
        assert!(print.object(first).unwrap().is_step_done(ObjectStep::ObjectSlice));
        assert!(!print.objects()[2].is_step_done(ObjectStep::Assembly));

        // Removing the first object keeps the others.
        model.objects.remove(0);
        print.apply(&model, &cfg).unwrap();
        assert_eq!(print.model().object_ids(), model.object_ids());
        assert!(print.object(first).is_none());
        assert!(print.objects()[0].is_step_done(ObjectStep::ObjectSlice));

        // Moving an instance only invalidates merging.
        print.process(&job()).unwrap();
        model.objects[0].instances[0].offset.x += 5.0;
        assert_eq!(print.apply(&model, &cfg).unwrap(), ApplyStatus::Invalidated);
        assert!(print.is_step_done(ObjectStep::SliceSupports));
        assert!(!print.is_print_step_done(PrintStep::MergeSlicesAndEval));

        // Rotating the first instance changes the object transformation.
        model.objects[0].instances[0].rotation_z = 0.3;
        print.apply(&model, &cfg).unwrap();
        assert_eq!(
            print.objects()[0].step_state(ObjectStep::Assembly).status,
            StepStatus::Fresh
        );

        // Non-printable instances drop the object.
        for inst in &mut model.objects[1].instances {
            inst.printable = false;
        }
        print.apply(&model, &cfg).unwrap();
        assert_eq!(print.objects().len(), 1);
    }

    #[test]
    fn test_drain_holes_and_points_invalidate_their_steps() {
        let mut model = two_cubes();
        let mut cfg = small_config();
        cfg.object.supports_enable = false;
        let mut print = Print::new();
        print.apply(&model, &cfg).unwrap();
        print.process(&job()).unwrap();

        model.objects[0].drain_holes.push(DrainHole {
            pos: resina_math::Point3::new(2.0, 2.0, 4.0),
            normal: Vec3::z(),
            radius: 0.5,
            height: 1.0,
        });
        assert_eq!(print.apply(&model, &cfg).unwrap(), ApplyStatus::Invalidated);
        let po = &print.objects()[0];
        assert!(po.is_step_done(ObjectStep::Hollowing));
        assert!(!po.is_step_done(ObjectStep::DrillHoles));

        model.objects[1].points_status = PointsStatus::UserModified;
        model.objects[1].support_points = vec![SupportPoint::new(resina_math::Point3::new(2.0, 2.0, 0.0), 0.2)];
        print.apply(&model, &cfg).unwrap();
        let po = &print.objects()[1];
        assert!(po.is_step_done(ObjectStep::ObjectSlice));
        assert!(!po.is_step_done(ObjectStep::SupportPoints));
    }

    #[test]
    fn test_cancellation_keeps_completed_steps() {
        let mut model = Model::new();
        model.add_object(cube_at("a", 20.0, 10.0, 6.0));
        let mut cfg = small_config();
        cfg.object.support_object_elevation = 3.0;
        cfg.object.pad_enable = false;

        let token = CancelToken::new();
        let trigger = token.clone();
        let job: Arc<dyn JobControl> = Arc::new(SimpleJob::new().with_token(token.clone()).with_status(
            move |_, msg| {
                if msg == ObjectStep::SupportTree.label() {
                    trigger.cancel();
                }
            },
        ));
        let mut print = Print::new();
        print.apply(&model, &cfg).unwrap();
        assert!(matches!(print.process(&job), Err(PrintError::Canceled)));

        let po = &print.objects()[0];
        assert!(po.is_step_done(ObjectStep::SupportPoints));
        assert_eq!(po.step_state(ObjectStep::SupportTree).status, StepStatus::Canceled);
        assert!(po.support_mesh().is_empty());

        // The same steps run without interruption give the same output.
        let mut reference = Print::new();
        reference.apply(&model, &cfg).unwrap();
        let plain = self::job();
        for step in &ObjectStep::LEVEL_1[..5] {
            let idx = 0;
            reference.run_object_step(idx, *step, 0.5, 0.0, 1.0, &plain).unwrap();
        }
        let r = &reference.objects()[0];
        assert_eq!(po.mesh_to_print(), r.mesh_to_print());
        assert_eq!(po.model_slices(), r.model_slices());
        assert_eq!(po.support_points(), r.support_points());

        // Resuming finishes the job.
        token.reset();
        let (resume, _) = recording_job(CancelToken::new());
        print.process(&resume).unwrap();
        assert!(print.finished());
        assert!(print.objects()[0].is_step_done(ObjectStep::SupportTree));
    }

    #[test]
    fn test_organic_tree_prints_without_supports() {
        let mut model = Model::new();
        model.add_object(cube_at("a", 20.0, 10.0, 4.0));
        let mut cfg = small_config();
        cfg.object.support_tree_type = SupportTreeType::Organic;
        cfg.object.pad_enable = false;
        let mut print = Print::new();
        print.apply(&model, &cfg).unwrap();
        print.process(&job()).unwrap();
        assert!(print.objects()[0].support_mesh().is_empty());
        assert!(print.finished());
    }

    #[test]
    fn test_validate_messages() {
        let mut model = Model::new();
        model.add_object(cube_at("a", 20.0, 10.0, 4.0));
        let mut cfg = small_config();
        let mut print = Print::new();
        print.apply(&model, &cfg).unwrap();
        assert!(print.validate().is_ok());

        cfg.object.support_object_elevation = 0.5;
        print.apply(&model, &cfg).unwrap();
        let err = print.validate().unwrap_err().to_string();
        assert!(err.starts_with("Elevation is too low for object."), "{err}");

        cfg.object.support_object_elevation = 5.0;
        cfg.material.exposure_time = 1000.0;
        print.apply(&model, &cfg).unwrap();
        assert_eq!(
            print.validate().unwrap_err().to_string(),
            "Exposition time is out of printer profile bounds."
        );

        cfg.material.exposure_time = 10.0;
        model.objects[0].points_status = PointsStatus::UserModified;
        print.apply(&model, &cfg).unwrap();
        assert!(print
            .validate()
            .unwrap_err()
            .to_string()
            .starts_with("Cannot proceed without support points!"));
    }

    #[test]
    fn test_export_unknown_format() {
        let model = two_cubes();
        let mut cfg = no_supports(small_config());
        cfg.printer.sla_archive_format = "nope".into();
        let mut print = Print::new();
        print.apply(&model, &cfg).unwrap();
        print.process(&job()).unwrap();
        let err = print.export(Path::new("unused.sl1")).unwrap_err();
        assert_eq!(err.to_string(), "Unknown archive format: nope");
    }

    #[test]
    fn test_empty_model_clears_output() {
        let model = two_cubes();
        let cfg = no_supports(small_config());
        let mut print = Print::new();
        print.apply(&model, &cfg).unwrap();
        print.process(&job()).unwrap();
        assert!(!print.layers().is_empty());

        let mut empty = model.clone();
        empty.objects.clear();
        print.apply(&empty, &cfg).unwrap();
        assert!(print.objects().is_empty());
        assert!(print.layers().is_empty());
        assert!(!print.is_step_done(ObjectStep::Assembly));
    }

    #[test]
    fn test_relative_correction_scales_objects() {
        let mut model = Model::new();
        model.add_object(cube_at("a", 20.0, 10.0, 4.0));
        let mut cfg = no_supports(small_config());
        cfg.printer.relative_correction_x = 1.5;
        cfg.material.material_correction_x = 2.0;
        let mut print = Print::new();
        print.apply(&model, &cfg).unwrap();
        assert_relative_eq!(print.relative_correction().x, 3.0);
        print.process(&job()).unwrap();
        assert_relative_eq!(
            total_area(print.layers()[0].transformed_slices()),
            48.0,
            epsilon = 1e-3
        );
    }
}
