//! Print, printer, material and object settings.
//!
//! Options are addressed by their serde field name. Configs are compared
//! key by key through their JSON form, and each key belongs to exactly one
//! invalidation bucket.

use std::f64::consts::PI;

use resina_math::EPSILON;
use resina_support::{EmbedObject, PadConfig, PillarConnectionMode, SupportTreeConfig, SupportTreeType};
use resina_voxel::HollowingConfig;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{PrintError, Result};
use crate::step::ObjectStep;

/// How slice contours are filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlicingMode {
    /// Nested contours alternate between solid and hole.
    #[default]
    Regular,
    /// Same nesting as `Regular` for closed meshes.
    EvenOdd,
    /// Every contour is filled.
    CloseHoles,
}

/// Display mounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayOrientation {
    /// Display width runs along bed X.
    #[default]
    Landscape,
    /// Display width runs along bed Y.
    Portrait,
}

/// Tilt profile of a material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterialPrintSpeed {
    /// Fast tilt for small layers.
    #[default]
    Fast,
    /// Always slow tilt.
    Slow,
    /// Slow tilt with extra settle time.
    HighViscosity,
}

/// Print level options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlaPrintConfig {
    /// Template for the exported file name.
    pub output_filename_format: String,
}

impl Default for SlaPrintConfig {
    fn default() -> Self {
        Self {
            output_filename_format: "{input_filename_base}.sl1".into(),
        }
    }
}

/// Printer options. Lengths in mm, times in s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlaPrinterConfig {
    /// Technology tag of the profile.
    pub printer_technology: String,
    /// Bed outline points.
    pub bed_shape: Vec<[f64; 2]>,
    /// Highest printable Z.
    pub max_print_height: f64,
    /// Display size along its width.
    pub display_width: f64,
    /// Display size along its height.
    pub display_height: f64,
    /// Pixel columns.
    pub display_pixels_x: u32,
    /// Pixel rows.
    pub display_pixels_y: u32,
    /// Mirror images along X.
    pub display_mirror_x: bool,
    /// Mirror images along Y.
    pub display_mirror_y: bool,
    /// Display mounting.
    pub display_orientation: DisplayOrientation,
    /// Scale correction along X.
    pub relative_correction_x: f64,
    /// Scale correction along Y.
    pub relative_correction_y: f64,
    /// Scale correction along Z.
    pub relative_correction_z: f64,
    /// Outline offset applied to every layer.
    pub absolute_correction: f64,
    /// Inward offset of the first layer, fading out over the faded layers.
    pub elefant_foot_compensation: f64,
    /// Features narrower than this keep their outline.
    pub elefant_foot_min_width: f64,
    /// Antialiasing gamma; 0 disables antialiasing.
    pub gamma_correction: f64,
    /// Tilt time for small layers.
    pub fast_tilt_time: f64,
    /// Tilt time for large layers.
    pub slow_tilt_time: f64,
    /// Tilt time for viscous materials.
    pub high_viscosity_tilt_time: f64,
    /// Lower bound of the layer exposure.
    pub min_exposure_time: f64,
    /// Upper bound of the layer exposure.
    pub max_exposure_time: f64,
    /// Lower bound of the first layer exposure.
    pub min_initial_exposure_time: f64,
    /// Upper bound of the first layer exposure.
    pub max_initial_exposure_time: f64,
    /// Archive writer used on export.
    pub sla_archive_format: String,
    /// Coordinate precision of vector archives.
    pub sla_output_precision: f64,
}

impl Default for SlaPrinterConfig {
    fn default() -> Self {
        Self {
            printer_technology: "SLA".into(),
            bed_shape: vec![[0.0, 0.0], [120.0, 0.0], [120.0, 68.0], [0.0, 68.0]],
            max_print_height: 150.0,
            display_width: 120.0,
            display_height: 68.0,
            display_pixels_x: 2560,
            display_pixels_y: 1440,
            display_mirror_x: false,
            display_mirror_y: false,
            display_orientation: DisplayOrientation::Landscape,
            relative_correction_x: 1.0,
            relative_correction_y: 1.0,
            relative_correction_z: 1.0,
            absolute_correction: 0.0,
            elefant_foot_compensation: 0.0,
            elefant_foot_min_width: 0.2,
            gamma_correction: 1.0,
            fast_tilt_time: 5.0,
            slow_tilt_time: 8.0,
            high_viscosity_tilt_time: 10.0,
            min_exposure_time: 0.0,
            max_exposure_time: 100.0,
            min_initial_exposure_time: 0.0,
            max_initial_exposure_time: 150.0,
            sla_archive_format: "SL1".into(),
            sla_output_precision: 0.001,
        }
    }
}

/// Material options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlaMaterialConfig {
    /// Height of the first layer (mm).
    pub initial_layer_height: f64,
    /// Layer exposure (s).
    pub exposure_time: f64,
    /// First layer exposure (s), fading to `exposure_time`.
    pub initial_exposure_time: f64,
    /// Shrinkage correction along X.
    pub material_correction_x: f64,
    /// Shrinkage correction along Y.
    pub material_correction_y: f64,
    /// Shrinkage correction along Z.
    pub material_correction_z: f64,
    /// Tilt profile.
    pub material_print_speed: MaterialPrintSpeed,
    /// Layers covering less than this share of the display (%) tilt fast.
    pub area_fill: f64,
    /// Price of a bottle.
    pub bottle_cost: f64,
    /// Bottle volume (ml).
    pub bottle_volume: f64,
    /// Bottle weight (kg).
    pub bottle_weight: f64,
    /// Density (g/ml).
    pub material_density: f64,
}

impl Default for SlaMaterialConfig {
    fn default() -> Self {
        Self {
            initial_layer_height: 0.3,
            exposure_time: 10.0,
            initial_exposure_time: 15.0,
            material_correction_x: 1.0,
            material_correction_y: 1.0,
            material_correction_z: 1.0,
            material_print_speed: MaterialPrintSpeed::Fast,
            area_fill: 35.0,
            bottle_cost: 0.0,
            bottle_volume: 1000.0,
            bottle_weight: 1.0,
            material_density: 1.0,
        }
    }
}

/// Per-object options. Lengths in mm, angles in degrees.
///
/// `support_*` options drive the default tree, `branchingsupport_*` the
/// branching tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlaPrintObjectConfig {
    /// Layer height above the first layer.
    pub layer_height: f64,
    /// Layers over which the first layer exposure fades out.
    pub faded_layers: u32,
    /// Closing radius applied to slices.
    pub slice_closing_radius: f64,
    /// Contour fill rule.
    pub slicing_mode: SlicingMode,

    /// Hollow the model.
    pub hollowing_enable: bool,
    /// Wall thickness around the cavity.
    pub hollowing_min_thickness: f64,
    /// Cavity accuracy in `[0, 1]`.
    pub hollowing_quality: f64,
    /// Cavity smoothing distance.
    pub hollowing_closing_distance: f64,

    /// Generate supports.
    pub supports_enable: bool,
    /// Tree synthesizer.
    pub support_tree_type: SupportTreeType,
    /// Generate a pad.
    pub pad_enable: bool,
    /// Pad floor thickness.
    pub pad_wall_thickness: f64,
    /// Put the model on the pad with zero elevation.
    pub pad_around_object: bool,
    /// Pad all around the object, not only under supports.
    pub pad_around_object_everywhere: bool,

    /// Support point density (%).
    pub support_points_density_relative: u32,
    /// Smallest distance between generated points.
    pub support_points_minimal_distance: f64,
    /// Only keep points inside enforcer volumes.
    pub support_enforcers_only: bool,

    /// Pin diameter.
    pub support_head_front_diameter: f64,
    /// Pin penetration.
    pub support_head_penetration: f64,
    /// Head neck length.
    pub support_head_width: f64,
    /// Pillar diameter.
    pub support_pillar_diameter: f64,
    /// Fallback pillar diameter in % of the pillar diameter.
    pub support_small_pillar_diameter_percent: f64,
    /// Bridges a pillar may carry.
    pub support_max_bridges_on_pillar: u32,
    /// Load an on-model support may carry.
    pub support_max_weight_on_model: f64,
    /// Cross link strategy.
    pub support_pillar_connection_mode: PillarConnectionMode,
    /// Only support from the build plate.
    pub support_buildplate_only: bool,
    /// Pillar widening factor in `[0, 1]`.
    pub support_pillar_widening_factor: f64,
    /// Pillar base diameter.
    pub support_base_diameter: f64,
    /// Pillar base height.
    pub support_base_height: f64,
    /// Minimum distance of pillar bases from the model.
    pub support_base_safety_distance: f64,
    /// Bridge angle from the horizontal.
    pub support_critical_angle: f64,
    /// Longest bridge.
    pub support_max_bridge_length: f64,
    /// Longest pillar cross link.
    pub support_max_pillar_link_distance: f64,
    /// Gap between the bed and the model bottom.
    pub support_object_elevation: f64,

    /// Pin diameter.
    pub branchingsupport_head_front_diameter: f64,
    /// Pin penetration.
    pub branchingsupport_head_penetration: f64,
    /// Head neck length.
    pub branchingsupport_head_width: f64,
    /// Pillar diameter.
    pub branchingsupport_pillar_diameter: f64,
    /// Fallback pillar diameter in % of the pillar diameter.
    pub branchingsupport_small_pillar_diameter_percent: f64,
    /// Bridges a pillar may carry.
    pub branchingsupport_max_bridges_on_pillar: u32,
    /// Load an on-model support may carry.
    pub branchingsupport_max_weight_on_model: f64,
    /// Cross link strategy.
    pub branchingsupport_pillar_connection_mode: PillarConnectionMode,
    /// Only support from the build plate.
    pub branchingsupport_buildplate_only: bool,
    /// Branch widening factor in `[0, 1]`.
    pub branchingsupport_pillar_widening_factor: f64,
    /// Trunk base diameter.
    pub branchingsupport_base_diameter: f64,
    /// Trunk base height.
    pub branchingsupport_base_height: f64,
    /// Minimum distance of trunk bases from the model.
    pub branchingsupport_base_safety_distance: f64,
    /// Branch angle from the horizontal.
    pub branchingsupport_critical_angle: f64,
    /// Longest branch segment.
    pub branchingsupport_max_bridge_length: f64,
    /// Longest trunk cross link.
    pub branchingsupport_max_pillar_link_distance: f64,
    /// Gap between the bed and the model bottom.
    pub branchingsupport_object_elevation: f64,

    /// Gap between an embedded model and the pad.
    pub pad_object_gap: f64,
    /// Pad rim height.
    pub pad_wall_height: f64,
    /// Pad brim around the supports.
    pub pad_brim_size: f64,
    /// Footprints closer than this merge into one pad.
    pub pad_max_merge_distance: f64,
    /// Pad wall slope.
    pub pad_wall_slope: f64,
    /// Distance between object connector sticks.
    pub pad_object_connector_stride: f64,
    /// Width of object connector sticks.
    pub pad_object_connector_width: f64,
    /// How deep connector sticks enter the model.
    pub pad_object_connector_penetration: f64,
}

impl Default for SlaPrintObjectConfig {
    fn default() -> Self {
        Self {
            layer_height: 0.05,
            faded_layers: 10,
            slice_closing_radius: 0.049,
            slicing_mode: SlicingMode::Regular,

            hollowing_enable: false,
            hollowing_min_thickness: 3.0,
            hollowing_quality: 0.5,
            hollowing_closing_distance: 2.0,

            supports_enable: true,
            support_tree_type: SupportTreeType::Default,
            pad_enable: true,
            pad_wall_thickness: 2.0,
            pad_around_object: false,
            pad_around_object_everywhere: false,

            support_points_density_relative: 100,
            support_points_minimal_distance: 1.0,
            support_enforcers_only: false,

            support_head_front_diameter: 0.4,
            support_head_penetration: 0.2,
            support_head_width: 1.0,
            support_pillar_diameter: 1.0,
            support_small_pillar_diameter_percent: 50.0,
            support_max_bridges_on_pillar: 3,
            support_max_weight_on_model: 10.0,
            support_pillar_connection_mode: PillarConnectionMode::Dynamic,
            support_buildplate_only: false,
            support_pillar_widening_factor: 0.5,
            support_base_diameter: 4.0,
            support_base_height: 1.0,
            support_base_safety_distance: 1.0,
            support_critical_angle: 45.0,
            support_max_bridge_length: 15.0,
            support_max_pillar_link_distance: 10.0,
            support_object_elevation: 5.0,

            branchingsupport_head_front_diameter: 0.4,
            branchingsupport_head_penetration: 0.2,
            branchingsupport_head_width: 1.0,
            branchingsupport_pillar_diameter: 1.0,
            branchingsupport_small_pillar_diameter_percent: 50.0,
            branchingsupport_max_bridges_on_pillar: 2,
            branchingsupport_max_weight_on_model: 10.0,
            branchingsupport_pillar_connection_mode: PillarConnectionMode::Dynamic,
            branchingsupport_buildplate_only: false,
            branchingsupport_pillar_widening_factor: 0.5,
            branchingsupport_base_diameter: 4.0,
            branchingsupport_base_height: 1.0,
            branchingsupport_base_safety_distance: 1.0,
            branchingsupport_critical_angle: 45.0,
            branchingsupport_max_bridge_length: 5.0,
            branchingsupport_max_pillar_link_distance: 10.0,
            branchingsupport_object_elevation: 5.0,

            pad_object_gap: 1.0,
            pad_wall_height: 0.0,
            pad_brim_size: 1.6,
            pad_max_merge_distance: 50.0,
            pad_wall_slope: 90.0,
            pad_object_connector_stride: 10.0,
            pad_object_connector_width: 0.5,
            pad_object_connector_penetration: 0.3,
        }
    }
}

impl SlaPrintObjectConfig {
    /// This config with `overrides` applied on top.
    ///
    /// Keys that are not object options are rejected.
    pub fn with_overrides(&self, overrides: &Map<String, Value>) -> Result<Self> {
        if overrides.is_empty() {
            return Ok(self.clone());
        }
        let mut map = config_map(self)?;
        for (key, value) in overrides {
            if !map.contains_key(key) {
                return Err(PrintError::UnknownOption(key.clone()));
            }
            map.insert(key.clone(), value.clone());
        }
        Ok(serde_json::from_value(Value::Object(map))?)
    }
}

/// All four categories together, as loaded from a profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FullPrintConfig {
    /// Print level options.
    pub print: SlaPrintConfig,
    /// Printer options.
    pub printer: SlaPrinterConfig,
    /// Material options.
    pub material: SlaMaterialConfig,
    /// Default object options.
    pub object: SlaPrintObjectConfig,
}

impl FullPrintConfig {
    /// Parse a TOML profile with `[print]`, `[printer]`, `[material]` and
    /// `[object]` tables. Missing tables and keys take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Read a category from a TOML string.
    pub fn category_from_toml<T: DeserializeOwned>(s: &str) -> Result<T> {
        Ok(toml::from_str(s)?)
    }
}

/// The options of `config` as a key/value map.
pub fn config_map<T: Serialize>(config: &T) -> Result<Map<String, Value>> {
    match serde_json::to_value(config)? {
        Value::Object(map) => Ok(map),
        _ => Err(PrintError::Config("config is not a key/value table".into())),
    }
}

/// Keys whose values differ between `a` and `b`, sorted.
pub fn diff_keys<T: Serialize>(a: &T, b: &T) -> Result<Vec<String>> {
    let (a, b) = (config_map(a)?, config_map(b)?);
    let mut keys: Vec<String> = a
        .iter()
        .filter(|(k, v)| b.get(*k) != Some(*v))
        .map(|(k, _)| k.clone())
        .collect();
    keys.extend(b.keys().filter(|k| !a.contains_key(*k)).cloned());
    keys.sort();
    keys.dedup();
    Ok(keys)
}

/// What a changed print, printer or material option invalidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintBucket {
    /// Geometry of every layer: object slicing and merging.
    Full,
    /// Only the merged layers and their rasters.
    Rasterize,
    /// Nothing; notes and hardware timings.
    Ignore,
}

const STEPS_FULL: &[&str] = &[
    "initial_layer_height",
    "material_correction_x",
    "material_correction_y",
    "material_correction_z",
    "material_print_speed",
    "relative_correction_x",
    "relative_correction_y",
    "relative_correction_z",
    "absolute_correction",
    "elefant_foot_compensation",
    "elefant_foot_min_width",
    "gamma_correction",
];

const STEPS_RASTERIZE: &[&str] = &[
    "min_exposure_time",
    "max_exposure_time",
    "exposure_time",
    "min_initial_exposure_time",
    "max_initial_exposure_time",
    "initial_exposure_time",
    "display_width",
    "display_height",
    "display_pixels_x",
    "display_pixels_y",
    "display_mirror_x",
    "display_mirror_y",
    "display_orientation",
    "sla_archive_format",
    "sla_output_precision",
];

const STEPS_IGNORE: &[&str] = &[
    "bed_shape",
    "max_print_height",
    "printer_technology",
    "output_filename_format",
    "fast_tilt_time",
    "slow_tilt_time",
    "high_viscosity_tilt_time",
    "area_fill",
    "bottle_cost",
    "bottle_volume",
    "bottle_weight",
    "material_density",
];

/// Bucket of a print, printer or material option.
pub fn print_option_bucket(key: &str) -> Option<PrintBucket> {
    if STEPS_FULL.contains(&key) {
        Some(PrintBucket::Full)
    } else if STEPS_RASTERIZE.contains(&key) {
        Some(PrintBucket::Rasterize)
    } else if STEPS_IGNORE.contains(&key) {
        Some(PrintBucket::Ignore)
    } else {
        None
    }
}

/// First object step invalidated by a changed object option.
pub fn object_option_step(key: &str) -> Option<ObjectStep> {
    let step = match key {
        "hollowing_enable"
        | "hollowing_min_thickness"
        | "hollowing_quality"
        | "hollowing_closing_distance" => ObjectStep::Hollowing,

        "layer_height"
        | "faded_layers"
        | "pad_enable"
        | "pad_wall_thickness"
        | "supports_enable"
        | "support_tree_type"
        | "support_object_elevation"
        | "branchingsupport_object_elevation"
        | "pad_around_object"
        | "pad_around_object_everywhere"
        | "slice_closing_radius"
        | "slicing_mode" => ObjectStep::ObjectSlice,

        "support_points_density_relative"
        | "support_enforcers_only"
        | "support_points_minimal_distance" => ObjectStep::SupportPoints,

        "pad_wall_height"
        | "pad_brim_size"
        | "pad_max_merge_distance"
        | "pad_wall_slope"
        | "pad_object_connector_stride"
        | "pad_object_connector_width"
        | "pad_object_connector_penetration" => ObjectStep::Pad,

        "pad_object_gap" => ObjectStep::SupportTree,
        k if k.starts_with("support_") || k.starts_with("branchingsupport_") => {
            ObjectStep::SupportTree
        }
        _ => return None,
    };
    Some(step)
}

/// An unbucketed key is a defect in the bucket tables.
pub(crate) fn unbucketed(key: &str) -> PrintError {
    debug_assert!(false, "config option {key} has no invalidation bucket");
    PrintError::UnknownOption(key.to_string())
}

/// The model sits in the pad without elevation.
pub fn is_zero_elevation(c: &SlaPrintObjectConfig) -> bool {
    c.pad_enable && c.pad_around_object
}

/// Support tree settings for an object.
pub fn make_support_cfg(c: &SlaPrintObjectConfig) -> SupportTreeConfig {
    let zero_elevation = is_zero_elevation(c);
    let mut cfg = SupportTreeConfig {
        enabled: c.supports_enable,
        tree_type: c.support_tree_type,
        ..Default::default()
    };
    let safety = |d: f64| {
        if d < EPSILON {
            SupportTreeConfig::SAFETY_DISTANCE_MM
        } else {
            d
        }
    };
    match c.support_tree_type {
        SupportTreeType::Default => {
            let pillar_r = 0.5 * c.support_pillar_diameter;
            cfg.head_front_radius_mm = 0.5 * c.support_head_front_diameter;
            cfg.head_back_radius_mm = pillar_r;
            cfg.head_fallback_radius_mm = 0.01 * c.support_small_pillar_diameter_percent * pillar_r;
            cfg.head_penetration_mm = c.support_head_penetration;
            cfg.head_width_mm = c.support_head_width;
            cfg.object_elevation_mm = if zero_elevation { 0.0 } else { c.support_object_elevation };
            cfg.bridge_slope = c.support_critical_angle * PI / 180.0;
            cfg.max_bridge_length_mm = c.support_max_bridge_length;
            cfg.max_pillar_link_distance_mm = c.support_max_pillar_link_distance;
            cfg.pillar_connection_mode = c.support_pillar_connection_mode;
            cfg.ground_facing_only = c.support_buildplate_only;
            cfg.pillar_widening_factor = c.support_pillar_widening_factor;
            cfg.base_radius_mm = 0.5 * c.support_base_diameter;
            cfg.base_height_mm = c.support_base_height;
            cfg.pillar_base_safety_distance_mm = safety(c.support_base_safety_distance);
            cfg.max_bridges_on_pillar = c.support_max_bridges_on_pillar;
            cfg.max_weight_on_model_support = c.support_max_weight_on_model;
        }
        SupportTreeType::Branching | SupportTreeType::Organic => {
            let pillar_r = 0.5 * c.branchingsupport_pillar_diameter;
            cfg.head_front_radius_mm = 0.5 * c.branchingsupport_head_front_diameter;
            cfg.head_back_radius_mm = pillar_r;
            cfg.head_fallback_radius_mm =
                0.01 * c.branchingsupport_small_pillar_diameter_percent * pillar_r;
            cfg.head_penetration_mm = c.branchingsupport_head_penetration;
            cfg.head_width_mm = c.branchingsupport_head_width;
            cfg.object_elevation_mm = if zero_elevation {
                0.0
            } else {
                c.branchingsupport_object_elevation
            };
            cfg.bridge_slope = c.branchingsupport_critical_angle * PI / 180.0;
            cfg.max_bridge_length_mm = c.branchingsupport_max_bridge_length;
            cfg.max_pillar_link_distance_mm = c.branchingsupport_max_pillar_link_distance;
            cfg.pillar_connection_mode = c.branchingsupport_pillar_connection_mode;
            cfg.ground_facing_only = c.branchingsupport_buildplate_only;
            cfg.pillar_widening_factor = c.branchingsupport_pillar_widening_factor;
            cfg.base_radius_mm = 0.5 * c.branchingsupport_base_diameter;
            cfg.base_height_mm = c.branchingsupport_base_height;
            cfg.pillar_base_safety_distance_mm = safety(c.branchingsupport_base_safety_distance);
            cfg.max_bridges_on_pillar = c.branchingsupport_max_bridges_on_pillar;
            cfg.max_weight_on_model_support = c.branchingsupport_max_weight_on_model;
        }
    }
    cfg
}

/// Pad settings for an object. Embedding follows [`is_zero_elevation`].
pub fn make_pad_cfg(c: &SlaPrintObjectConfig) -> PadConfig {
    let mut embed_object = EmbedObject {
        enabled: is_zero_elevation(c),
        ..Default::default()
    };
    if embed_object.enabled {
        embed_object.everywhere = c.pad_around_object_everywhere;
        embed_object.object_gap_mm = c.pad_object_gap;
        embed_object.stick_width_mm = c.pad_object_connector_width;
        embed_object.stick_stride_mm = c.pad_object_connector_stride;
        embed_object.stick_penetration_mm = c.pad_object_connector_penetration;
    }
    PadConfig {
        wall_thickness_mm: c.pad_wall_thickness,
        wall_height_mm: c.pad_wall_height,
        max_merge_dist_mm: c.pad_max_merge_distance,
        wall_slope: c.pad_wall_slope * PI / 180.0,
        brim_size_mm: c.pad_brim_size,
        embed_object,
    }
}

/// Hollowing settings for an object.
pub fn make_hollowing_cfg(c: &SlaPrintObjectConfig) -> HollowingConfig {
    HollowingConfig {
        min_thickness: c.hollowing_min_thickness,
        quality: c.hollowing_quality,
        closing_distance: c.hollowing_closing_distance,
        enabled: c.hollowing_enable,
    }
}

/// Head pin diameter used when generating support points.
pub fn support_head_diameter(c: &SlaPrintObjectConfig) -> f64 {
    match c.support_tree_type {
        SupportTreeType::Branching => c.branchingsupport_head_front_diameter,
        SupportTreeType::Default | SupportTreeType::Organic => c.support_head_front_diameter,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use serde_json::json;

    #[test]
    fn test_every_option_has_a_bucket() {
        for key in config_map(&SlaPrintConfig::default()).unwrap().keys() {
            assert!(print_option_bucket(key).is_some(), "{key}");
        }
        for key in config_map(&SlaPrinterConfig::default()).unwrap().keys() {
            assert!(print_option_bucket(key).is_some(), "{key}");
        }
        for key in config_map(&SlaMaterialConfig::default()).unwrap().keys() {
            assert!(print_option_bucket(key).is_some(), "{key}");
        }
        for key in config_map(&SlaPrintObjectConfig::default()).unwrap().keys() {
            assert!(object_option_step(key).is_some(), "{key}");
        }
    }

    #[test]
    fn test_buckets() {
        assert_eq!(print_option_bucket("exposure_time"), Some(PrintBucket::Rasterize));
        assert_eq!(print_option_bucket("initial_layer_height"), Some(PrintBucket::Full));
        assert_eq!(print_option_bucket("bottle_cost"), Some(PrintBucket::Ignore));
        assert_eq!(print_option_bucket("nonsense"), None);
        assert_eq!(object_option_step("hollowing_quality"), Some(ObjectStep::Hollowing));
        assert_eq!(object_option_step("support_object_elevation"), Some(ObjectStep::ObjectSlice));
        assert_eq!(object_option_step("support_pillar_diameter"), Some(ObjectStep::SupportTree));
        assert_eq!(object_option_step("pad_object_gap"), Some(ObjectStep::SupportTree));
        assert_eq!(object_option_step("pad_brim_size"), Some(ObjectStep::Pad));
        assert_eq!(
            object_option_step("support_points_minimal_distance"),
            Some(ObjectStep::SupportPoints)
        );
    }

    #[test]
    fn test_diff_keys_sorted() {
        let a = SlaMaterialConfig::default();
        let b = SlaMaterialConfig {
            exposure_time: 8.0,
            area_fill: 50.0,
            ..a.clone()
        };
        assert_eq!(diff_keys(&a, &b).unwrap(), vec!["area_fill", "exposure_time"]);
        assert!(diff_keys(&a, &a).unwrap().is_empty());
    }

    #[test]
    fn test_overrides() {
        let base = SlaPrintObjectConfig::default();
        let mut map = Map::new();
        map.insert("layer_height".into(), json!(0.1));
        map.insert("support_tree_type".into(), json!("branching"));
        let cfg = base.with_overrides(&map).unwrap();
        assert_relative_eq!(cfg.layer_height, 0.1);
        assert_eq!(cfg.support_tree_type, SupportTreeType::Branching);

        map.insert("no_such_option".into(), json!(1));
        assert!(matches!(
            base.with_overrides(&map),
            Err(PrintError::UnknownOption(k)) if k == "no_such_option"
        ));
    }

    #[test]
    fn test_toml_profile() {
        let cfg = FullPrintConfig::from_toml_str(
            r#"
            [material]
            exposure_time = 6.5

            [object]
            supports_enable = false
            support_pillar_connection_mode = "zigzag"
            "#,
        )
        .unwrap();
        assert_relative_eq!(cfg.material.exposure_time, 6.5);
        assert!(!cfg.object.supports_enable);
        assert_eq!(cfg.object.support_pillar_connection_mode, PillarConnectionMode::Zigzag);
        assert_eq!(cfg.printer, SlaPrinterConfig::default());

        let printer: SlaPrinterConfig =
            FullPrintConfig::category_from_toml("display_pixels_x = 1620").unwrap();
        assert_eq!(printer.display_pixels_x, 1620);
        assert!(FullPrintConfig::from_toml_str("[object]\nlayer_height = \"thin\"").is_err());
    }

    #[test]
    fn test_support_cfg_mapping() {
        let c = SlaPrintObjectConfig::default();
        let cfg = make_support_cfg(&c);
        assert_relative_eq!(cfg.head_front_radius_mm, 0.2);
        assert_relative_eq!(cfg.head_back_radius_mm, 0.5);
        assert_relative_eq!(cfg.head_fallback_radius_mm, 0.25);
        assert_relative_eq!(cfg.bridge_slope, PI / 4.0);
        assert_relative_eq!(cfg.object_elevation_mm, 5.0);

        let zero = SlaPrintObjectConfig {
            pad_around_object: true,
            support_base_safety_distance: 0.0,
            ..c.clone()
        };
        let cfg = make_support_cfg(&zero);
        assert_relative_eq!(cfg.object_elevation_mm, 0.0);
        assert_relative_eq!(cfg.pillar_base_safety_distance_mm, SupportTreeConfig::SAFETY_DISTANCE_MM);

        let branching = SlaPrintObjectConfig {
            support_tree_type: SupportTreeType::Branching,
            ..c
        };
        let cfg = make_support_cfg(&branching);
        assert_relative_eq!(cfg.max_bridge_length_mm, 5.0);
        assert_eq!(cfg.max_bridges_on_pillar, 2);
    }

    #[test]
    fn test_pad_cfg_mapping() {
        let c = SlaPrintObjectConfig::default();
        let pad = make_pad_cfg(&c);
        assert!(!pad.embed_object.enabled);
        assert_relative_eq!(pad.wall_slope, PI / 2.0);
        assert_relative_eq!(pad.wall_thickness_mm, 2.0);

        let embedded = make_pad_cfg(&SlaPrintObjectConfig {
            pad_around_object: true,
            pad_object_gap: 2.5,
            ..c
        });
        assert!(embedded.embed_object.enabled);
        assert_relative_eq!(embedded.embed_object.object_gap_mm, 2.5);
    }
}
