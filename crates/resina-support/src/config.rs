//! Support tree and pad settings.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SupportError};

/// Which tree synthesizer runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupportTreeType {
    /// Pillars with bridges and cross links.
    #[default]
    Default,
    /// Branches merging top-down into shared trunks.
    Branching,
    /// Reserved; not implemented.
    Organic,
}

/// How neighbouring pillars are cross-linked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PillarConnectionMode {
    /// Alternating bridges.
    Zigzag,
    /// Pairs of crossing bridges.
    Cross,
    /// Cross links for distant pillars, zig-zag otherwise.
    #[default]
    Dynamic,
}

/// Support tree parameters. Lengths in mm, angles in radians.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupportTreeConfig {
    /// Generate supports at all.
    pub enabled: bool,
    /// Synthesizer flavour.
    pub tree_type: SupportTreeType,
    /// Radius of the pin touching the model.
    pub head_front_radius_mm: f64,
    /// How deep the pin sinks into the model.
    pub head_penetration_mm: f64,
    /// Radius of the head's back end, also the default pillar radius.
    pub head_back_radius_mm: f64,
    /// Smaller back radius tried when the full head does not fit.
    pub head_fallback_radius_mm: f64,
    /// Length of the head neck between the two balls.
    pub head_width_mm: f64,
    /// Cross link strategy.
    pub pillar_connection_mode: PillarConnectionMode,
    /// Only support points reachable straight from the ground.
    pub ground_facing_only: bool,
    /// Pillar widening per unit of carried load, in `[0, 1]`.
    pub pillar_widening_factor: f64,
    /// Radius of the pillar base cone.
    pub base_radius_mm: f64,
    /// Height of the pillar base cone.
    pub base_height_mm: f64,
    /// Steepest allowed deviation of a bridge from the vertical.
    pub bridge_slope: f64,
    /// Longest bridge for a full-radius head.
    pub max_bridge_length_mm: f64,
    /// Farthest distance between cross-linked pillars.
    pub max_pillar_link_distance_mm: f64,
    /// Gap between the model bottom and the ground.
    pub object_elevation_mm: f64,
    /// Clearance between a pillar base and the model in zero elevation.
    pub pillar_base_safety_distance_mm: f64,
    /// Side bridges a single pillar may take.
    pub max_bridges_on_pillar: u32,
    /// Heaviest branch that may be anchored on the model.
    pub max_weight_on_model_support: f64,
}

impl Default for SupportTreeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tree_type: SupportTreeType::Default,
            head_front_radius_mm: 0.2,
            head_penetration_mm: 0.5,
            head_back_radius_mm: 0.5,
            head_fallback_radius_mm: 0.25,
            head_width_mm: 1.0,
            pillar_connection_mode: PillarConnectionMode::Dynamic,
            ground_facing_only: false,
            pillar_widening_factor: 0.5,
            base_radius_mm: 2.0,
            base_height_mm: 1.0,
            bridge_slope: PI / 4.0,
            max_bridge_length_mm: 10.0,
            max_pillar_link_distance_mm: 10.0,
            object_elevation_mm: 10.0,
            pillar_base_safety_distance_mm: 0.5,
            max_bridges_on_pillar: 3,
            max_weight_on_model_support: 10.0,
        }
    }
}

impl SupportTreeConfig {
    /// Support points whose normal is closer than this to straight down
    /// get a head.
    pub const NORMAL_CUTOFF_ANGLE: f64 = 150.0 * PI / 180.0;
    /// Clearance kept between support geometry and the model.
    pub const SAFETY_DISTANCE_MM: f64 = 0.5;
    /// Pillars taller than this want at least one cross link.
    pub const MAX_SOLO_PILLAR_HEIGHT_MM: f64 = 15.0;
    /// Pillars taller than this want a full cascade of cross links.
    pub const MAX_DUAL_PILLAR_HEIGHT_MM: f64 = 35.0;
    /// Evaluation budget of one placement search.
    pub const OPTIMIZER_MAX_ITERATIONS: usize = 2000;
    /// Neighbours each pillar is cross-linked with.
    pub const PILLAR_CASCADE_NEIGHBORS: usize = 3;

    /// Head length from pin tip to back ball end, minus the part inside
    /// the model.
    pub fn head_fullwidth(&self) -> f64 {
        2.0 * self.head_front_radius_mm + self.head_width_mm + 2.0 * self.head_back_radius_mm
            - self.head_penetration_mm
    }

    /// Model clearance for a primitive of radius `r`, shrinking with it.
    pub fn safety_distance(&self, r: f64) -> f64 {
        Self::SAFETY_DISTANCE_MM.min(r * Self::SAFETY_DISTANCE_MM / self.head_back_radius_mm)
    }

    /// Reject settings the synthesizers cannot work with.
    pub fn validate(&self) -> Result<()> {
        let radii = [
            ("head_front_radius_mm", self.head_front_radius_mm),
            ("head_back_radius_mm", self.head_back_radius_mm),
            ("head_fallback_radius_mm", self.head_fallback_radius_mm),
            ("base_radius_mm", self.base_radius_mm),
        ];
        for (name, value) in radii {
            if value.is_nan() || value <= 0.0 {
                return Err(SupportError::InvalidConfig(format!("{name} must be positive")));
            }
        }
        if self.head_fallback_radius_mm > self.head_back_radius_mm {
            return Err(SupportError::InvalidConfig(
                "head_fallback_radius_mm must not exceed head_back_radius_mm".into(),
            ));
        }
        if !(self.bridge_slope > 0.0 && self.bridge_slope <= PI / 2.0) {
            return Err(SupportError::InvalidConfig(
                "bridge_slope must lie in (0, pi/2]".into(),
            ));
        }
        if self.head_width_mm < 0.0 || self.head_penetration_mm < 0.0 {
            return Err(SupportError::InvalidConfig(
                "head width and penetration must not be negative".into(),
            ));
        }
        Ok(())
    }
}

/// Settings for sinking the model into the pad instead of elevating it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedObject {
    /// Zero elevation mode.
    pub enabled: bool,
    /// Pad under the whole model footprint, not only the supports.
    pub everywhere: bool,
    /// Gap between the model wall and the pad.
    pub object_gap_mm: f64,
    /// Distance between sticks bridging the gap.
    pub stick_stride_mm: f64,
    /// Width of one stick.
    pub stick_width_mm: f64,
    /// How far sticks reach into the model.
    pub stick_penetration_mm: f64,
}

impl Default for EmbedObject {
    fn default() -> Self {
        Self {
            enabled: false,
            everywhere: false,
            object_gap_mm: 1.0,
            stick_stride_mm: 10.0,
            stick_width_mm: 0.5,
            stick_penetration_mm: 0.1,
        }
    }
}

/// Pad parameters (mm, wall slope in radians).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PadConfig {
    /// Thickness of the pad plate.
    pub wall_thickness_mm: f64,
    /// Height of the sloped rim above the plate.
    pub wall_height_mm: f64,
    /// Islands closer than this are merged into one pad.
    pub max_merge_dist_mm: f64,
    /// Angle of the rim against the bed.
    pub wall_slope: f64,
    /// Margin around the footprints.
    pub brim_size_mm: f64,
    /// Zero elevation settings.
    pub embed_object: EmbedObject,
}

impl Default for PadConfig {
    fn default() -> Self {
        Self {
            wall_thickness_mm: 1.0,
            wall_height_mm: 1.0,
            max_merge_dist_mm: 50.0,
            wall_slope: PI / 4.0,
            brim_size_mm: 1.6,
            embed_object: EmbedObject::default(),
        }
    }
}

const MIN_BRIM_SIZE_MM: f64 = 0.1;

impl PadConfig {
    /// Horizontal reach of the full pad height along the wall slope.
    pub fn bottom_offset(&self) -> f64 {
        (self.wall_thickness_mm + self.wall_height_mm) / self.wall_slope.tan()
    }

    /// Horizontal reach of the rim along the wall slope.
    pub fn wing_distance(&self) -> f64 {
        self.wall_height_mm / self.wall_slope.tan()
    }

    /// Total pad height.
    pub fn full_height(&self) -> f64 {
        self.wall_height_mm + self.wall_thickness_mm
    }

    /// Elevation the model needs to clear the pad.
    pub fn required_elevation(&self) -> f64 {
        self.wall_thickness_mm
    }

    /// Reject a brim that cannot host the sloped wall.
    pub fn validate(&self) -> Result<()> {
        let waffle_offset = self.brim_size_mm + self.wing_distance();
        if self.brim_size_mm < MIN_BRIM_SIZE_MM
            || self.bottom_offset() > waffle_offset
            || waffle_offset <= MIN_BRIM_SIZE_MM
        {
            return Err(SupportError::InvalidConfig(
                "Pad brim size is too small for the current configuration.".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_derived_head_values() {
        let cfg = SupportTreeConfig::default();
        assert_relative_eq!(cfg.head_fullwidth(), 0.4 + 1.0 + 1.0 - 0.5);
        assert_relative_eq!(cfg.safety_distance(0.5), 0.5);
        assert_relative_eq!(cfg.safety_distance(0.25), 0.25);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_bad_values() {
        let cfg = SupportTreeConfig {
            head_fallback_radius_mm: 1.0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
        let cfg = SupportTreeConfig {
            bridge_slope: 0.0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_pad_derived_values_and_validation() {
        let pad = PadConfig::default();
        assert_relative_eq!(pad.bottom_offset(), 2.0, epsilon = 1e-9);
        assert_relative_eq!(pad.wing_distance(), 1.0, epsilon = 1e-9);
        assert_relative_eq!(pad.full_height(), 2.0);
        assert!(pad.validate().is_ok());

        let tiny = PadConfig {
            brim_size_mm: 0.05,
            ..Default::default()
        };
        let err = tiny.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Pad brim size is too small for the current configuration."
        );
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let cfg: SupportTreeConfig =
            serde_json::from_str(r#"{"tree_type": "branching", "base_radius_mm": 3.0}"#).unwrap();
        assert_eq!(cfg.tree_type, SupportTreeType::Branching);
        assert_relative_eq!(cfg.base_radius_mm, 3.0);
        assert_relative_eq!(cfg.head_back_radius_mm, 0.5);
    }
}
