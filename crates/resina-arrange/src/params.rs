//! Packing parameters and the progress capability.

use crate::bed::Pivots;
use crate::error::{ArrangeError, Result};
use crate::item::ArrangePolygon;

/// Packing parameters. Distances are in mm.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrangeParams {
    /// Clearance between any two items.
    pub min_obj_distance: f64,
    /// Clearance between items and the bed edge.
    pub min_bed_distance: f64,
    /// Candidate density in `[0, 1]`.
    pub accuracy: f32,
    /// Evaluate candidate positions in parallel.
    pub parallel: bool,
    /// Try each item's `allowed_rotations`.
    pub allow_rotations: bool,
    /// Where the finished pile is moved on rectangular beds.
    pub alignment: Pivots,
    /// Where on the bed the pile starts growing.
    pub starting_point: Pivots,
}

impl Default for ArrangeParams {
    fn default() -> Self {
        Self {
            min_obj_distance: 6.0,
            min_bed_distance: 0.0,
            accuracy: 1.0,
            parallel: true,
            allow_rotations: false,
            alignment: Pivots::Center,
            starting_point: Pivots::Center,
        }
    }
}

impl ArrangeParams {
    /// Set the item clearance.
    pub fn with_min_obj_distance(mut self, distance: f64) -> Self {
        self.min_obj_distance = distance;
        self
    }

    /// Set the bed edge clearance.
    pub fn with_min_bed_distance(mut self, distance: f64) -> Self {
        self.min_bed_distance = distance;
        self
    }

    /// Enable or disable rotation search.
    pub fn with_rotations(mut self, allow: bool) -> Self {
        self.allow_rotations = allow;
        self
    }

    /// Set the pile alignment.
    pub fn with_alignment(mut self, alignment: Pivots) -> Self {
        self.alignment = alignment;
        self
    }

    /// Reject out-of-range values.
    pub fn validate(&self) -> Result<()> {
        if self.min_obj_distance.is_nan() || self.min_obj_distance < 0.0 {
            return Err(ArrangeError::InvalidParams(
                "min_obj_distance must not be negative".into(),
            ));
        }
        if self.min_bed_distance.is_nan() || self.min_bed_distance < 0.0 {
            return Err(ArrangeError::InvalidParams(
                "min_bed_distance must not be negative".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.accuracy) {
            return Err(ArrangeError::InvalidParams(
                "accuracy must lie in [0, 1]".into(),
            ));
        }
        Ok(())
    }
}

/// Progress and cancellation hooks for a packing run.
///
/// Every method has a no-op default.
pub trait ProgressSink {
    /// Polled at least once per item; `true` stops packing. Items not yet
    /// processed stay unarranged.
    fn stop_condition(&mut self) -> bool {
        false
    }

    /// Called once per item with the number of items still to process.
    fn progress(&mut self, _remaining: usize) {}

    /// Called right after `item` has been placed.
    fn on_packed(&mut self, _item: &ArrangePolygon) {}
}

/// A sink that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(ArrangeParams::default().validate().is_ok());
        assert!(ArrangeParams::default()
            .with_min_obj_distance(-1.0)
            .validate()
            .is_err());
        let p = ArrangeParams {
            accuracy: 1.5,
            ..Default::default()
        };
        assert!(p.validate().is_err());
    }
}
