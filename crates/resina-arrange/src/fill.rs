//! Filling the physical bed with copies of one item.

use tracing::{info, warn};

use crate::bed::ArrangeBed;
use crate::error::Result;
use crate::item::{ArrangePolygon, UNARRANGED};
use crate::pack::arrange;
use crate::params::{ArrangeParams, ProgressSink};

/// Sink wrapper that stops packing once a new copy spills off bed 0.
///
/// Existing instances carry a raised priority, so the first zero-priority
/// item packed onto a virtual bed means the physical bed is full.
pub struct FillBedSink<'a> {
    inner: &'a mut dyn ProgressSink,
    stop: bool,
}

impl<'a> FillBedSink<'a> {
    /// Wrap `inner`, forwarding all calls.
    pub fn new(inner: &'a mut dyn ProgressSink) -> Self {
        Self { inner, stop: false }
    }

    /// Whether the overflow stop has triggered.
    pub fn is_stopped(&self) -> bool {
        self.stop
    }
}

impl ProgressSink for FillBedSink<'_> {
    fn stop_condition(&mut self) -> bool {
        self.stop || self.inner.stop_condition()
    }

    fn progress(&mut self, remaining: usize) {
        self.inner.progress(remaining);
    }

    fn on_packed(&mut self, item: &ArrangePolygon) {
        self.stop = item.bed_idx > 0 && item.priority == 0;
        self.inner.on_packed(item);
    }
}

/// Fill the physical bed with copies of `instances[0]`.
///
/// All `instances` are existing copies of one object; they are packed
/// first and updated in place when any new copy fits. Returns the new
/// copies that landed on bed 0.
pub fn fill_bed(
    instances: &mut [ArrangePolygon],
    excludes: &[ArrangePolygon],
    bed: &ArrangeBed,
    params: &ArrangeParams,
    sink: &mut dyn ProgressSink,
) -> Result<Vec<ArrangePolygon>> {
    let Some(prototype) = instances.first() else {
        return Ok(Vec::new());
    };
    let bed_area = bed.area();
    let poly_area = prototype.poly.convex_hull().area();
    if !bed_area.is_finite() || poly_area <= 0.0 {
        warn!(bed_area, poly_area, "bed cannot be filled");
        return Ok(Vec::new());
    }

    let fixed_area: f64 = excludes
        .iter()
        .filter(|e| e.bed_idx == 0)
        .map(|e| e.poly.convex_hull().area())
        .sum::<f64>()
        + instances.len() as f64 * poly_area;
    let needed = ((bed_area - fixed_area) / poly_area).floor().max(0.0) as usize;

    let inflation = instances
        .iter()
        .map(|i| i.inflation)
        .fold(0.0, f64::max);
    let mut template = prototype.clone();
    template.bed_idx = UNARRANGED;
    template.priority = 0;
    template.inflation = inflation;
    template.setter = None;

    let mut work: Vec<ArrangePolygon> = instances
        .iter()
        .map(|i| {
            let mut copy = i.clone();
            copy.priority += 1;
            copy.inflation = inflation;
            copy.setter = None;
            copy
        })
        .collect();
    work.extend(std::iter::repeat(template).take(needed));

    let mut fill_sink = FillBedSink::new(sink);
    arrange(&mut work, excludes, bed, params, &mut fill_sink)?;

    let (existing, copies) = work.split_at(instances.len());
    let added: Vec<ArrangePolygon> = copies
        .iter()
        .filter(|c| c.bed_idx == 0)
        .cloned()
        .collect();
    if !added.is_empty() {
        for (dst, src) in instances.iter_mut().zip(existing) {
            if src.is_arranged() {
                dst.translation = src.translation;
                dst.rotation = src.rotation;
                dst.bed_idx = src.bed_idx;
            }
        }
    }
    info!(requested = needed, added = added.len(), "bed filled");
    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::NoProgress;
    use resina_math::{BoundingBox, Point2};
    use resina_mesh::{ExPolygon, Polygon};

    fn square_item(size: f64) -> ArrangePolygon {
        let bb = BoundingBox::new(Point2::origin(), Point2::new(size, size));
        ArrangePolygon::new(ExPolygon::new(Polygon::rectangle(&bb)))
    }

    #[test]
    fn test_sink_stops_on_overflowing_copy() {
        let mut inner = NoProgress;
        let mut sink = FillBedSink::new(&mut inner);
        let mut item = square_item(1.0).with_priority(1);
        item.bed_idx = 1;
        sink.on_packed(&item);
        assert!(!sink.stop_condition());
        item.priority = 0;
        sink.on_packed(&item);
        assert!(sink.is_stopped());
        assert!(sink.stop_condition());
    }

    #[test]
    fn test_fill_adds_copies_on_bed_zero() {
        let mut instances = vec![square_item(20.0)];
        let bed = ArrangeBed::Rectangle {
            bb: BoundingBox::new(Point2::origin(), Point2::new(100.0, 100.0)),
        };
        let params = ArrangeParams::default().with_min_obj_distance(2.0);
        let added = fill_bed(&mut instances, &[], &bed, &params, &mut NoProgress).unwrap();
        assert!(added.len() >= 4, "{}", added.len());
        assert!(added.iter().all(|c| c.bed_idx == 0 && c.priority == 0));
        assert_eq!(instances[0].bed_idx, 0);
    }

    #[test]
    fn test_infinite_bed_is_not_filled() {
        let mut instances = vec![square_item(20.0)];
        let added = fill_bed(
            &mut instances,
            &[],
            &ArrangeBed::default(),
            &ArrangeParams::default(),
            &mut NoProgress,
        )
        .unwrap();
        assert!(added.is_empty());
    }
}
