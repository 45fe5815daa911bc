#![warn(missing_docs)]

//! 2D arrangement of print outlines for the resina SLA core.
//!
//! Items are convex-hull footprints packed onto a bed ([`ArrangeBed`]).
//! Whatever does not fit the physical bed spills onto virtual copies of it
//! at increasing bed indices; items that fit nowhere stay [`UNARRANGED`].
//!
//! ```
//! use resina_arrange::{arrange, to_arrange_bed, ArrangeParams, ArrangePolygon, NoProgress};
//! use resina_math::{BoundingBox, Point2};
//! use resina_mesh::{ExPolygon, Polygon};
//!
//! let bed = to_arrange_bed(&BoundingBox::new(Point2::origin(), Point2::new(100.0, 100.0)).corners());
//! let square = ExPolygon::new(Polygon::rectangle(&BoundingBox::new(
//!     Point2::origin(),
//!     Point2::new(10.0, 10.0),
//! )));
//! let mut items = vec![ArrangePolygon::new(square.clone()), ArrangePolygon::new(square)];
//! arrange(&mut items, &[], &bed, &ArrangeParams::default(), &mut NoProgress).unwrap();
//! assert!(items.iter().all(|i| i.bed_idx == 0));
//! ```

pub mod bed;
pub mod error;
pub mod fill;
pub mod item;
pub mod nfp;
pub mod pack;
pub mod params;

pub use bed::{to_arrange_bed, ArrangeBed, Pivots, LOGICAL_BED_GAP};
pub use error::{ArrangeError, Result};
pub use fill::{fill_bed, FillBedSink};
pub use item::{ArrangePolygon, ArrangeSetter, UNARRANGED};
pub use pack::arrange;
pub use params::{ArrangeParams, NoProgress, ProgressSink};
