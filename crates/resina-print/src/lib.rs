#![warn(missing_docs)]

//! Staged SLA print pipeline.
//!
//! A [`Print`] is reconciled with a [`Model`] and a [`FullPrintConfig`]
//! through [`Print::apply`], which invalidates exactly the steps whose
//! inputs changed. [`Print::process`] then runs the missing steps: per
//! object assembly, hollowing, hole drilling, slicing, support points,
//! support tree, pad and support slicing, followed by merging all objects
//! into printable layers and rasterizing them. Processing can be canceled
//! at any point; completed steps keep their output.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use resina_mesh::primitives::cube;
//! use resina_print::{FullPrintConfig, JobControl, Model, ModelObject, Print, SimpleJob};
//!
//! let mut model = Model::new();
//! model.add_object(ModelObject::new("cube", cube(10.0, 10.0, 10.0)));
//!
//! let mut print = Print::new();
//! print.apply(&model, &FullPrintConfig::default()).unwrap();
//! print.validate().unwrap();
//! let job: Arc<dyn JobControl> = Arc::new(SimpleJob::new());
//! print.process(&job).unwrap();
//! print.export(std::path::Path::new("cube.sl1")).unwrap();
//! ```

pub mod archive;
pub mod arrange;
pub mod config;
pub mod error;
pub mod job;
pub mod model;
pub mod object;
pub mod print;
pub mod raster;
pub mod step;
mod steps;
pub mod support_points;

pub use archive::{Archiver, RawArchiver, Sl1Archiver};
pub use arrange::arrange_objects;
pub use config::{
    FullPrintConfig, SlaMaterialConfig, SlaPrintConfig, SlaPrintObjectConfig, SlaPrinterConfig,
};
pub use error::{PrintError, Result};
pub use job::{CancelToken, JobControl, SimpleJob};
pub use model::{DrainHole, Model, ModelInstance, ModelObject, ModelVolume, ObjectId, PointsStatus, VolumeType};
pub use object::{PrintInstance, PrintObject, SliceIndex, SliceRecord};
pub use print::{ApplyStatus, Print, PrintLayer, PrintStatistics};
pub use raster::{rasterize, Raster, RasterSettings};
pub use step::{ObjectStep, PrintState, PrintStep, Step, StepStatus};
