#![warn(missing_docs)]

//! Support trees and pads for resin printing.
//!
//! Given a model mesh and the points that need support, a synthesizer
//! places pinheads, routes them to the ground or onto the model through
//! pillars, bridges and junctions, and merges everything into one mesh.
//! The pad is a plate under the tree that can also wrap the model when it
//! sits at zero elevation.
//!
//! # Example
//!
//! ```no_run
//! use resina_math::Point3;
//! use resina_mesh::primitives::cube;
//! use resina_support::{create_support_tree, JobController, SupportPoint, SupportTreeConfig, SupportableMesh};
//!
//! let mesh = cube(20.0, 20.0, 2.0);
//! let pts = vec![SupportPoint::new(Point3::new(10.0, 10.0, 0.0), 0.4)];
//! let sm = SupportableMesh::new(mesh, pts, SupportTreeConfig::default());
//! let tree = create_support_tree(&sm, &JobController::new()).unwrap();
//! println!("{} support triangles", tree.num_triangles());
//! ```

pub mod branching;
pub mod builder;
pub mod config;
pub mod ctl;
pub mod default_tree;
pub mod error;
pub mod optimize;
pub mod pad;
pub mod point;
pub mod primitives;
pub mod routing;
pub mod tree;

pub use builder::{SupportTreeBuilder, DEFAULT_MESH_STEPS};
pub use config::{EmbedObject, PadConfig, PillarConnectionMode, SupportTreeConfig, SupportTreeType};
pub use ctl::JobController;
pub use error::{Result, SupportError};
pub use pad::{create_pad, validate_pad, PAD_SAMPLING_LH};
pub use point::{ground_level, SupportPoint, SupportableMesh};
pub use tree::{create_support_tree, slice};
