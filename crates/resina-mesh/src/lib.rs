#![warn(missing_docs)]

//! Mesh and polygon primitives for the resina SLA core.
//!
//! Provides the indexed [`TriangleMesh`], an AABB-tree accelerated
//! [`AabbMesh`] for ray casting and distance queries, 2D polygons with
//! holes, polygon clipping, and slicing of meshes into layers.

pub mod clipper;
pub mod error;
pub mod index;
pub mod mesh;
pub mod polygon;
pub mod primitives;
pub mod slice;
pub mod triangulate;

pub use error::{MeshError, Result};
pub use index::{AabbMesh, Closest, Hit};
pub use mesh::TriangleMesh;
pub use polygon::{ExPolygon, ExPolygons, Polygon};
pub use slice::{slice_mesh, slice_mesh_solid};
