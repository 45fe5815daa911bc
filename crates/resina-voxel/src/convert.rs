//! Conversion between triangle meshes and signed distance grids.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use resina_math::{Point3, Transform, Vec3, EPSILON};
use resina_mesh::{AabbMesh, TriangleMesh};
use tracing::debug;

use crate::error::{Result, VoxelError};
use crate::grid::{grid_union, VoxelGrid, DEFAULT_BANDWIDTH};

/// Progress callback. Receives a percentage (or -1) and returns `true` to stop.
pub type StatusFn = Arc<dyn Fn(i32) -> bool + Send + Sync>;

/// Offsets of the sign-scan rays from the voxel rows, so the rays do not
/// graze edges of axis-aligned geometry.
const ROW_JITTER: [f64; 2] = [1.3e-4, 2.9e-4];

/// Parameters of [`mesh_to_grid`].
#[derive(Clone)]
pub struct MeshToGridParams {
    /// Placement applied to the mesh before voxelization.
    pub trafo: Transform,
    /// Voxels per world unit.
    pub voxel_scale: f64,
    /// Exterior narrow band (voxels).
    pub exterior_bandwidth: f32,
    /// Interior narrow band (voxels).
    pub interior_bandwidth: f32,
    /// Optional progress callback able to interrupt the conversion.
    pub statusfn: Option<StatusFn>,
}

impl Default for MeshToGridParams {
    fn default() -> Self {
        Self {
            trafo: Transform::identity(),
            voxel_scale: 1.0,
            exterior_bandwidth: DEFAULT_BANDWIDTH,
            interior_bandwidth: DEFAULT_BANDWIDTH,
            statusfn: None,
        }
    }
}

impl fmt::Debug for MeshToGridParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeshToGridParams")
            .field("trafo", &self.trafo)
            .field("voxel_scale", &self.voxel_scale)
            .field("exterior_bandwidth", &self.exterior_bandwidth)
            .field("interior_bandwidth", &self.interior_bandwidth)
            .field("statusfn", &self.statusfn.is_some())
            .finish()
    }
}

impl MeshToGridParams {
    /// Set the placement.
    pub fn with_trafo(mut self, trafo: Transform) -> Self {
        self.trafo = trafo;
        self
    }

    /// Set voxels per world unit.
    pub fn with_voxel_scale(mut self, scale: f64) -> Self {
        self.voxel_scale = scale;
        self
    }

    /// Set the exterior band width (voxels).
    pub fn with_exterior_bandwidth(mut self, width: f32) -> Self {
        self.exterior_bandwidth = width;
        self
    }

    /// Set the interior band width (voxels).
    pub fn with_interior_bandwidth(mut self, width: f32) -> Self {
        self.interior_bandwidth = width;
        self
    }

    /// Install a progress callback.
    pub fn with_statusfn(mut self, f: StatusFn) -> Self {
        self.statusfn = Some(f);
        self
    }

    /// Check that the scale and band widths are usable.
    pub fn validate(&self) -> Result<()> {
        if !(self.voxel_scale.is_finite() && self.voxel_scale > 0.0) {
            return Err(VoxelError::InvalidSettings(format!(
                "voxel_scale must be positive, got {}",
                self.voxel_scale
            )));
        }
        if self.exterior_bandwidth < 0.0 || self.interior_bandwidth < 0.0 {
            return Err(VoxelError::InvalidSettings(
                "band widths must not be negative".into(),
            ));
        }
        Ok(())
    }
}

struct Interrupter {
    statusfn: Option<StatusFn>,
    stop: AtomicBool,
}

impl Interrupter {
    fn new(statusfn: Option<StatusFn>) -> Self {
        Self {
            statusfn,
            stop: AtomicBool::new(false),
        }
    }

    fn poll(&self, percent: i32) -> bool {
        if self.stop.load(Ordering::Relaxed) {
            return true;
        }
        let stop = self.statusfn.as_ref().is_some_and(|f| f(percent));
        if stop {
            self.stop.store(true, Ordering::Relaxed);
        }
        stop
    }

    fn was_interrupted(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }
}

/// Voxelize `mesh` into a signed distance grid.
///
/// Connected components are voxelized one by one and unioned; components
/// enclosing less than [`EPSILON`] volume are skipped unless nothing else
/// remains. The grid stores distances in voxel units and records the voxel
/// scale as metadata.
pub fn mesh_to_grid(mesh: &TriangleMesh, params: &MeshToGridParams) -> Result<VoxelGrid> {
    params.validate()?;
    let s = params.voxel_scale;
    let trafo = Transform::scale(s, s, s).then(&params.trafo);
    let (ext, int) = (params.exterior_bandwidth, params.interior_bandwidth);

    let mut parts: Vec<TriangleMesh> = mesh
        .split()
        .into_iter()
        .filter(|m| m.volume() >= EPSILON)
        .collect();
    if parts.is_empty() {
        debug!("no solid component, voxelizing the mesh as a whole");
        parts.push(mesh.clone());
    }

    let interrupter = Interrupter::new(params.statusfn.clone());
    let mut grid: Option<VoxelGrid> = None;
    for part in &mut parts {
        part.transform(&trafo);
        let sub = voxelize(part, ext, int, &interrupter);
        if interrupter.was_interrupted() {
            return Err(VoxelError::Interrupted);
        }
        match grid.as_mut() {
            Some(g) => grid_union(g, &sub),
            None => grid = Some(sub),
        }
    }

    let mut grid = grid.unwrap_or_else(|| VoxelGrid::empty(ext, int));
    grid.index_scale = 1.0 / s;
    grid.set_voxel_scale_meta(s as f32);
    debug!(components = parts.len(), dims = ?grid.dims(), voxel_scale = s, "mesh voxelized");
    Ok(grid)
}

/// Signed distances of an index-space mesh, one z slice per task.
fn voxelize(mesh: &TriangleMesh, ext: f32, int: f32, interrupter: &Interrupter) -> VoxelGrid {
    if mesh.is_empty() {
        return VoxelGrid::empty(ext, int);
    }
    let bb = mesh.bounding_box();
    let margin = ext as f64 + 1.0;
    let lo = [0, 1, 2].map(|k| (bb.min[k] - margin).floor() as i64);
    let hi = [0, 1, 2].map(|k| (bb.max[k] + margin).ceil() as i64);
    let dims = [0, 1, 2].map(|k| (hi[k] - lo[k] + 1) as usize);

    let index = AabbMesh::new(mesh.clone());
    let mut grid = VoxelGrid::new(lo, dims, ext, int);
    let slice = dims[0] * dims[1];
    let done = AtomicUsize::new(0);

    grid.values
        .par_chunks_mut(slice)
        .enumerate()
        .for_each(|(kz, chunk)| {
            if interrupter.was_interrupted() {
                return;
            }
            let z = (lo[2] + kz as i64) as f64;
            for jy in 0..dims[1] {
                let y = (lo[1] + jy as i64) as f64;
                let crossings = row_crossings(&index, lo[0] as f64 - 1.0, y, z);
                for ix in 0..dims[0] {
                    let x = (lo[0] + ix as i64) as f64;
                    let inside = crossings.partition_point(|&c| c < x) % 2 == 1;
                    let d = index.squared_distance(&Point3::new(x, y, z)).sqrt() as f32;
                    chunk[jy * dims[0] + ix] = if inside { -d.min(int) } else { d.min(ext) };
                }
            }
            let n = done.fetch_add(1, Ordering::Relaxed) + 1;
            interrupter.poll((n * 100 / dims[2]) as i32);
        });
    grid
}

/// Sorted x coordinates where the row `(y, z)` crosses the surface.
fn row_crossings(index: &AabbMesh, x0: f64, y: f64, z: f64) -> Vec<f64> {
    let src = Point3::new(x0, y + ROW_JITTER[0], z + ROW_JITTER[1]);
    let mut out: Vec<f64> = Vec::new();
    for hit in index.query_ray_hits(&src, &Vec3::x()) {
        let x = x0 + hit.distance;
        if out.last().map_or(true, |&prev| x - prev > 1e-9) {
            out.push(x);
        }
    }
    out
}

/// Extract the `isovalue` level of `grid` as a closed triangle mesh.
///
/// Dual contouring without feature detection (surface nets): one vertex per
/// cell straddling the level, one quad per crossing voxel edge, each quad
/// fanned into two triangles. With `relax_disoriented` the vertices of quads
/// facing against the field gradient are smoothed towards their neighbours.
/// Adaptive simplification is not performed; `adaptivity` is accepted for
/// interface parity and only logged.
pub fn grid_to_mesh(
    grid: &VoxelGrid,
    isovalue: f64,
    adaptivity: f64,
    relax_disoriented: bool,
) -> TriangleMesh {
    let [nx, ny, nz] = grid.dims();
    if nx < 2 || ny < 2 || nz < 2 {
        return TriangleMesh::new();
    }
    if adaptivity > 0.0 {
        debug!(adaptivity, "adaptive simplification not available, meshing at full resolution");
    }
    let iso = isovalue as f32;
    let cdims = [nx - 1, ny - 1, nz - 1];
    let cell_at = |c: [usize; 3]| c[0] + cdims[0] * (c[1] + cdims[1] * c[2]);

    let cell_points: Vec<Option<Point3>> = (0..cdims[0] * cdims[1] * cdims[2])
        .into_par_iter()
        .map(|n| {
            let c = [n % cdims[0], (n / cdims[0]) % cdims[1], n / (cdims[0] * cdims[1])];
            cell_vertex(grid, c, iso)
        })
        .collect();

    let mut vertex_of = vec![u32::MAX; cell_points.len()];
    let mut vertices = Vec::new();
    for (n, p) in cell_points.iter().enumerate() {
        if let Some(p) = p {
            vertex_of[n] = vertices.len() as u32;
            vertices.push(*p);
        }
    }

    let value = |l: [usize; 3]| grid.values[grid.linear(l)];
    let mut quads: Vec<[u32; 4]> = Vec::new();
    for axis in 0..3 {
        let (u, v) = ((axis + 1) % 3, (axis + 2) % 3);
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    let p = [i, j, k];
                    if p[axis] + 1 >= grid.dims[axis] || p[u] == 0 || p[v] == 0 {
                        continue;
                    }
                    if p[u] >= cdims[u] || p[v] >= cdims[v] {
                        continue;
                    }
                    let mut q = p;
                    q[axis] += 1;
                    let (a_in, b_in) = (value(p) < iso, value(q) < iso);
                    if a_in == b_in {
                        continue;
                    }
                    let cell = |du: usize, dv: usize| {
                        let mut c = p;
                        c[u] -= du;
                        c[v] -= dv;
                        vertex_of[cell_at(c)]
                    };
                    let ring = [cell(1, 1), cell(0, 1), cell(0, 0), cell(1, 0)];
                    if ring.contains(&u32::MAX) {
                        continue;
                    }
                    quads.push(if a_in {
                        ring
                    } else {
                        [ring[3], ring[2], ring[1], ring[0]]
                    });
                }
            }
        }
    }

    if relax_disoriented {
        relax(grid, &mut vertices, &quads);
    }

    let origin = grid.origin();
    let scale = grid.index_scale();
    let vertices = vertices
        .into_iter()
        .map(|p| {
            Point3::new(
                p.x + origin[0] as f64,
                p.y + origin[1] as f64,
                p.z + origin[2] as f64,
            ) * scale
        })
        .collect();
    let indices = quads
        .iter()
        .flat_map(|q| [[q[0], q[1], q[2]], [q[0], q[2], q[3]]])
        .collect();
    TriangleMesh { vertices, indices }
}

/// Mean of the level crossings on the twelve edges of a cell, local coordinates.
fn cell_vertex(grid: &VoxelGrid, c: [usize; 3], iso: f32) -> Option<Point3> {
    let corner = |bits: usize| [c[0] + (bits & 1), c[1] + ((bits >> 1) & 1), c[2] + ((bits >> 2) & 1)];
    let mut sum = Vec3::zeros();
    let mut count = 0usize;
    for a in 0..8usize {
        for bit in [1usize, 2, 4] {
            if a & bit != 0 {
                continue;
            }
            let (pa, pb) = (corner(a), corner(a | bit));
            let va = grid.values[grid.linear(pa)];
            let vb = grid.values[grid.linear(pb)];
            if (va < iso) == (vb < iso) {
                continue;
            }
            let t = ((iso - va) / (vb - va)) as f64;
            let fa = Vec3::new(pa[0] as f64, pa[1] as f64, pa[2] as f64);
            let fb = Vec3::new(pb[0] as f64, pb[1] as f64, pb[2] as f64);
            sum += fa + (fb - fa) * t;
            count += 1;
        }
    }
    (count > 0).then(|| Point3::from(sum / count as f64))
}

fn relax(grid: &VoxelGrid, vertices: &mut [Point3], quads: &[[u32; 4]]) {
    let origin = grid.origin();
    let mut neighbours: Vec<Vec<u32>> = vec![Vec::new(); vertices.len()];
    let mut marked = vec![false; vertices.len()];
    for q in quads {
        for k in 0..4 {
            let (a, b) = (q[k], q[(k + 1) % 4]);
            neighbours[a as usize].push(b);
            neighbours[b as usize].push(a);
        }
        let [p0, p1, p2, p3] = q.map(|i| vertices[i as usize]);
        let normal = (p2 - p0).cross(&(p3 - p1));
        let centre = Point3::from((p0.coords + p1.coords + p2.coords + p3.coords) / 4.0);
        let global = Point3::new(
            centre.x + origin[0] as f64,
            centre.y + origin[1] as f64,
            centre.z + origin[2] as f64,
        );
        if normal.dot(&grid.gradient(&global)) < 0.0 {
            for &i in q {
                marked[i as usize] = true;
            }
        }
    }

    let snapshot = vertices.to_vec();
    let mut relaxed = 0usize;
    for (i, v) in vertices.iter_mut().enumerate() {
        if !marked[i] || neighbours[i].is_empty() {
            continue;
        }
        let sum: Vec3 = neighbours[i].iter().map(|&n| snapshot[n as usize].coords).sum();
        *v = Point3::from(sum / neighbours[i].len() as f64);
        relaxed += 1;
    }
    if relaxed > 0 {
        debug!(relaxed, "relaxed disoriented vertices");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use resina_mesh::primitives::{cube, sphere};

    #[test]
    fn test_cube_distances() {
        let mut mesh = cube(10.0, 10.0, 10.0);
        mesh.translate(&Vec3::new(0.5, 0.5, 0.5));
        let grid = mesh_to_grid(&mesh, &MeshToGridParams::default()).unwrap();
        assert_relative_eq!(grid.get([5, 5, 5]), -3.0);
        assert_relative_eq!(grid.get([2, 5, 5]), -1.5, epsilon = 1e-5);
        assert_relative_eq!(grid.get([0, 5, 5]), 0.5, epsilon = 1e-5);
        assert_relative_eq!(grid.get([-5, 5, 5]), 3.0);
        assert_eq!(grid.voxel_scale_meta(), Some(1.0));
    }

    #[test]
    fn test_components_are_unioned() {
        let mut mesh = cube(4.0, 4.0, 4.0);
        let mut other = cube(4.0, 4.0, 4.0);
        other.translate(&Vec3::new(10.0, 0.0, 0.0));
        mesh.merge(&other);
        let grid = mesh_to_grid(&mesh, &MeshToGridParams::default()).unwrap();
        assert!(grid.world_distance(&Point3::new(2.0, 2.0, 2.0)) < 0.0);
        assert!(grid.world_distance(&Point3::new(12.0, 2.0, 2.0)) < 0.0);
        assert!(grid.world_distance(&Point3::new(7.0, 2.0, 2.0)) > 0.0);
    }

    #[test]
    fn test_sphere_round_trip() {
        let mesh = sphere(5.0, 48);
        let params = MeshToGridParams::default().with_voxel_scale(2.0);
        let grid = mesh_to_grid(&mesh, &params).unwrap();
        let out = grid_to_mesh(&grid, 0.0, 0.0, false);
        assert!(out.is_closed());
        assert_relative_eq!(out.volume(), mesh.volume(), max_relative = 0.05);
        let bb = out.bounding_box();
        assert_relative_eq!(bb.max.z, 5.0, epsilon = 0.3);
    }

    #[test]
    fn test_relax_keeps_closed_surface() {
        let grid = mesh_to_grid(&cube(6.0, 6.0, 6.0), &MeshToGridParams::default()).unwrap();
        let out = grid_to_mesh(&grid, 0.0, 0.0, true);
        assert!(out.is_closed());
        assert!(out.volume() > 0.0);
    }

    #[test]
    fn test_interrupt() {
        let params = MeshToGridParams::default().with_statusfn(Arc::new(|_| true));
        let res = mesh_to_grid(&cube(5.0, 5.0, 5.0), &params);
        assert_eq!(res, Err(VoxelError::Interrupted));
    }

    #[test]
    fn test_empty_and_invalid() {
        let grid = mesh_to_grid(&TriangleMesh::new(), &MeshToGridParams::default()).unwrap();
        assert!(crate::grid::is_grid_empty(&grid));
        assert!(grid_to_mesh(&grid, 0.0, 0.0, false).is_empty());
        let bad = MeshToGridParams::default().with_voxel_scale(0.0);
        assert!(matches!(
            mesh_to_grid(&cube(1.0, 1.0, 1.0), &bad),
            Err(VoxelError::InvalidSettings(_))
        ));
    }
}
