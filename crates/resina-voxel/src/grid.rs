//! Dense narrow-band signed distance grid.
//!
//! Values are stored in voxel units and clamped to `[-interior, exterior]`.
//! Voxel `(i, j, k)` sits at index-space position `(i, j, k)`; world
//! coordinates are index coordinates times [`VoxelGrid::index_scale`].
//! Anything outside the stored block reads as the exterior background.

use rayon::prelude::*;
use resina_math::{Aabb3, Point3};

/// Narrow band half width used when none is given (voxels).
pub const DEFAULT_BANDWIDTH: f32 = 3.0;

/// Signed distance volume. Negative inside.
#[derive(Debug, Clone, PartialEq)]
pub struct VoxelGrid {
    pub(crate) origin: [i64; 3],
    pub(crate) dims: [usize; 3],
    pub(crate) values: Vec<f32>,
    pub(crate) exterior: f32,
    pub(crate) interior: f32,
    pub(crate) index_scale: f64,
    pub(crate) voxel_scale: Option<f32>,
}

impl VoxelGrid {
    /// A block of `dims` voxels starting at index `origin`, all set to the
    /// exterior background.
    pub fn new(origin: [i64; 3], dims: [usize; 3], exterior: f32, interior: f32) -> Self {
        Self {
            origin,
            dims,
            values: vec![exterior; dims[0] * dims[1] * dims[2]],
            exterior,
            interior,
            index_scale: 1.0,
            voxel_scale: None,
        }
    }

    /// A grid without voxels.
    pub fn empty(exterior: f32, interior: f32) -> Self {
        Self::new([0; 3], [0; 3], exterior, interior)
    }

    /// Number of stored voxels along each axis.
    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    /// Index of the first stored voxel.
    pub fn origin(&self) -> [i64; 3] {
        self.origin
    }

    /// Exterior narrow band width, also the background value (voxels).
    pub fn exterior_band(&self) -> f32 {
        self.exterior
    }

    /// Interior narrow band width (voxels).
    pub fn interior_band(&self) -> f32 {
        self.interior
    }

    /// World units per index unit.
    pub fn index_scale(&self) -> f64 {
        self.index_scale
    }

    /// Voxels per world unit recorded when the grid was built.
    pub fn voxel_scale_meta(&self) -> Option<f32> {
        self.voxel_scale
    }

    /// Record the voxels-per-world-unit metadata.
    pub fn set_voxel_scale_meta(&mut self, scale: f32) {
        self.voxel_scale = Some(scale);
    }

    /// Value at a global voxel index.
    pub fn get(&self, idx: [i64; 3]) -> f32 {
        match self.local(idx) {
            Some(l) => self.values[self.linear(l)],
            None => self.exterior,
        }
    }

    pub(crate) fn local(&self, idx: [i64; 3]) -> Option<[usize; 3]> {
        let mut l = [0usize; 3];
        for k in 0..3 {
            let v = idx[k] - self.origin[k];
            if v < 0 || v as usize >= self.dims[k] {
                return None;
            }
            l[k] = v as usize;
        }
        Some(l)
    }

    pub(crate) fn linear(&self, l: [usize; 3]) -> usize {
        l[0] + self.dims[0] * (l[1] + self.dims[1] * l[2])
    }

    /// World position of a global voxel index.
    pub fn index_to_world(&self, idx: [i64; 3]) -> Point3 {
        Point3::new(idx[0] as f64, idx[1] as f64, idx[2] as f64) * self.index_scale
    }

    /// Fractional index-space position of a world point.
    pub fn world_to_index(&self, p: &Point3) -> Point3 {
        p / self.index_scale
    }

    /// Trilinear interpolation at an index-space position.
    pub fn sample(&self, p: &Point3) -> f32 {
        let base = [p.x.floor(), p.y.floor(), p.z.floor()];
        let t = [p.x - base[0], p.y - base[1], p.z - base[2]];
        let b = [base[0] as i64, base[1] as i64, base[2] as i64];
        let mut acc = 0.0f64;
        for c in 0..8 {
            let off = [c & 1, (c >> 1) & 1, (c >> 2) & 1];
            let mut w = 1.0;
            for k in 0..3 {
                w *= if off[k] == 1 { t[k] } else { 1.0 - t[k] };
            }
            if w == 0.0 {
                continue;
            }
            let idx = [b[0] + off[0] as i64, b[1] + off[1] as i64, b[2] + off[2] as i64];
            acc += w * self.get(idx) as f64;
        }
        acc as f32
    }

    /// Distance from a world point to the zero level, in world units.
    pub fn world_distance(&self, p: &Point3) -> f64 {
        self.sample(&self.world_to_index(p)) as f64 * self.index_scale
    }

    /// Central-difference gradient at an index-space position.
    pub fn gradient(&self, p: &Point3) -> resina_math::Vec3 {
        let mut g = resina_math::Vec3::zeros();
        for k in 0..3 {
            let mut hi = *p;
            let mut lo = *p;
            hi[k] += 0.5;
            lo[k] -= 0.5;
            g[k] = (self.sample(&hi) - self.sample(&lo)) as f64;
        }
        g
    }

    /// World-space box covering the stored voxels.
    pub fn world_bounds(&self) -> Aabb3 {
        if self.values.is_empty() {
            return Aabb3::empty();
        }
        let last = [
            self.origin[0] + self.dims[0] as i64 - 1,
            self.origin[1] + self.dims[1] as i64 - 1,
            self.origin[2] + self.dims[2] as i64 - 1,
        ];
        Aabb3::new(self.index_to_world(self.origin), self.index_to_world(last))
    }

    /// Copy into a block with a different extent; new voxels read as background.
    pub(crate) fn resized(&self, origin: [i64; 3], dims: [usize; 3]) -> VoxelGrid {
        let mut out = VoxelGrid {
            values: vec![self.exterior; dims[0] * dims[1] * dims[2]],
            origin,
            dims,
            ..self.clone_meta()
        };
        let (nx, ny) = (dims[0], dims[1]);
        out.values.par_iter_mut().enumerate().for_each(|(n, v)| {
            let idx = [
                origin[0] + (n % nx) as i64,
                origin[1] + ((n / nx) % ny) as i64,
                origin[2] + (n / (nx * ny)) as i64,
            ];
            *v = self.get(idx);
        });
        out
    }

    /// Grow the block by `n` voxels on every side.
    pub(crate) fn padded(&self, n: usize) -> VoxelGrid {
        if n == 0 || self.values.is_empty() {
            return self.clone();
        }
        let origin = self.origin.map(|o| o - n as i64);
        let dims = self.dims.map(|d| d + 2 * n);
        self.resized(origin, dims)
    }

    fn clone_meta(&self) -> VoxelGrid {
        VoxelGrid {
            origin: self.origin,
            dims: [0; 3],
            values: Vec::new(),
            exterior: self.exterior,
            interior: self.interior,
            index_scale: self.index_scale,
            voxel_scale: self.voxel_scale,
        }
    }
}

/// Raw stored value at the voxel nearest to world point `p`.
pub fn get_distance_raw(p: &Point3, grid: &VoxelGrid) -> f64 {
    let q = grid.world_to_index(p);
    let idx = [q.x.round() as i64, q.y.round() as i64, q.z.round() as i64];
    grid.get(idx) as f64
}

/// Voxels per world unit, 1 when the grid carries no metadata.
pub fn get_voxel_scale(grid: &VoxelGrid) -> f32 {
    grid.voxel_scale.unwrap_or(1.0)
}

/// Scale the index-to-world mapping. Stored values are unchanged.
pub fn rescale_grid(grid: &mut VoxelGrid, scale: f64) {
    grid.index_scale *= scale;
}

/// No voxel lies inside the exterior band.
pub fn is_grid_empty(grid: &VoxelGrid) -> bool {
    grid.values.iter().all(|&v| v >= grid.exterior)
}

/// `grid ∪= arg`. The block grows to cover `arg`.
pub fn grid_union(grid: &mut VoxelGrid, arg: &VoxelGrid) {
    if is_grid_empty(arg) {
        return;
    }
    grow_to_cover(grid, arg);
    combine(grid, arg, f32::min);
}

/// `grid −= arg`.
pub fn grid_difference(grid: &mut VoxelGrid, arg: &VoxelGrid) {
    combine(grid, arg, |a, b| a.max(-b));
}

/// `grid ∩= arg`.
pub fn grid_intersection(grid: &mut VoxelGrid, arg: &VoxelGrid) {
    combine(grid, arg, f32::max);
}

fn grow_to_cover(grid: &mut VoxelGrid, arg: &VoxelGrid) {
    let bb = arg.world_bounds();
    let lo = grid.world_to_index(&bb.min);
    let hi = grid.world_to_index(&bb.max);
    let mut first = [lo.x.floor() as i64, lo.y.floor() as i64, lo.z.floor() as i64];
    let mut last = [hi.x.ceil() as i64, hi.y.ceil() as i64, hi.z.ceil() as i64];
    if !grid.values.is_empty() {
        for k in 0..3 {
            first[k] = first[k].min(grid.origin[k]);
            last[k] = last[k].max(grid.origin[k] + grid.dims[k] as i64 - 1);
        }
    }
    let dims = [0, 1, 2].map(|k| (last[k] - first[k] + 1) as usize);
    if first != grid.origin || dims != grid.dims {
        *grid = grid.resized(first, dims);
    }
}

fn combine(grid: &mut VoxelGrid, arg: &VoxelGrid, op: impl Fn(f32, f32) -> f32 + Sync) {
    let origin = grid.origin;
    let [nx, ny, _] = grid.dims;
    let scale = grid.index_scale;
    let (lo, hi) = (grid.interior, grid.exterior);
    grid.values.par_iter_mut().enumerate().for_each(|(n, v)| {
        let world = Point3::new(
            (origin[0] + (n % nx) as i64) as f64,
            (origin[1] + ((n / nx) % ny) as i64) as f64,
            (origin[2] + (n / (nx * ny)) as i64) as f64,
        ) * scale;
        let b = arg.sample(&arg.world_to_index(&world));
        *v = op(*v, b).clamp(-lo, hi);
    });
}
