//! Level set rebuilding and narrow band dilation by fast sweeping.

use tracing::debug;

use crate::grid::{get_voxel_scale, VoxelGrid, DEFAULT_BANDWIDTH};

const SWEEP_ROUNDS: usize = 2;

/// Widen the narrow band by `exterior` and `interior` world units.
///
/// Distances inside the widened band are recomputed from the zero level.
/// Metadata is kept.
pub fn dilate_grid(grid: &VoxelGrid, exterior: f32, interior: f32) -> VoxelGrid {
    let scale = get_voxel_scale(grid);
    let grow_ext = (exterior * scale).max(0.0);
    let grow_int = (interior * scale).max(0.0);
    if grow_ext == 0.0 && grow_int == 0.0 {
        return grid.clone();
    }

    let mut out = grid.padded(grow_ext.ceil() as usize);
    let ext = grid.exterior + grow_ext;
    let int = grid.interior + grow_int;
    rebuild(&mut out, 0.0, ext, int);
    debug!(exterior = ext, interior = int, dims = ?out.dims, "narrow band dilated");
    out
}

/// Rebuild the level set so the `iso` level becomes the zero level.
///
/// `iso` and both band widths are in voxel units.
pub fn redistance_grid(grid: &VoxelGrid, iso: f32, exterior: f32, interior: f32) -> VoxelGrid {
    let pad = (iso + exterior - grid.exterior).max(0.0).ceil() as usize;
    let mut out = grid.padded(pad);
    rebuild(&mut out, iso, exterior, interior);
    out
}

/// [`redistance_grid`] with the default band widths.
pub fn redistance_grid_iso(grid: &VoxelGrid, iso: f32) -> VoxelGrid {
    redistance_grid(grid, iso, DEFAULT_BANDWIDTH, DEFAULT_BANDWIDTH)
}

/// Recompute `|distance|` to the `iso` crossing for every voxel, then
/// restore the sign and clamp to the new bands.
pub(crate) fn rebuild(grid: &mut VoxelGrid, iso: f32, exterior: f32, interior: f32) {
    let [nx, ny, nz] = grid.dims;
    let phi: Vec<f32> = grid.values.iter().map(|v| v - iso).collect();
    let mut dist = vec![f32::INFINITY; phi.len()];
    let mut frozen = vec![false; phi.len()];

    let at = |i: usize, j: usize, k: usize| i + nx * (j + ny * k);

    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let n = at(i, j, k);
                let p = phi[n];
                for m in neighbours(i, j, k, [nx, ny, nz]).into_iter().flatten() {
                    let q = phi[at(m[0], m[1], m[2])];
                    if (p < 0.0) != (q < 0.0) {
                        let t = p.abs() / (p - q).abs();
                        dist[n] = dist[n].min(t);
                        frozen[n] = true;
                    }
                }
            }
        }
    }

    for _ in 0..SWEEP_ROUNDS {
        for dir in 0..8 {
            for kk in 0..nz {
                let k = if dir & 4 != 0 { nz - 1 - kk } else { kk };
                for jj in 0..ny {
                    let j = if dir & 2 != 0 { ny - 1 - jj } else { jj };
                    for ii in 0..nx {
                        let i = if dir & 1 != 0 { nx - 1 - ii } else { ii };
                        let n = at(i, j, k);
                        if frozen[n] {
                            continue;
                        }
                        let axis_min = |lo: Option<usize>, hi: Option<usize>| {
                            let a = lo.map_or(f32::INFINITY, |m| dist[m]);
                            let b = hi.map_or(f32::INFINITY, |m| dist[m]);
                            a.min(b)
                        };
                        let a = axis_min(
                            i.checked_sub(1).map(|i| at(i, j, k)),
                            (i + 1 < nx).then(|| at(i + 1, j, k)),
                        );
                        let b = axis_min(
                            j.checked_sub(1).map(|j| at(i, j, k)),
                            (j + 1 < ny).then(|| at(i, j + 1, k)),
                        );
                        let c = axis_min(
                            k.checked_sub(1).map(|k| at(i, j, k)),
                            (k + 1 < nz).then(|| at(i, j, k + 1)),
                        );
                        let d = eikonal(a, b, c);
                        if d < dist[n] {
                            dist[n] = d;
                        }
                    }
                }
            }
        }
    }

    for (n, v) in grid.values.iter_mut().enumerate() {
        *v = if phi[n] < 0.0 {
            -dist[n].min(interior)
        } else {
            dist[n].min(exterior)
        };
    }
    grid.exterior = exterior;
    grid.interior = interior;
}

fn neighbours(i: usize, j: usize, k: usize, dims: [usize; 3]) -> [Option<[usize; 3]>; 6] {
    [
        i.checked_sub(1).map(|i| [i, j, k]),
        (i + 1 < dims[0]).then_some([i + 1, j, k]),
        j.checked_sub(1).map(|j| [i, j, k]),
        (j + 1 < dims[1]).then_some([i, j + 1, k]),
        k.checked_sub(1).map(|k| [i, j, k]),
        (k + 1 < dims[2]).then_some([i, j, k + 1]),
    ]
}

/// Godunov upwind solution of `|∇d| = 1` on a unit grid.
fn eikonal(a: f32, b: f32, c: f32) -> f32 {
    let mut s = [a, b, c];
    s.sort_by(f32::total_cmp);
    let [a, b, c] = s;
    if a.is_infinite() {
        return f32::INFINITY;
    }
    let x = a + 1.0;
    if x <= b {
        return x;
    }
    let x = 0.5 * (a + b + (2.0 - (a - b) * (a - b)).max(0.0).sqrt());
    if x <= c {
        return x;
    }
    let sum = a + b + c;
    let disc = sum * sum - 3.0 * (a * a + b * b + c * c - 1.0);
    (sum + disc.max(0.0).sqrt()) / 3.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Cube `|x|, |y|, |z| < 4` with the band clamped to one voxel.
    fn box_grid() -> VoxelGrid {
        let mut g = VoxelGrid::new([-8; 3], [17; 3], 1.0, 1.0);
        for k in 0..17 {
            for j in 0..17 {
                for i in 0..17 {
                    let p = [i, j, k].map(|v| (v as f32 - 8.0).abs() - 4.0);
                    let outside = p.map(|v| v.max(0.0));
                    let inside = p[0].max(p[1]).max(p[2]).min(0.0);
                    let d = (outside[0].powi(2) + outside[1].powi(2) + outside[2].powi(2)).sqrt() + inside;
                    let n = g.linear([i, j, k]);
                    g.values[n] = d.clamp(-1.0, 1.0);
                }
            }
        }
        g
    }

    #[test]
    fn test_eikonal_cases() {
        assert_relative_eq!(eikonal(0.0, f32::INFINITY, f32::INFINITY), 1.0);
        assert_relative_eq!(eikonal(1.0, 1.0, f32::INFINITY), 1.0 + 0.5f32.sqrt(), epsilon = 1e-6);
        assert!(eikonal(f32::INFINITY, f32::INFINITY, f32::INFINITY).is_infinite());
    }

    #[test]
    fn test_dilate_recovers_far_distances() {
        let g = box_grid();
        assert_relative_eq!(g.get([6, 0, 0]), 1.0);
        let wide = dilate_grid(&g, 4.0, 3.0);
        assert_relative_eq!(wide.exterior_band(), 5.0);
        assert_relative_eq!(wide.interior_band(), 4.0);
        assert_relative_eq!(wide.get([6, 0, 0]), 2.0, epsilon = 1e-5);
        assert_relative_eq!(wide.get([-2, 0, 0]), -2.0, epsilon = 1e-5);
        assert_relative_eq!(wide.get([0, 0, 0]), -4.0, epsilon = 1e-5);
    }

    #[test]
    fn test_redistance_moves_zero_level() {
        let wide = dilate_grid(&box_grid(), 3.0, 3.0);
        let shifted = redistance_grid(&wide, -2.0, 2.0, 2.0);
        assert_relative_eq!(shifted.get([-2, 0, 0]), 0.0, epsilon = 1e-5);
        assert_relative_eq!(shifted.get([-1, 0, 0]), -1.0, epsilon = 1e-5);
        assert_relative_eq!(shifted.get([-3, 0, 0]), 1.0, epsilon = 1e-5);
        assert_relative_eq!(shifted.get([0, 0, 0]), -2.0, epsilon = 1e-5);
    }

    #[test]
    fn test_noop_dilate_keeps_grid() {
        let g = box_grid();
        assert_eq!(dilate_grid(&g, 0.0, 0.0), g);
    }
}
