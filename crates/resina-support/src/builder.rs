//! Accumulator of support primitives with a memoized merged mesh.

use std::sync::{Mutex, MutexGuard, PoisonError};

use rayon::prelude::*;
use resina_math::{Point3, Vec3, MERGE_TOLERANCE};
use resina_mesh::TriangleMesh;
use tracing::debug;

use crate::ctl::JobController;
use crate::error::{Result, SupportError};
use crate::primitives::{
    Anchor, Bridge, DiffBridge, Head, Junction, Pedestal, Pillar, SupportPrimitive, ID_UNSET,
};

/// Segments around round features of the merged mesh.
pub const DEFAULT_MESH_STEPS: usize = 45;

/// Merged mesh remembered until the next mutation.
#[derive(Debug, Clone, Default)]
pub struct MeshCache {
    mesh: TriangleMesh,
    valid: bool,
}

impl MeshCache {
    /// The cached mesh, if still current.
    pub fn get(&self) -> Option<&TriangleMesh> {
        self.valid.then_some(&self.mesh)
    }

    /// Remember `mesh` as current.
    pub fn store(&mut self, mesh: TriangleMesh) {
        self.mesh = mesh;
        self.valid = true;
    }

    /// Mark the cached mesh stale.
    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    /// Whether the cached mesh is current.
    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

#[derive(Debug, Default)]
struct Primitives {
    heads: Vec<Head>,
    head_indices: Vec<Option<usize>>,
    pillars: Vec<Pillar>,
    junctions: Vec<Junction>,
    bridges: Vec<Bridge>,
    crossbridges: Vec<Bridge>,
    diffbridges: Vec<DiffBridge>,
    pedestals: Vec<Pedestal>,
    anchors: Vec<Anchor>,
}

impl Primitives {
    fn head_mut(&mut self, id: usize) -> Option<&mut Head> {
        let idx = (*self.head_indices.get(id)?)?;
        self.heads.get_mut(idx)
    }

    fn pillar_mut(&mut self, id: i64) -> Option<&mut Pillar> {
        usize::try_from(id).ok().and_then(|i| self.pillars.get_mut(i))
    }
}

#[derive(Debug, Default)]
struct BuilderState {
    prims: Primitives,
    cache: MeshCache,
    model_height: f64,
    finalized: bool,
}

/// Collects heads, pillars, bridges and friends while a tree grows.
///
/// All methods take `&self`; the collections sit behind a mutex so parallel
/// tasks may add primitives. Any mutation invalidates the merged mesh.
/// After [`merge_and_cleanup`](Self::merge_and_cleanup) only the mesh
/// remains and further mutations fail with [`SupportError::Finalized`].
#[derive(Debug, Default)]
pub struct SupportTreeBuilder {
    state: Mutex<BuilderState>,
    ctl: JobController,
}

fn to_id(idx: usize) -> i64 {
    i64::try_from(idx).unwrap_or(i64::MAX)
}

impl SupportTreeBuilder {
    /// An empty builder polling `ctl` while meshing.
    pub fn new(ctl: JobController) -> Self {
        Self {
            state: Mutex::default(),
            ctl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BuilderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut Primitives) -> R) -> Result<R> {
        let mut state = self.lock();
        if state.finalized {
            return Err(SupportError::Finalized);
        }
        state.cache.invalidate();
        Ok(f(&mut state.prims))
    }

    /// Add a head for support point `id`.
    pub fn add_head(&self, id: usize, mut head: Head) -> Result<()> {
        self.mutate(|p| {
            head.id = to_id(id);
            if id >= p.head_indices.len() {
                p.head_indices.resize(id + 1, None);
            }
            p.head_indices[id] = Some(p.heads.len());
            p.heads.push(head);
        })
    }

    /// Hang a pillar of `length` from the junction point of head `headid`.
    ///
    /// Returns the pillar id, or [`ID_UNSET`] when there is no such head.
    pub fn add_pillar_from_head(&self, headid: usize, length: f64) -> Result<i64> {
        self.mutate(|p| {
            let pid = to_id(p.pillars.len());
            let Some(head) = p.head_mut(headid) else {
                return ID_UNSET;
            };
            let endpt = head.junction_point() - Vec3::new(0.0, 0.0, length);
            let r = head.r_back_mm;
            head.pillar_id = pid;
            let mut pillar = Pillar::new(endpt, length, r, r);
            pillar.id = pid;
            pillar.starts_from_head = true;
            pillar.start_junction_id = to_id(headid);
            p.pillars.push(pillar);
            pid
        })
    }

    /// Add a free standing pillar of `height` above `endpt`.
    pub fn add_pillar(&self, endpt: Point3, height: f64, r_start: f64, r_end: f64) -> Result<i64> {
        self.mutate(|p| {
            let mut pillar = Pillar::new(endpt, height, r_start, r_end);
            pillar.id = to_id(p.pillars.len());
            p.pillars.push(pillar);
            to_id(p.pillars.len() - 1)
        })
    }

    /// Put a base cone under pillar `pid`, never taller than the pillar.
    pub fn add_pillar_base(&self, pid: i64, base_height: f64, base_radius: f64) -> Result<()> {
        self.mutate(|p| {
            let Some(pillar) = p.pillar_mut(pid) else {
                return;
            };
            let mut base = Pedestal::new(
                pillar.endpt,
                base_height.min(pillar.height),
                base_radius.max(pillar.r_start),
                pillar.r_start,
            );
            base.id = to_id(p.pedestals.len());
            p.pedestals.push(base);
        })
    }

    /// Add a junction ball.
    pub fn add_junction(&self, pos: Point3, r: f64) -> Result<i64> {
        self.mutate(|p| {
            let mut j = Junction::new(pos, r);
            j.id = to_id(p.junctions.len());
            p.junctions.push(j);
            to_id(p.junctions.len() - 1)
        })
    }

    /// Add a bridge of radius `r`.
    pub fn add_bridge(&self, startp: Point3, endp: Point3, r: f64) -> Result<i64> {
        self.mutate(|p| {
            let mut br = Bridge::new(startp, endp, r);
            br.id = to_id(p.bridges.len());
            p.bridges.push(br);
            to_id(p.bridges.len() - 1)
        })
    }

    /// Bridge from the junction point of head `headid` to `endp`.
    pub fn add_head_bridge(&self, headid: usize, endp: Point3) -> Result<i64> {
        self.mutate(|p| {
            let bid = to_id(p.bridges.len());
            let Some(head) = p.head_mut(headid) else {
                return ID_UNSET;
            };
            head.bridge_id = bid;
            let mut br = Bridge::new(head.junction_point(), endp, head.r_back_mm);
            br.id = bid;
            p.bridges.push(br);
            bid
        })
    }

    /// Add a cross link between pillars.
    pub fn add_crossbridge(&self, startp: Point3, endp: Point3, r: f64) -> Result<i64> {
        self.mutate(|p| {
            let mut br = Bridge::new(startp, endp, r);
            br.id = to_id(p.crossbridges.len());
            p.crossbridges.push(br);
            to_id(p.crossbridges.len() - 1)
        })
    }

    /// Add a tapered bridge.
    pub fn add_diffbridge(&self, startp: Point3, endp: Point3, r: f64, end_r: f64) -> Result<i64> {
        self.mutate(|p| {
            let mut br = DiffBridge::new(startp, endp, r, end_r);
            br.id = to_id(p.diffbridges.len());
            p.diffbridges.push(br);
            to_id(p.diffbridges.len() - 1)
        })
    }

    /// Add a head anchoring a branch on the model.
    pub fn add_anchor(&self, mut anchor: Anchor) -> Result<i64> {
        self.mutate(|p| {
            anchor.id = to_id(p.anchors.len());
            p.anchors.push(anchor);
            to_id(p.anchors.len() - 1)
        })
    }

    /// Count a side bridge on pillar `pid`.
    pub fn increment_bridges(&self, pid: i64) -> Result<()> {
        self.mutate(|p| {
            if let Some(pillar) = p.pillar_mut(pid) {
                pillar.bridges += 1;
            }
        })
    }

    /// Count a cross link on pillar `pid`.
    pub fn increment_links(&self, pid: i64) -> Result<()> {
        self.mutate(|p| {
            if let Some(pillar) = p.pillar_mut(pid) {
                pillar.links += 1;
            }
        })
    }

    /// Drop the head of support point `id` from the tree.
    pub fn invalidate_head(&self, id: usize) -> Result<()> {
        self.mutate(|p| {
            if let Some(head) = p.head_mut(id) {
                head.invalidate();
            }
        })
    }

    /// Copy of the head of support point `id`.
    pub fn head(&self, id: usize) -> Option<Head> {
        let state = self.lock();
        let idx = (*state.prims.head_indices.get(id)?)?;
        state.prims.heads.get(idx).cloned()
    }

    /// Copy of pillar `id`.
    pub fn pillar(&self, id: i64) -> Option<Pillar> {
        let state = self.lock();
        usize::try_from(id)
            .ok()
            .and_then(|i| state.prims.pillars.get(i))
            .cloned()
    }

    /// Copies of all heads, valid or not.
    pub fn heads(&self) -> Vec<Head> {
        self.lock().prims.heads.clone()
    }

    /// Copies of all pillars.
    pub fn pillars(&self) -> Vec<Pillar> {
        self.lock().prims.pillars.clone()
    }

    /// Copies of all cross links.
    pub fn crossbridges(&self) -> Vec<Bridge> {
        self.lock().prims.crossbridges.clone()
    }

    /// Copies of all pillar bases.
    pub fn pedestals(&self) -> Vec<Pedestal> {
        self.lock().prims.pedestals.clone()
    }

    /// Copies of all anchors.
    pub fn anchors(&self) -> Vec<Anchor> {
        self.lock().prims.anchors.clone()
    }

    /// Height of the last merged mesh.
    pub fn model_height(&self) -> f64 {
        self.lock().model_height
    }

    /// Whether only the merged mesh is left.
    pub fn is_finalized(&self) -> bool {
        self.lock().finalized
    }

    /// Mesh of every primitive merged into one, cached until the next
    /// mutation.
    ///
    /// Cancellation is checked between primitive categories; a canceled
    /// merge returns an empty mesh and caches nothing.
    pub fn merged_mesh(&self, steps: usize) -> TriangleMesh {
        let mut state = self.lock();
        if let Some(mesh) = state.cache.get() {
            return mesh.clone();
        }

        let p = &state.prims;
        let valid_heads: Vec<&Head> = p.heads.iter().filter(|h| h.is_valid()).collect();
        let mut merged = TriangleMesh::new();
        let categories: [&dyn Fn() -> Vec<TriangleMesh>; 8] = [
            &|| mesh_all(&valid_heads, steps),
            &|| mesh_all(&p.pillars.iter().collect::<Vec<_>>(), steps),
            &|| mesh_all(&p.pedestals.iter().collect::<Vec<_>>(), steps),
            &|| mesh_all(&p.junctions.iter().collect::<Vec<_>>(), steps),
            &|| mesh_all(&p.bridges.iter().collect::<Vec<_>>(), steps),
            &|| mesh_all(&p.crossbridges.iter().collect::<Vec<_>>(), steps),
            &|| mesh_all(&p.diffbridges.iter().collect::<Vec<_>>(), steps),
            &|| mesh_all(&p.anchors.iter().collect::<Vec<_>>(), steps),
        ];
        for category in categories {
            if self.ctl.stopped() {
                return TriangleMesh::new();
            }
            for part in category() {
                merged.merge(&part);
            }
        }
        if self.ctl.stopped() {
            return TriangleMesh::new();
        }

        merged.merge_vertices(MERGE_TOLERANCE);
        let bb = merged.bounding_box();
        state.model_height = if merged.is_empty() { 0.0 } else { bb.max.z - bb.min.z };
        state.cache.store(merged.clone());
        merged
    }

    /// Merged mesh if already computed, else compute it.
    pub fn retrieve_mesh(&self) -> TriangleMesh {
        self.merged_mesh(DEFAULT_MESH_STEPS)
    }

    /// Materialize the merged mesh and drop all primitive metadata.
    ///
    /// One way: the builder only serves the mesh afterwards. Fails with
    /// [`SupportError::Canceled`] when the controller stopped the merge.
    pub fn merge_and_cleanup(&self) -> Result<TriangleMesh> {
        let mesh = self.merged_mesh(DEFAULT_MESH_STEPS);
        if self.ctl.stopped() {
            return Err(SupportError::Canceled);
        }
        let mut state = self.lock();
        state.prims = Primitives::default();
        state.finalized = true;
        debug!(triangles = mesh.num_triangles(), "support tree finalized");
        Ok(mesh)
    }
}

fn mesh_all<P: SupportPrimitive + Sync>(prims: &[&P], steps: usize) -> Vec<TriangleMesh> {
    prims.par_iter().map(|p| p.to_mesh(steps)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use resina_math::down;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn sample_head() -> Head {
        Head::new(0.5, 0.2, 1.0, 0.5, down(), Point3::new(0.0, 0.0, 10.0))
    }

    #[test]
    fn test_heads_are_keyed_by_support_point() {
        let b = SupportTreeBuilder::default();
        b.add_head(7, sample_head()).unwrap();
        assert_eq!(b.head(7).unwrap().id, 7);
        assert!(b.head(3).is_none());
        b.invalidate_head(7).unwrap();
        assert!(!b.head(7).unwrap().is_valid());
    }

    #[test]
    fn test_pillar_from_head_reaches_down() {
        let b = SupportTreeBuilder::default();
        b.add_head(0, sample_head()).unwrap();
        let jp = b.head(0).unwrap().junction_point();
        let pid = b.add_pillar_from_head(0, jp.z).unwrap();
        let pillar = b.pillar(pid).unwrap();
        assert!(pillar.starts_from_head);
        assert_relative_eq!(pillar.endpoint().z, 0.0, epsilon = 1e-12);
        assert_relative_eq!(pillar.startpoint().z, jp.z, epsilon = 1e-12);
        assert_eq!(b.head(0).unwrap().pillar_id, pid);
        assert_eq!(b.add_pillar_from_head(5, 1.0).unwrap(), ID_UNSET);
    }

    #[test]
    fn test_pillar_base_is_clamped() {
        let b = SupportTreeBuilder::default();
        let pid = b.add_pillar(Point3::origin(), 0.5, 1.0, 1.0).unwrap();
        b.add_pillar_base(pid, 3.0, 0.5).unwrap();
        let base = &b.pedestals()[0];
        assert_relative_eq!(base.height, 0.5);
        assert_relative_eq!(base.r_bottom, 1.0);
        assert_relative_eq!(base.r_top, 1.0);
    }

    #[test]
    fn test_mesh_cache_is_invalidated_by_mutation() {
        let b = SupportTreeBuilder::default();
        b.add_junction(Point3::origin(), 1.0).unwrap();
        let first = b.merged_mesh(12);
        assert!(!first.is_empty());
        assert_eq!(b.merged_mesh(12), first);
        b.add_junction(Point3::new(10.0, 0.0, 0.0), 1.0).unwrap();
        let second = b.merged_mesh(12);
        assert!(second.num_triangles() > first.num_triangles());
        assert_relative_eq!(b.model_height(), 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_invalid_heads_are_not_meshed() {
        let b = SupportTreeBuilder::default();
        b.add_head(0, sample_head()).unwrap();
        b.invalidate_head(0).unwrap();
        assert!(b.merged_mesh(12).is_empty());
    }

    #[test]
    fn test_merge_and_cleanup_is_one_way() {
        let b = SupportTreeBuilder::default();
        let pid = b.add_pillar(Point3::origin(), 5.0, 0.5, 0.5).unwrap();
        b.increment_links(pid).unwrap();
        assert_eq!(b.pillar(pid).unwrap().links, 1);
        let mesh = b.merge_and_cleanup().unwrap();
        assert!(!mesh.is_empty());
        assert!(b.is_finalized());
        assert!(b.pillars().is_empty());
        assert_eq!(b.retrieve_mesh(), mesh);
        assert_eq!(
            b.add_junction(Point3::origin(), 1.0),
            Err(SupportError::Finalized)
        );
    }

    #[test]
    fn test_canceled_merge_is_empty() {
        let stop = Arc::new(AtomicBool::new(true));
        let flag = stop.clone();
        let ctl = JobController::new().with_stop(Arc::new(move || flag.load(Ordering::Relaxed)));
        let b = SupportTreeBuilder::new(ctl);
        b.add_junction(Point3::origin(), 1.0).unwrap();
        assert!(b.merged_mesh(12).is_empty());
        assert_eq!(b.merge_and_cleanup(), Err(SupportError::Canceled));
        stop.store(false, Ordering::Relaxed);
        assert!(!b.merged_mesh(12).is_empty());
    }
}
