//! The scene handed to a print: objects made of volumes, placed by
//! instances, with per-object option overrides.

use std::sync::atomic::{AtomicU64, Ordering};

use resina_math::{Point3, Transform, Vec3};
use resina_mesh::TriangleMesh;
use resina_support::SupportPoint;
use serde_json::{Map, Value};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a model entity. Clones keep the id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u64);

impl ObjectId {
    /// A process-wide unique id.
    pub fn new() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw value.
    pub fn value(self) -> u64 {
        self.0
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

/// Role of a volume inside its object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VolumeType {
    /// Printed geometry.
    #[default]
    ModelPart,
    /// Geometry carved out of the model parts.
    NegativeVolume,
    /// Region where support points are always kept.
    SupportEnforcer,
    /// Region where support points are dropped.
    SupportBlocker,
}

/// A mesh placed inside its object.
#[derive(Debug, Clone)]
pub struct ModelVolume {
    /// Identity; a changed mesh gets a new volume.
    pub id: ObjectId,
    /// Geometry in volume coordinates.
    pub mesh: TriangleMesh,
    /// Placement relative to the object.
    pub transform: Transform,
    /// Role of the volume.
    pub volume_type: VolumeType,
}

impl ModelVolume {
    /// A model part with identity placement.
    pub fn new(mesh: TriangleMesh) -> Self {
        Self {
            id: ObjectId::new(),
            mesh,
            transform: Transform::identity(),
            volume_type: VolumeType::ModelPart,
        }
    }

    /// Set the role.
    pub fn with_type(mut self, volume_type: VolumeType) -> Self {
        self.volume_type = volume_type;
        self
    }

    /// Set the placement.
    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }
}

/// One placed copy of an object.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInstance {
    /// Identity.
    pub id: ObjectId,
    /// Position on the bed; Z lifts the object.
    pub offset: Vec3,
    /// Rotation about Z (radians).
    pub rotation_z: f64,
    /// Scale per axis.
    pub scaling: Vec3,
    /// Excluded instances are not printed.
    pub printable: bool,
}

impl Default for ModelInstance {
    fn default() -> Self {
        Self {
            id: ObjectId::new(),
            offset: Vec3::zeros(),
            rotation_z: 0.0,
            scaling: Vec3::new(1.0, 1.0, 1.0),
            printable: true,
        }
    }
}

impl ModelInstance {
    /// An instance at `(x, y)` on the bed.
    pub fn at(x: f64, y: f64) -> Self {
        Self {
            offset: Vec3::new(x, y, 0.0),
            ..Default::default()
        }
    }

    /// Rotation and scaling without any offset.
    pub fn linear_transform(&self) -> Transform {
        Transform::rotation_z(self.rotation_z)
            .then(&Transform::scale(self.scaling.x, self.scaling.y, self.scaling.z))
    }

    /// Mirroring instances flip the winding of everything they place.
    pub fn is_left_handed(&self) -> bool {
        self.scaling.x * self.scaling.y * self.scaling.z < 0.0
    }

    /// Full placement on the bed.
    pub fn transform(&self) -> Transform {
        Transform::translation(self.offset.x, self.offset.y, self.offset.z)
            .then(&Transform::rotation_z(self.rotation_z))
            .then(&Transform::scale(self.scaling.x, self.scaling.y, self.scaling.z))
    }
}

/// A hole drilled from the model surface into its cavity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrainHole {
    /// Entry point on the surface, object coordinates.
    pub pos: Point3,
    /// Drilling direction reversed: points out of the model.
    pub normal: Vec3,
    /// Hole radius.
    pub radius: f64,
    /// Hole depth along `-normal`.
    pub height: f64,
}

/// Where an object's support points came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PointsStatus {
    /// No points yet.
    #[default]
    NoPoints,
    /// Generated by the pipeline.
    AutoGenerated,
    /// Edited by the user; the pipeline keeps them as they are.
    UserModified,
}

/// A printable object.
#[derive(Debug, Clone, Default)]
pub struct ModelObject {
    /// Identity used to reconcile prints.
    pub id: ObjectId,
    /// Display name.
    pub name: String,
    /// Source file.
    pub input_file: String,
    /// Parts, modifiers and negative volumes.
    pub volumes: Vec<ModelVolume>,
    /// Placed copies.
    pub instances: Vec<ModelInstance>,
    /// Per-object option overrides.
    pub config: Map<String, Value>,
    /// Support points in object coordinates.
    pub support_points: Vec<SupportPoint>,
    /// Origin of `support_points`.
    pub points_status: PointsStatus,
    /// Drain holes in object coordinates.
    pub drain_holes: Vec<DrainHole>,
}

impl ModelObject {
    /// An object with one part and one instance at the origin.
    pub fn new(name: impl Into<String>, mesh: TriangleMesh) -> Self {
        Self {
            id: ObjectId::new(),
            name: name.into(),
            volumes: vec![ModelVolume::new(mesh)],
            instances: vec![ModelInstance::default()],
            ..Default::default()
        }
    }

    /// Merged mesh of the volumes of `volume_type`, in object coordinates.
    pub fn volumes_mesh(&self, volume_type: VolumeType) -> TriangleMesh {
        let mut out = TriangleMesh::new();
        for v in self.volumes.iter().filter(|v| v.volume_type == volume_type) {
            let mut m = v.mesh.clone();
            m.transform(&v.transform);
            out.merge(&m);
        }
        out
    }

    /// Identity, role and placement of every volume, in order.
    pub(crate) fn volume_signature(&self) -> Vec<(ObjectId, VolumeType, Transform)> {
        self.volumes
            .iter()
            .map(|v| (v.id, v.volume_type, v.transform.clone()))
            .collect()
    }
}

/// A scene.
#[derive(Debug, Clone, Default)]
pub struct Model {
    /// Identity; a new model invalidates everything.
    pub id: ObjectId,
    /// Objects in print order.
    pub objects: Vec<ModelObject>,
}

impl Model {
    /// An empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `object`.
    pub fn add_object(&mut self, object: ModelObject) -> &mut ModelObject {
        self.objects.push(object);
        let last = self.objects.len() - 1;
        &mut self.objects[last]
    }

    /// Object ids in order.
    pub fn object_ids(&self) -> Vec<ObjectId> {
        self.objects.iter().map(|o| o.id).collect()
    }
}
