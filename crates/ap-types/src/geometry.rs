//! Geometry primitives and the cut-target collaborator.

use std::sync::Arc;

use nalgebra::{UnitQuaternion, Vector3};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Half extent of the unit cutter in its local frame.
pub const CUTTER_HALF_EXTENT: f64 = 50.0;

/// Solid used to carve an opening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CutterType {
    #[default]
    Box,
    Spherical,
    SShape,
}

/// Rotation, translation and non-uniform scale, applied scale first.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
    pub scale: Vector3<f64>,
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform {
    pub fn new(rotation: UnitQuaternion<f64>, translation: Vector3<f64>, scale: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
            scale,
        }
    }

    pub fn identity() -> Self {
        Self::new(UnitQuaternion::identity(), Vector3::zeros(), Vector3::new(1.0, 1.0, 1.0))
    }

    pub fn from_translation(translation: Vector3<f64>) -> Self {
        Self {
            translation,
            ..Self::identity()
        }
    }

    pub fn with_scale(mut self, scale: Vector3<f64>) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_rotation(mut self, rotation: UnitQuaternion<f64>) -> Self {
        self.rotation = rotation;
        self
    }

    /// Map a point from this transform's local frame into its parent frame.
    pub fn transform_point(&self, local: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * self.scale.component_mul(local) + self.translation
    }

    pub fn approx_eq(&self, other: &Transform, epsilon: f64) -> bool {
        (self.translation - other.translation).norm() <= epsilon
            && (self.scale - other.scale).norm() <= epsilon
            && self.rotation.angle_to(&other.rotation) <= epsilon
    }
}

/// Axis aligned box in world space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: Vector3<f64>,
    pub max: Vector3<f64>,
}

impl BoundingBox {
    pub fn new(min: Vector3<f64>, max: Vector3<f64>) -> Self {
        Self { min, max }
    }

    /// Box around `center` with the given half extents.
    pub fn from_center(center: Vector3<f64>, half_extents: Vector3<f64>) -> Self {
        Self::new(center - half_extents, center + half_extents)
    }

    /// World bounds of a unit cutter placed with `transform`.
    pub fn of_cutter(transform: &Transform) -> Self {
        let h = CUTTER_HALF_EXTENT;
        let mut min = Vector3::repeat(f64::INFINITY);
        let mut max = Vector3::repeat(f64::NEG_INFINITY);
        for &x in &[-h, h] {
            for &y in &[-h, h] {
                for &z in &[-h, h] {
                    let corner = transform.transform_point(&Vector3::new(x, y, z));
                    min = min.inf(&corner);
                    max = max.sup(&corner);
                }
            }
        }
        Self::new(min, max)
    }

    pub fn volume(&self) -> f64 {
        let size = self.max - self.min;
        if size.iter().any(|d| *d <= 0.0) {
            return 0.0;
        }
        size.x * size.y * size.z
    }

    /// Strict overlap test; touching faces do not intersect.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        (0..3).all(|i| self.max[i] > other.min[i] && self.min[i] < other.max[i])
    }

    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        if !self.intersects(other) {
            return None;
        }
        Some(BoundingBox::new(self.min.sup(&other.min), self.max.inf(&other.max)))
    }

    pub fn overlap_volume(&self, other: &BoundingBox) -> f64 {
        self.intersection(other).map_or(0.0, |b| b.volume())
    }
}

/// The mesh that openings are carved from.
///
/// Implemented by the host's boolean geometry engine. The optimizer only ever
/// applies cutters, resets, and reads back the bounds of applied openings.
pub trait CutTarget: Send {
    fn apply_cutter_transform(&mut self, cutter: CutterType, transform: &Transform);

    fn reset(&mut self);

    fn openings_bbox(&self) -> Vec<BoundingBox>;
}

/// One cutter application as seen by a [`CutRecorder`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedCut {
    pub cutter: CutterType,
    pub transform: Transform,
    pub bounds: BoundingBox,
}

#[derive(Debug, Default)]
struct CutLog {
    applied: Vec<AppliedCut>,
    resets: usize,
}

/// Shared, cloneable [`CutTarget`] that keeps the applied openings.
///
/// The domain owns one clone while the host keeps another to forward the
/// cuts to its mesh boolean engine.
#[derive(Debug, Clone, Default)]
pub struct CutRecorder {
    inner: Arc<Mutex<CutLog>>,
}

impl CutRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn applied(&self) -> Vec<AppliedCut> {
        self.inner.lock().applied.clone()
    }

    pub fn applied_count(&self) -> usize {
        self.inner.lock().applied.len()
    }

    /// Number of resets since creation.
    pub fn reset_count(&self) -> usize {
        self.inner.lock().resets
    }
}

impl CutTarget for CutRecorder {
    fn apply_cutter_transform(&mut self, cutter: CutterType, transform: &Transform) {
        let bounds = BoundingBox::of_cutter(transform);
        debug!(?cutter, x = transform.translation.x, y = transform.translation.y, "cutter applied");
        self.inner.lock().applied.push(AppliedCut {
            cutter,
            transform: *transform,
            bounds,
        });
    }

    fn reset(&mut self) {
        let mut log = self.inner.lock();
        log.applied.clear();
        log.resets += 1;
    }

    fn openings_bbox(&self) -> Vec<BoundingBox> {
        self.inner.lock().applied.iter().map(|c| c.bounds).collect()
    }
}
