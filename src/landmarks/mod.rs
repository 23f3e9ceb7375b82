//! Face landmark model adapter
//!
//! A `LandmarkModel` turns one video frame into zero or one face keypoint
//! set. Models are loaded once, asynchronously, through a
//! `SharedLandmarkModel` handle that callers share by `Arc`.

pub mod face_mesh;
pub mod loader;

#[cfg(test)]
pub(crate) mod fakes;

pub use face_mesh::{FaceMeshConfig, FaceMeshLoader};
pub use loader::{ModelLoader, SharedLandmarkModel};

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

use crate::media::VideoFrame;

/// Points in a full face mesh
pub const FACE_MESH_POINTS: usize = 468;

/// Errors that can occur while loading or running a landmark model
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LandmarkError {
    #[error("Model not found: {0:?}")]
    ModelNotFound(PathBuf),

    #[error("Failed to load model: {0}")]
    LoadFailed(String),

    #[error("Detection failed: {0}")]
    DetectionFailed(String),

    #[error("Feature not enabled")]
    FeatureNotEnabled,
}

impl LandmarkError {
    /// Load errors make face metrics unavailable for the rest of a session;
    /// detection errors only affect one frame.
    pub fn is_load_failure(&self) -> bool {
        !matches!(self, LandmarkError::DetectionFailed(_))
    }
}

/// One landmark in frame pixel coordinates. `z` is relative depth.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Keypoint {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Distance in the image plane
    pub fn distance_2d(&self, other: &Keypoint) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Landmarks of one detected face, indexed by mesh position
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FaceKeypointSet {
    points: Vec<Keypoint>,
}

impl FaceKeypointSet {
    pub fn new(points: Vec<Keypoint>) -> Self {
        Self { points }
    }

    /// Build from a flat `[x0, y0, z0, x1, ...]` buffer; a trailing partial
    /// triple is dropped.
    pub fn from_xyz(values: &[f32]) -> Self {
        let points = values
            .chunks_exact(3)
            .map(|c| Keypoint::new(f64::from(c[0]), f64::from(c[1]), f64::from(c[2])))
            .collect();
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Landmark `index`, or `None` when out of range or non-finite
    pub fn point(&self, index: usize) -> Option<Keypoint> {
        self.points.get(index).copied().filter(Keypoint::is_finite)
    }

    pub fn points(&self) -> &[Keypoint] {
        &self.points
    }
}

/// Face landmark detection capability
#[async_trait]
pub trait LandmarkModel: Send + Sync {
    /// Landmarks of the most prominent face, or `None` when no face is visible
    async fn detect(&self, frame: &VideoFrame) -> Result<Option<FaceKeypointSet>, LandmarkError>;

    fn name(&self) -> &str {
        "landmark-model"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_xyz_drops_partial_triple() {
        let set = FaceKeypointSet::from_xyz(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(set.len(), 1);
        assert_eq!(set.point(0), Some(Keypoint::new(1.0, 2.0, 3.0)));
    }

    #[test]
    fn test_point_out_of_range_or_non_finite() {
        let set = FaceKeypointSet::new(vec![
            Keypoint::new(0.0, 0.0, 0.0),
            Keypoint::new(f64::NAN, 1.0, 0.0),
        ]);
        assert!(set.point(0).is_some());
        assert!(set.point(1).is_none());
        assert!(set.point(2).is_none());
    }

    #[test]
    fn test_distance_2d_ignores_depth() {
        let a = Keypoint::new(0.0, 0.0, 0.0);
        let b = Keypoint::new(3.0, 4.0, 100.0);
        assert_eq!(a.distance_2d(&b), 5.0);
    }

    #[test]
    fn test_load_failure_classification() {
        assert!(LandmarkError::FeatureNotEnabled.is_load_failure());
        assert!(LandmarkError::ModelNotFound(PathBuf::from("x.onnx")).is_load_failure());
        assert!(!LandmarkError::DetectionFailed("bad frame".into()).is_load_failure());
    }
}
