//! Face mesh landmark provider using a MediaPipe-style ONNX model.
//!
//! The model takes a 192x192 RGB crop (NHWC, values in [0, 1]) and returns
//! 468 landmarks as a flat `[x, y, z]` tensor in input pixel coordinates,
//! plus a single face presence logit.

use async_trait::async_trait;
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::path::PathBuf;
use std::sync::Arc;
#[cfg(feature = "face-mesh")]
use std::sync::Mutex;
use tracing::{debug, info};

#[cfg(feature = "face-mesh")]
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::Value,
};

use super::loader::ModelLoader;
use super::{FaceKeypointSet, Keypoint, LandmarkError, LandmarkModel, FACE_MESH_POINTS};
#[cfg(feature = "face-mesh")]
use crate::media::VideoFrame;

/// Model input edge length in pixels
pub const INPUT_SIZE: u32 = 192;

/// Configuration for the face mesh provider
#[derive(Debug, Clone)]
pub struct FaceMeshConfig {
    /// Path to the face mesh ONNX model
    pub model_path: PathBuf,
    /// Number of threads for ONNX inference
    pub n_threads: usize,
    /// Presence probability below which no face is reported
    pub presence_threshold: f32,
}

impl Default for FaceMeshConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::new(),
            n_threads: 1,
            presence_threshold: 0.5,
        }
    }
}

/// Resize to the model input and flatten to NHWC floats in [0, 1]
pub fn preprocess(image: &RgbImage) -> Vec<f32> {
    let resized = imageops::resize(image, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);
    resized.as_raw().iter().map(|&v| f32::from(v) / 255.0).collect()
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Interpret raw model outputs for a frame of `width` x `height` pixels.
///
/// The landmark tensor is the first output holding at least 468 triples;
/// the presence logit is the first single-value output, if any.
pub fn decode_outputs(
    outputs: &[Vec<f32>],
    width: u32,
    height: u32,
    presence_threshold: f32,
) -> Result<Option<FaceKeypointSet>, LandmarkError> {
    if let Some(logit) = outputs.iter().find(|o| o.len() == 1).map(|o| o[0]) {
        let presence = sigmoid(logit);
        if presence.is_nan() || presence < presence_threshold {
            debug!("No face (presence {:.2})", presence);
            return Ok(None);
        }
    }

    let landmarks = outputs
        .iter()
        .find(|o| o.len() >= FACE_MESH_POINTS * 3)
        .ok_or_else(|| LandmarkError::DetectionFailed("No landmark output from model".to_string()))?;

    let sx = f64::from(width) / f64::from(INPUT_SIZE);
    let sy = f64::from(height) / f64::from(INPUT_SIZE);
    let points = landmarks[..FACE_MESH_POINTS * 3]
        .chunks_exact(3)
        .map(|c| Keypoint::new(f64::from(c[0]) * sx, f64::from(c[1]) * sy, f64::from(c[2]) * sx))
        .collect();

    Ok(Some(FaceKeypointSet::new(points)))
}

/// Face mesh provider backed by ONNX Runtime
#[cfg(feature = "face-mesh")]
pub struct OnnxFaceMesh {
    session: Arc<Mutex<Session>>,
    presence_threshold: f32,
}

#[cfg(feature = "face-mesh")]
impl OnnxFaceMesh {
    /// Load the model from disk. Blocking.
    pub fn new(config: &FaceMeshConfig) -> Result<Self, LandmarkError> {
        if !config.model_path.exists() {
            return Err(LandmarkError::ModelNotFound(config.model_path.clone()));
        }

        let session = Session::builder()
            .map_err(|e: ort::Error| LandmarkError::LoadFailed(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e: ort::Error| LandmarkError::LoadFailed(e.to_string()))?
            .with_intra_threads(config.n_threads.max(1))
            .map_err(|e: ort::Error| LandmarkError::LoadFailed(e.to_string()))?
            .commit_from_file(&config.model_path)
            .map_err(|e: ort::Error| LandmarkError::LoadFailed(e.to_string()))?;

        info!("Face mesh provider initialized with model: {:?}", config.model_path);

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            presence_threshold: config.presence_threshold,
        })
    }

    fn infer(session: &Mutex<Session>, input: Vec<f32>) -> Result<Vec<Vec<f32>>, LandmarkError> {
        let mut session = session
            .lock()
            .map_err(|_| LandmarkError::DetectionFailed("Face mesh session poisoned".to_string()))?;

        let input_shape = [1_usize, INPUT_SIZE as usize, INPUT_SIZE as usize, 3];
        let input_tensor = Value::from_array((input_shape, input))
            .map_err(|e: ort::Error| LandmarkError::DetectionFailed(e.to_string()))?;

        let outputs = session
            .run(ort::inputs![input_tensor])
            .map_err(|e: ort::Error| LandmarkError::DetectionFailed(e.to_string()))?;

        let mut values = Vec::new();
        for output in outputs.iter() {
            let tensor = output
                .1
                .try_extract_tensor::<f32>()
                .map_err(|e: ort::Error| LandmarkError::DetectionFailed(e.to_string()))?;
            values.push(tensor.1.iter().copied().collect());
        }
        Ok(values)
    }
}

#[cfg(feature = "face-mesh")]
#[async_trait]
impl LandmarkModel for OnnxFaceMesh {
    async fn detect(&self, frame: &VideoFrame) -> Result<Option<FaceKeypointSet>, LandmarkError> {
        let (width, height) = (frame.width(), frame.height());
        if width == 0 || height == 0 {
            return Err(LandmarkError::DetectionFailed("Empty frame".to_string()));
        }

        let input = preprocess(&frame.image);
        let session = self.session.clone();
        let outputs = tokio::task::spawn_blocking(move || Self::infer(&session, input))
            .await
            .map_err(|e| LandmarkError::DetectionFailed(e.to_string()))??;

        decode_outputs(&outputs, width, height, self.presence_threshold)
    }

    fn name(&self) -> &str {
        "onnx-face-mesh"
    }
}

// Stub implementation when feature is not enabled
#[cfg(not(feature = "face-mesh"))]
pub struct OnnxFaceMesh;

#[cfg(not(feature = "face-mesh"))]
impl OnnxFaceMesh {
    pub fn new(_config: &FaceMeshConfig) -> Result<Self, LandmarkError> {
        Err(LandmarkError::FeatureNotEnabled)
    }
}

#[cfg(not(feature = "face-mesh"))]
#[async_trait]
impl LandmarkModel for OnnxFaceMesh {
    async fn detect(
        &self,
        _frame: &crate::media::VideoFrame,
    ) -> Result<Option<FaceKeypointSet>, LandmarkError> {
        Err(LandmarkError::FeatureNotEnabled)
    }
}

/// Loads `OnnxFaceMesh` off the async runtime
pub struct FaceMeshLoader {
    config: FaceMeshConfig,
}

impl FaceMeshLoader {
    pub fn new(config: FaceMeshConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ModelLoader for FaceMeshLoader {
    async fn load(&self) -> Result<Arc<dyn LandmarkModel>, LandmarkError> {
        let config = self.config.clone();
        let model = tokio::task::spawn_blocking(move || OnnxFaceMesh::new(&config))
            .await
            .map_err(|e| LandmarkError::LoadFailed(e.to_string()))??;
        Ok(Arc::new(model))
    }
}
