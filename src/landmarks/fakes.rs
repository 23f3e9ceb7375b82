//! Synthetic landmark models for tests

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::loader::ModelLoader;
use super::{FaceKeypointSet, LandmarkError, LandmarkModel};
use crate::face::fixtures::SyntheticFace;
use crate::media::VideoFrame;

/// Reports a configurable synthetic face for every frame
pub(crate) struct SyntheticModel {
    face: Mutex<Option<SyntheticFace>>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl SyntheticModel {
    pub fn new(face: Option<SyntheticFace>) -> Arc<Self> {
        Arc::new(Self {
            face: Mutex::new(face),
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn set_face(&self, face: Option<SyntheticFace>) {
        *self.face.lock().unwrap() = face;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LandmarkModel for SyntheticModel {
    async fn detect(&self, _frame: &VideoFrame) -> Result<Option<FaceKeypointSet>, LandmarkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(LandmarkError::DetectionFailed("inference error".to_string()));
        }
        Ok(self.face.lock().unwrap().map(|f| f.keypoints()))
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}

/// Loader that waits, then yields a model or a load failure
pub(crate) struct DelayedLoader {
    pub delay: Duration,
    pub model: Option<Arc<dyn LandmarkModel>>,
}

#[async_trait]
impl ModelLoader for DelayedLoader {
    async fn load(&self) -> Result<Arc<dyn LandmarkModel>, LandmarkError> {
        tokio::time::sleep(self.delay).await;
        self.model
            .clone()
            .ok_or_else(|| LandmarkError::LoadFailed("model file corrupt".to_string()))
    }
}
