use anyhow::{Context, Result};
use async_trait::async_trait;
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info};

/// One captured video frame
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub image: RgbImage,
    pub sequence: u64,
    /// Milliseconds since the video track started
    pub captured_at_ms: u64,
}

impl VideoFrame {
    pub fn new(image: RgbImage, sequence: u64, captured_at_ms: u64) -> Self {
        Self {
            image,
            sequence,
            captured_at_ms,
        }
    }

    /// Black frame of the given size
    pub fn blank(width: u32, height: u32) -> Self {
        Self::new(RgbImage::new(width, height), 0, 0)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Per-frame capture failures. All of them are transient from the tracker's view.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("Video track ended")]
    Ended,
    #[error("Camera permission revoked")]
    Revoked,
    #[error("Frame capture failed: {0}")]
    Frame(String),
}

/// A live video track
#[async_trait]
pub trait VideoSource: Send + Sync {
    /// Grab the current frame
    async fn capture_frame(&self) -> Result<VideoFrame, CaptureError>;

    /// Release the underlying camera. Must be idempotent.
    fn release(&self);
}

/// Replays a directory of JPEG frames in name order, looping at the end.
pub struct DirectoryVideoSource {
    frames: Vec<PathBuf>,
    next: AtomicU64,
    started: Instant,
    released: AtomicBool,
}

impl DirectoryVideoSource {
    /// Index the `.jpg`/`.jpeg` files in `dir`
    pub fn open(dir: &Path) -> Result<Self> {
        let mut frames: Vec<PathBuf> = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read frame directory {:?}", dir))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_jpeg(path))
            .collect();
        frames.sort();

        if frames.is_empty() {
            anyhow::bail!("No JPEG frames found in {:?}", dir);
        }

        info!("Replaying {} frames from {:?}", frames.len(), dir);

        Ok(Self {
            frames,
            next: AtomicU64::new(0),
            started: Instant::now(),
            released: AtomicBool::new(false),
        })
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

fn is_jpeg(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "jpg" | "jpeg"))
        .unwrap_or(false)
}

#[async_trait]
impl VideoSource for DirectoryVideoSource {
    async fn capture_frame(&self) -> Result<VideoFrame, CaptureError> {
        if self.released.load(Ordering::SeqCst) {
            return Err(CaptureError::Ended);
        }

        let sequence = self.next.fetch_add(1, Ordering::Relaxed);
        let path = self.frames[(sequence % self.frames.len() as u64) as usize].clone();
        let captured_at_ms = self.started.elapsed().as_millis() as u64;

        let image = tokio::task::spawn_blocking(move || image::open(&path).map(|img| img.to_rgb8()))
            .await
            .map_err(|e| CaptureError::Frame(e.to_string()))?
            .map_err(|e| CaptureError::Frame(e.to_string()))?;

        Ok(VideoFrame::new(image, sequence, captured_at_ms))
    }

    fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            debug!("Frame replay released");
        }
    }
}
