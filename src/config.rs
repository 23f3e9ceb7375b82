use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub schema_version: u32,
    pub media: MediaConfig,
    pub face: FaceConfig,
    pub audio: AudioConfig,
    pub tracking: TrackingConfig,

    // Model path
    pub model_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema_version: 1,
            media: MediaConfig::default(),
            face: FaceConfig::default(),
            audio: AudioConfig::default(),
            tracking: TrackingConfig::default(),
            model_path: None,
        }
    }
}

impl Config {
    /// Load config from file, or create default
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .context("Failed to read config file")?;
            serde_json::from_str(&content)
                .context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .context("Failed to serialize config")?;
        std::fs::write(path, content)
            .context("Failed to write config file")
    }

    /// Get the default config directory
    pub fn default_config_dir() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .context("Failed to get home directory")?;
        Ok(home.join(".interview-signals"))
    }

    /// Get the default config file path
    pub fn default_config_path() -> Result<PathBuf> {
        Ok(Self::default_config_dir()?.join("config.json"))
    }

    /// Get the face mesh model file path
    pub fn get_model_path(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.model_path {
            Ok(path.clone())
        } else {
            Ok(Self::default_config_dir()?.join("models").join(FACE_MESH_MODEL_FILENAME))
        }
    }
}

/// Default face mesh model filename
pub const FACE_MESH_MODEL_FILENAME: &str = "face_landmark.onnx";

/// Capture constraints requested from the media collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub video_width: u32,
    pub video_height: u32,
    pub audio_enabled: bool,
    pub input_device_id: Option<String>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            video_width: 640,
            video_height: 480,
            audio_enabled: true,
            input_device_id: None,
        }
    }
}

/// Head-pose heuristics. The scale constants are webcam-tuned, not physical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaceConfig {
    /// Degrees of yaw per pixel of nose offset from the eye midpoint
    pub yaw_scale: f64,
    /// Degrees of pitch per pixel of nose-to-chin vertical offset
    pub pitch_scale: f64,
    /// Face mesh presence probability below which the frame counts as face-absent
    pub presence_threshold: f32,
    /// Threads for ONNX inference
    pub n_threads: usize,
}

impl Default for FaceConfig {
    fn default() -> Self {
        Self {
            yaw_scale: 0.5,
            pitch_scale: 0.1,
            presence_threshold: 0.5,
            n_threads: 1,
        }
    }
}

/// Microphone level sampling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Level samples kept in the rolling window (~2s at 60 per second)
    pub history_len: usize,
    /// Level samples taken per second of audio
    pub blocks_per_second: u32,
    /// Normalized level above which a sample counts as speech
    pub speaking_threshold: f64,
    /// Silence gap before resumed speech counts as a filler event
    pub filler_gap_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            history_len: 120,
            blocks_per_second: 60,
            speaking_threshold: 0.02,
            filler_gap_ms: 500,
        }
    }
}

/// Tracking loop cadence and smoothing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Display refresh rate driving the loop
    pub refresh_hz: u32,
    /// Run detection on every Nth tick
    pub detection_stride: u32,
    /// Moving-average window applied to emitted scores
    pub smoothing_window: usize,
    /// Consecutive detection failures before a warning is logged
    pub failure_warn_threshold: u32,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            refresh_hz: 60,
            detection_stride: 4,
            smoothing_window: 5,
            failure_warn_threshold: 30,
        }
    }
}

impl TrackingConfig {
    /// Time between two ticks
    pub fn tick_period(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.refresh_hz.max(1)))
    }
}
