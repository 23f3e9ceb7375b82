//! Per-refresh orchestrator
//!
//! Every tick emits one `SessionMetrics`. Every `detection_stride`-th tick
//! captures a frame, runs the landmark model and recomputes the face scores;
//! the other ticks re-emit the previous snapshot unchanged. Audio metrics are
//! read from the sampler's watch channel at detection time.
//!
//! Nothing that goes wrong inside a tick stops the loop: a failed capture or
//! detection re-emits the last good snapshot.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use super::sink::MetricsSink;
use super::snapshot::{now_ms, SessionMetrics};
use crate::audio::AudioMetrics;
use crate::config::{FaceConfig, TrackingConfig};
use crate::face::FaceMetrics;
use crate::landmarks::{LandmarkError, LandmarkModel, SharedLandmarkModel};
use crate::media::{CaptureError, VideoSource};
use crate::scoring::{detect_blink, eye_contact_score, posture_score, smooth_signal};

/// Landmark model availability as seen by the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelState {
    /// No model configured
    Disabled,
    Loading,
    Ready,
    /// Load failed; face metrics are unavailable for this session
    Unavailable,
}

/// Tracking diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingStats {
    pub ticks: u64,
    pub detection_ticks: u64,
    pub frames_with_face: u64,
    pub frames_without_face: u64,
    pub detection_failures: u64,
    pub consecutive_failures: u32,
    pub blink_count: u64,
    pub model_state: ModelState,
}

impl TrackingStats {
    fn new(model_state: ModelState) -> Self {
        Self {
            ticks: 0,
            detection_ticks: 0,
            frames_with_face: 0,
            frames_without_face: 0,
            detection_failures: 0,
            consecutive_failures: 0,
            blink_count: 0,
            model_state,
        }
    }
}

/// Per-tick failures. Always transient.
#[derive(Debug, Error)]
pub enum TickError {
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Detection(#[from] LandmarkError),
}

type LoadResult = Result<Arc<dyn LandmarkModel>, LandmarkError>;

enum ModelSlot {
    Disabled,
    Pending(Arc<SharedLandmarkModel>),
    Loading(oneshot::Receiver<LoadResult>),
    Ready(Arc<dyn LandmarkModel>),
    Unavailable,
}

impl ModelSlot {
    fn state(&self) -> ModelState {
        match self {
            ModelSlot::Disabled => ModelState::Disabled,
            ModelSlot::Pending(_) | ModelSlot::Loading(_) => ModelState::Loading,
            ModelSlot::Ready(_) => ModelState::Ready,
            ModelSlot::Unavailable => ModelState::Unavailable,
        }
    }
}

/// Last `cap` raw scores of one signal
struct ScoreHistory {
    cap: usize,
    values: VecDeque<f64>,
}

impl ScoreHistory {
    fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            values: VecDeque::new(),
        }
    }

    fn push(&mut self, value: f64) {
        if self.values.len() == self.cap {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    fn last(&self) -> Option<f64> {
        self.values.back().copied()
    }

    fn smoothed(&self) -> f64 {
        let values: Vec<f64> = self.values.iter().copied().collect();
        smooth_signal(&values, self.cap).last().copied().unwrap_or(0.0)
    }
}

pub struct TrackingLoop {
    config: TrackingConfig,
    face_config: FaceConfig,
    video: Option<Arc<dyn VideoSource>>,
    model: ModelSlot,
    audio: Option<watch::Receiver<AudioMetrics>>,
    sinks: Vec<Arc<dyn MetricsSink>>,

    tick_count: u64,
    last: Option<SessionMetrics>,
    eye_contact: ScoreHistory,
    smile: ScoreHistory,
    posture: ScoreHistory,
    openness: VecDeque<f64>,
    streak_warned: bool,

    stats: TrackingStats,
    stats_tx: watch::Sender<TrackingStats>,
}

impl TrackingLoop {
    pub fn new(config: TrackingConfig, face_config: FaceConfig) -> Self {
        let window = config.smoothing_window;
        let stats = TrackingStats::new(ModelState::Disabled);
        let (stats_tx, _) = watch::channel(stats.clone());
        Self {
            config,
            face_config,
            video: None,
            model: ModelSlot::Disabled,
            audio: None,
            sinks: Vec::new(),
            tick_count: 0,
            last: None,
            eye_contact: ScoreHistory::new(window),
            smile: ScoreHistory::new(window),
            posture: ScoreHistory::new(window),
            openness: VecDeque::with_capacity(3),
            streak_warned: false,
            stats,
            stats_tx,
        }
    }

    pub fn with_video(mut self, video: Option<Arc<dyn VideoSource>>) -> Self {
        self.video = video;
        self
    }

    /// Use `model`, loading it in the background once ticking starts
    pub fn with_model(mut self, model: Arc<SharedLandmarkModel>) -> Self {
        self.model = ModelSlot::Pending(model);
        self.stats.model_state = self.model.state();
        self
    }

    pub fn with_audio(mut self, audio: watch::Receiver<AudioMetrics>) -> Self {
        self.audio = Some(audio);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn stats(&self) -> &TrackingStats {
        &self.stats
    }

    pub fn subscribe_stats(&self) -> watch::Receiver<TrackingStats> {
        self.stats_tx.subscribe()
    }

    pub fn last_snapshot(&self) -> Option<SessionMetrics> {
        self.last
    }

    pub fn model_state(&self) -> ModelState {
        self.model.state()
    }

    /// Kick off the background load if it has not started yet, and pick up
    /// its result if it has finished. Never waits.
    fn poll_model(&mut self) {
        self.model = match std::mem::replace(&mut self.model, ModelSlot::Disabled) {
            ModelSlot::Pending(shared) => {
                let (tx, rx) = oneshot::channel();
                tokio::spawn(async move {
                    let _ = tx.send(shared.get().await);
                });
                debug!("Landmark model load started");
                ModelSlot::Loading(rx)
            }
            ModelSlot::Loading(mut rx) => match rx.try_recv() {
                Ok(result) => Self::settle(result),
                Err(oneshot::error::TryRecvError::Empty) => ModelSlot::Loading(rx),
                Err(oneshot::error::TryRecvError::Closed) => {
                    warn!("Landmark model load task ended without a result");
                    ModelSlot::Unavailable
                }
            },
            other => other,
        };
        self.stats.model_state = self.model.state();
    }

    fn settle(result: LoadResult) -> ModelSlot {
        match result {
            Ok(model) => {
                info!("Face tracking enabled with {}", model.name());
                ModelSlot::Ready(model)
            }
            Err(e) => {
                warn!("Face metrics unavailable for this session: {}", e);
                ModelSlot::Unavailable
            }
        }
    }

    /// Wait for a pending model load to finish. Returns the resulting state.
    pub async fn wait_for_model(&mut self) -> ModelState {
        self.poll_model();
        if let ModelSlot::Loading(rx) = std::mem::replace(&mut self.model, ModelSlot::Disabled) {
            self.model = match rx.await {
                Ok(result) => Self::settle(result),
                Err(_) => ModelSlot::Unavailable,
            };
        }
        self.stats.model_state = self.model.state();
        self.stats.model_state
    }

    /// Run one tick and push its snapshot to every sink
    pub async fn tick(&mut self) -> SessionMetrics {
        self.poll_model();

        let stride = u64::from(self.config.detection_stride.max(1));
        let is_detection_tick = self.tick_count % stride == 0;
        self.tick_count += 1;
        self.stats.ticks += 1;

        let snapshot = match (self.last, is_detection_tick) {
            (Some(last), false) => {
                trace!("Re-emitting snapshot");
                last
            }
            _ => match self.detect().await {
                Ok(snapshot) => {
                    self.stats.consecutive_failures = 0;
                    self.streak_warned = false;
                    snapshot
                }
                Err(e) => self.on_failure(e),
            },
        };

        self.last = Some(snapshot);
        for sink in &self.sinks {
            sink.publish(&snapshot);
        }
        self.stats_tx.send_replace(self.stats.clone());
        snapshot
    }

    async fn detect(&mut self) -> Result<SessionMetrics, TickError> {
        self.stats.detection_ticks += 1;

        let model = match &self.model {
            ModelSlot::Ready(model) => Some(model.clone()),
            _ => None,
        };

        // Without a model or a camera the face scores keep their last values
        if let (Some(video), Some(model)) = (self.video.clone(), model) {
            let frame = video.capture_frame().await?;
            match model.detect(&frame).await? {
                Some(keypoints) => {
                    let face = FaceMetrics::from_keypoints(&keypoints, &self.face_config);
                    self.record_face(&face);
                }
                None => self.record_no_face(),
            }
        }

        let audio = self
            .audio
            .as_ref()
            .map(|rx| *rx.borrow())
            .unwrap_or_default();
        Ok(self.compose(&audio))
    }

    fn record_face(&mut self, face: &FaceMetrics) {
        self.stats.frames_with_face += 1;
        debug!(
            eye_openness = face.eye_openness,
            yaw = face.head_yaw,
            pitch = face.head_pitch,
            roll = face.head_roll,
            smile = face.smile_probability,
            "Face detected"
        );

        self.eye_contact
            .push(eye_contact_score(face.eye_openness, face.head_yaw));
        self.smile.push(face.smile_probability);
        self.posture
            .push(posture_score(face.head_yaw, face.head_pitch, face.head_roll));

        if self.openness.len() == 3 {
            self.openness.pop_front();
        }
        self.openness.push_back(face.eye_openness);
        let samples: Vec<f64> = self.openness.iter().copied().collect();
        if detect_blink(&samples) {
            self.stats.blink_count += 1;
            debug!(blinks = self.stats.blink_count, "Blink");
        }
    }

    fn record_no_face(&mut self) {
        self.stats.frames_without_face += 1;
        debug!("No face in frame");
        self.eye_contact.push(0.0);
        if let Some(smile) = self.smile.last() {
            self.smile.push(smile);
        }
        if let Some(posture) = self.posture.last() {
            self.posture.push(posture);
        }
    }

    fn compose(&self, audio: &AudioMetrics) -> SessionMetrics {
        let now = now_ms();
        let timestamp = match self.last {
            Some(last) => now.max(last.timestamp + 1),
            None => now,
        };
        SessionMetrics::from_scores(
            self.eye_contact.smoothed(),
            self.smile.smoothed(),
            self.posture.smoothed(),
            audio,
            timestamp,
        )
    }

    fn on_failure(&mut self, error: TickError) -> SessionMetrics {
        self.stats.detection_failures += 1;
        self.stats.consecutive_failures += 1;
        let streak = self.stats.consecutive_failures;

        if streak == 1 {
            warn!("Tracking tick failed, re-emitting last snapshot: {}", error);
        } else {
            debug!(streak, "Tracking tick failed: {}", error);
        }
        if streak >= self.config.failure_warn_threshold && !self.streak_warned {
            self.streak_warned = true;
            warn!("{} consecutive tracking failures", streak);
        }

        match self.last {
            Some(last) => last,
            None => {
                let audio = self
                    .audio
                    .as_ref()
                    .map(|rx| *rx.borrow())
                    .unwrap_or_default();
                self.compose(&audio)
            }
        }
    }

    /// Tick at the configured refresh rate until `running` is cleared
    pub async fn run(mut self, running: Arc<AtomicBool>) -> TrackingStats {
        let mut interval = tokio::time::interval(self.config.tick_period());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.poll_model();

        info!(
            refresh_hz = self.config.refresh_hz,
            detection_stride = self.config.detection_stride,
            has_video = self.video.is_some(),
            has_audio = self.audio.is_some(),
            "Tracking loop started"
        );

        while running.load(Ordering::SeqCst) {
            interval.tick().await;
            if !running.load(Ordering::SeqCst) {
                break;
            }
            self.tick().await;
        }

        info!(
            ticks = self.stats.ticks,
            detections = self.stats.detection_ticks,
            faces = self.stats.frames_with_face,
            failures = self.stats.detection_failures,
            "Tracking loop stopped"
        );
        self.stats
    }

    /// Run on the current runtime
    pub fn spawn(self) -> TrackingHandle {
        let running = Arc::new(AtomicBool::new(true));
        let stats = self.subscribe_stats();
        let join = tokio::spawn(self.run(running.clone()));
        TrackingHandle {
            running,
            stats,
            join: Some(join),
        }
    }
}

/// Handle to a spawned tracking loop
pub struct TrackingHandle {
    running: Arc<AtomicBool>,
    stats: watch::Receiver<TrackingStats>,
    join: Option<JoinHandle<TrackingStats>>,
}

impl TrackingHandle {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> TrackingStats {
        self.stats.borrow().clone()
    }

    /// Ask the loop to stop; it exits at its next wake-up
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Stop and wait for the loop to exit
    pub async fn join(mut self) -> TrackingStats {
        self.stop();
        match self.join.take() {
            Some(join) => match join.await {
                Ok(stats) => stats,
                Err(e) => {
                    warn!("Tracking task ended abnormally: {}", e);
                    self.stats()
                }
            },
            None => self.stats(),
        }
    }
}

impl Drop for TrackingHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
