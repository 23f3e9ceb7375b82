use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use super::sink::{MetricsSink, OverlaySink, SessionAccumulator, SessionSummary};
use super::snapshot::{now_ms, SessionMetrics};
use super::tracker::{TrackingHandle, TrackingLoop, TrackingStats};
use crate::audio::{spawn_audio_sampler, AudioSamplerHandle};
use crate::config::Config;
use crate::landmarks::SharedLandmarkModel;
use crate::media::{MediaCapture, MediaConstraints, MediaError, MediaSession, MediaState};

/// One running tracking session: hardware, audio sampler, tracking loop and
/// the built-in overlay and accumulator sinks.
pub struct LiveSession {
    media: MediaSession,
    tracking: Option<TrackingHandle>,
    sampler: Option<AudioSamplerHandle>,
    overlay: Arc<OverlaySink>,
    accumulator: Arc<SessionAccumulator>,
    summary: Option<SessionSummary>,
}

impl LiveSession {
    /// Acquire media and start tracking. Must be called inside a Tokio runtime.
    ///
    /// A capture denial still yields a running session in degraded mode.
    pub fn start(
        config: &Config,
        capture: &dyn MediaCapture,
        model: Option<Arc<SharedLandmarkModel>>,
        sinks: Vec<Arc<dyn MetricsSink>>,
    ) -> Result<Self, MediaError> {
        let mut media = MediaSession::new();
        let constraints = MediaConstraints::from(&config.media);
        let state = media.start(capture, &constraints)?;

        let session_id = media.session_id().unwrap_or_default().to_string();
        let overlay = Arc::new(OverlaySink::new());
        let accumulator = SessionAccumulator::new(session_id.clone());

        let mut tracker = TrackingLoop::new(config.tracking.clone(), config.face.clone())
            .with_video(media.video())
            .with_sink(overlay.clone())
            .with_sink(accumulator.clone());
        for sink in sinks {
            tracker = tracker.with_sink(sink);
        }
        if let Some(model) = model {
            tracker = tracker.with_model(model);
        }

        let sampler = match media.take_audio_feed() {
            Some(feed) => {
                let (handle, rx) = spawn_audio_sampler(feed, &config.audio);
                tracker = tracker.with_audio(rx);
                Some(handle)
            }
            None => None,
        };

        info!(session_id = %session_id, state = ?state, "Live session started");

        Ok(Self {
            media,
            tracking: Some(tracker.spawn()),
            sampler,
            overlay,
            accumulator,
            summary: None,
        })
    }

    pub fn session_id(&self) -> &str {
        self.media.session_id().unwrap_or_default()
    }

    pub fn media_state(&self) -> MediaState {
        self.media.state()
    }

    /// Tracking loop still running
    pub fn is_live(&self) -> bool {
        self.summary.is_none() && self.media.is_live()
    }

    pub fn overlay(&self) -> watch::Receiver<Option<SessionMetrics>> {
        self.overlay.subscribe()
    }

    pub fn latest(&self) -> Option<SessionMetrics> {
        self.overlay.latest()
    }

    pub fn stats(&self) -> Option<TrackingStats> {
        self.tracking.as_ref().map(|t| t.stats())
    }

    /// Permission withdrawn mid-session: release the hardware and keep
    /// emitting the last known snapshot.
    pub fn revoke(&mut self, reason: &str) {
        warn!(session_id = %self.session_id(), "Media revoked: {}", reason);
        self.media.degrade(reason);
    }

    /// Stop tracking, release hardware and return the session summary.
    /// Later calls return the same summary.
    pub async fn stop(&mut self) -> SessionSummary {
        if let Some(summary) = &self.summary {
            return summary.clone();
        }

        let stats = match self.tracking.take() {
            Some(handle) => Some(handle.join().await),
            None => None,
        };
        if let Some(sampler) = self.sampler.take() {
            sampler.shutdown().await;
        }
        self.media.stop();

        let blinks = stats.as_ref().map(|s| s.blink_count).unwrap_or(0);
        let summary = self.accumulator.summary(blinks, Some(now_ms()));
        info!(
            session_id = %summary.session_id,
            snapshots = summary.snapshot_count,
            "Live session stopped"
        );
        self.summary = Some(summary.clone());
        summary
    }
}

/// Keeps at most one live session at a time
pub struct Coach {
    config: Config,
    model: Option<Arc<SharedLandmarkModel>>,
    active: Option<LiveSession>,
}

impl Coach {
    pub fn new(config: Config, model: Option<Arc<SharedLandmarkModel>>) -> Self {
        Self {
            config,
            model,
            active: None,
        }
    }

    /// Start a new session, stopping the current one first.
    ///
    /// Returns the summary of the session that was replaced, if any.
    pub async fn start(
        &mut self,
        capture: &dyn MediaCapture,
        sinks: Vec<Arc<dyn MetricsSink>>,
    ) -> Result<Option<SessionSummary>, MediaError> {
        let previous = self.stop().await;
        let session = LiveSession::start(&self.config, capture, self.model.clone(), sinks)?;
        self.active = Some(session);
        Ok(previous)
    }

    pub fn active(&self) -> Option<&LiveSession> {
        self.active.as_ref()
    }

    pub fn active_mut(&mut self) -> Option<&mut LiveSession> {
        self.active.as_mut()
    }

    pub async fn stop(&mut self) -> Option<SessionSummary> {
        let mut session = self.active.take()?;
        Some(session.stop().await)
    }
}
