use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::capture::{AudioFeed, MediaCapture, MediaConstraints, MediaTracks};
use super::video::VideoSource;
use super::MediaError;

/// Media session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaState {
    Idle,
    Acquiring,
    /// Both requested tracks are live
    Active,
    /// Running without hardware ("no signal" mode)
    Degraded,
    Stopped,
}

/// Owns the camera and microphone tracks of one tracking session
pub struct MediaSession {
    state: MediaState,
    tracks: Option<MediaTracks>,
    start_time: Option<Instant>,
    /// Unique session ID for log correlation
    session_id: Option<String>,
    degraded_reason: Option<String>,
}

impl MediaSession {
    pub fn new() -> Self {
        Self {
            state: MediaState::Idle,
            tracks: None,
            start_time: None,
            session_id: None,
            degraded_reason: None,
        }
    }

    /// Acquire tracks from `capture`.
    ///
    /// Denial is not an error: the session moves to `Degraded` and the
    /// returned state says so. Only starting twice is rejected.
    pub fn start(
        &mut self,
        capture: &dyn MediaCapture,
        constraints: &MediaConstraints,
    ) -> Result<MediaState, MediaError> {
        if self.state != MediaState::Idle {
            return Err(MediaError::InvalidTransition(format!(
                "Cannot start from state {:?}",
                self.state
            )));
        }

        let session_id = uuid::Uuid::new_v4().to_string();
        info!(session_id = %session_id, "Media session transitioning to Acquiring");
        self.state = MediaState::Acquiring;
        self.session_id = Some(session_id);
        self.start_time = Some(Instant::now());

        match capture.acquire(constraints) {
            Ok(tracks) => {
                info!(
                    has_video = tracks.video.is_some(),
                    has_audio = tracks.audio.is_some(),
                    "Media session transitioning to Active"
                );
                self.tracks = Some(tracks);
                self.state = MediaState::Active;
            }
            Err(e) => {
                warn!("Media acquisition failed, running degraded: {}", e);
                self.degraded_reason = Some(e.to_string());
                self.state = MediaState::Degraded;
            }
        }

        Ok(self.state)
    }

    /// Video track, if one was granted and is still held
    pub fn video(&self) -> Option<Arc<dyn VideoSource>> {
        self.tracks.as_ref().and_then(|t| t.video.clone())
    }

    /// Claim the microphone feed. Only the first call gets it.
    pub fn take_audio_feed(&mut self) -> Option<AudioFeed> {
        self.tracks
            .as_mut()
            .and_then(|t| t.audio.as_mut())
            .and_then(|a| a.take_feed())
    }

    /// Drop to no-signal mode mid-session, releasing whatever is held.
    pub fn degrade(&mut self, reason: &str) {
        if self.state != MediaState::Active {
            debug!("Ignoring degrade in state {:?}", self.state);
            return;
        }
        warn!("Media session degraded: {}", reason);
        self.release_tracks();
        self.degraded_reason = Some(reason.to_string());
        self.state = MediaState::Degraded;
    }

    /// Release hardware and move to `Stopped`.
    ///
    /// Returns false when there was nothing to stop, so repeated calls are no-ops.
    pub fn stop(&mut self) -> bool {
        match self.state {
            MediaState::Active | MediaState::Degraded | MediaState::Acquiring => {
                info!("Media session transitioning to Stopped");
                self.release_tracks();
                self.state = MediaState::Stopped;
                true
            }
            MediaState::Idle | MediaState::Stopped => false,
        }
    }

    fn release_tracks(&mut self) {
        if let Some(tracks) = self.tracks.take() {
            tracks.release();
            debug!("Media tracks released");
        }
    }

    pub fn state(&self) -> MediaState {
        self.state
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn degraded_reason(&self) -> Option<&str> {
        self.degraded_reason.as_deref()
    }

    /// Active or Degraded
    pub fn is_live(&self) -> bool {
        matches!(self.state, MediaState::Active | MediaState::Degraded)
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start_time
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0)
    }
}

impl Default for MediaSession {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MediaSession {
    fn drop(&mut self) {
        self.release_tracks();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::fakes::{FakeCapture, ScriptedVideoSource};

    #[test]
    fn test_start_granted_is_active() {
        let video = ScriptedVideoSource::new(64, 48);
        let capture = FakeCapture::granting(Some(video.clone()), true);
        let mut session = MediaSession::new();
        assert_eq!(session.state(), MediaState::Idle);

        let state = session.start(&capture, &MediaConstraints::default()).unwrap();
        assert_eq!(state, MediaState::Active);
        assert!(session.is_live());
        assert!(session.session_id().is_some());
        assert!(session.video().is_some());
        assert!(session.take_audio_feed().is_some());
        assert!(session.take_audio_feed().is_none());
    }

    #[test]
    fn test_start_denied_is_degraded() {
        let capture = FakeCapture::denying();
        let mut session = MediaSession::new();

        let state = session.start(&capture, &MediaConstraints::default()).unwrap();
        assert_eq!(state, MediaState::Degraded);
        assert!(session.is_live());
        assert!(session.video().is_none());
        assert!(session.take_audio_feed().is_none());
        assert!(session.degraded_reason().unwrap().contains("denied"));
    }

    #[test]
    fn test_double_start_rejected() {
        let capture = FakeCapture::granting(None, true);
        let mut session = MediaSession::new();
        session.start(&capture, &MediaConstraints::default()).unwrap();

        let err = session.start(&capture, &MediaConstraints::default()).unwrap_err();
        assert!(matches!(err, MediaError::InvalidTransition(_)));
        assert_eq!(session.state(), MediaState::Active);
        assert_eq!(capture.acquisitions(), 1);
    }

    #[test]
    fn test_stop_releases_exactly_once() {
        let video = ScriptedVideoSource::new(64, 48);
        let capture = FakeCapture::granting(Some(video.clone()), true);
        let mut session = MediaSession::new();
        session.start(&capture, &MediaConstraints::default()).unwrap();

        assert!(session.stop());
        assert!(!session.stop());
        drop(session);

        assert_eq!(video.release_count(), 1);
        assert_eq!(capture.audio_release_count(), 1);
    }

    #[test]
    fn test_stop_from_idle_is_noop() {
        let mut session = MediaSession::new();
        assert!(!session.stop());
        assert_eq!(session.state(), MediaState::Idle);
    }

    #[test]
    fn test_stop_degraded() {
        let capture = FakeCapture::denying();
        let mut session = MediaSession::new();
        session.start(&capture, &MediaConstraints::default()).unwrap();

        assert!(session.stop());
        assert_eq!(session.state(), MediaState::Stopped);
        assert!(!session.is_live());
    }

    #[test]
    fn test_drop_releases() {
        let video = ScriptedVideoSource::new(64, 48);
        let capture = FakeCapture::granting(Some(video.clone()), true);
        {
            let mut session = MediaSession::new();
            session.start(&capture, &MediaConstraints::default()).unwrap();
        }
        assert_eq!(video.release_count(), 1);
        assert_eq!(capture.audio_release_count(), 1);
    }

    #[test]
    fn test_degrade_releases_then_stop_is_clean() {
        let video = ScriptedVideoSource::new(64, 48);
        let capture = FakeCapture::granting(Some(video.clone()), true);
        let mut session = MediaSession::new();
        session.start(&capture, &MediaConstraints::default()).unwrap();

        session.degrade("camera revoked");
        assert_eq!(session.state(), MediaState::Degraded);
        assert!(session.video().is_none());
        assert_eq!(video.release_count(), 1);

        assert!(session.stop());
        assert_eq!(video.release_count(), 1);
        assert_eq!(capture.audio_release_count(), 1);
    }
}
