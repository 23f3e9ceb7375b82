//! Camera and microphone ownership
//!
//! `MediaSession` owns the tracks granted by a `MediaCapture` collaborator
//! for the lifetime of one tracking session and releases them exactly once.

pub mod capture;
pub mod session;
pub mod video;

#[cfg(test)]
pub(crate) mod fakes;

pub use capture::{
    list_input_devices, AudioDevice, AudioFeed, AudioStream, AudioTrack, DeviceCapture,
    MediaCapture, MediaConstraints, MediaTracks,
};
pub use session::{MediaSession, MediaState};
pub use video::{CaptureError, DirectoryVideoSource, VideoFrame, VideoSource};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Media session error types
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum MediaError {
    /// The capture collaborator refused the tracks. The cause is not differentiated.
    #[error("Media permission denied: {0}")]
    PermissionDenied(String),
    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),
}
