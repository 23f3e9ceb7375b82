//! Live behavioral signals for interview practice
//!
//! Samples a camera and a microphone during a practice session and turns
//! them into bounded coaching scores (eye contact, smile, posture, speaking
//! ratio, filler rate), one snapshot per display refresh.

pub mod audio;
pub mod config;
pub mod face;
pub mod landmarks;
pub mod media;
pub mod scoring;
pub mod tracking;


pub use config::Config;
pub use tracking::{Coach, LiveSession, SessionMetrics, SessionSummary};
