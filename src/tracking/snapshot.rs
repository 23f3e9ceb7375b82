use serde::{Deserialize, Serialize};

use crate::audio::AudioMetrics;
use crate::scoring::to_percent;

/// One merged snapshot, emitted once per tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetrics {
    pub eye_contact: u8,
    pub smile: u8,
    pub posture: u8,
    pub speaking_ratio: u8,
    /// Pause-then-resume events per minute
    pub filler_words: f64,
    /// Epoch milliseconds
    pub timestamp: i64,
}

impl SessionMetrics {
    /// Snapshot from [0, 1] face scores and the current audio metrics
    pub fn from_scores(
        eye_contact: f64,
        smile: f64,
        posture: f64,
        audio: &AudioMetrics,
        timestamp: i64,
    ) -> Self {
        Self {
            eye_contact: to_percent(eye_contact),
            smile: to_percent(smile),
            posture: to_percent(posture),
            speaking_ratio: to_percent(audio.speaking_ratio),
            filler_words: if audio.filler_word_count.is_finite() {
                audio.filler_word_count.max(0.0)
            } else {
                0.0
            },
            timestamp,
        }
    }
}

impl Default for SessionMetrics {
    fn default() -> Self {
        Self {
            eye_contact: 0,
            smile: 0,
            posture: 0,
            speaking_ratio: 0,
            filler_words: 0.0,
            timestamp: 0,
        }
    }
}

/// Current wall-clock time in epoch milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
