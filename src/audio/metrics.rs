use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::config::AudioConfig;

/// Speaking metrics over the rolling window
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioMetrics {
    /// Fraction of the window above the speaking threshold
    pub speaking_ratio: f64,
    /// Pause-then-resume events per minute of session
    pub filler_word_count: f64,
    /// Mean normalized level over the window
    pub average_volume: f64,
}

/// Bounded FIFO of normalized volume samples. Oldest is evicted first.
#[derive(Debug, Clone)]
pub struct RollingVolumeHistory {
    cap: usize,
    samples: VecDeque<f64>,
}

impl RollingVolumeHistory {
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            cap,
            samples: VecDeque::with_capacity(cap),
        }
    }

    pub fn push(&mut self, level: f64) {
        if self.samples.len() == self.cap {
            self.samples.pop_front();
        }
        self.samples.push_back(level);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn count_above(&self, threshold: f64) -> usize {
        self.samples.iter().filter(|&&s| s > threshold).count()
    }

    pub fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    pub fn iter(&self) -> impl Iterator<Item = &f64> {
        self.samples.iter()
    }
}

/// Turns a stream of block levels into `AudioMetrics`.
///
/// Timestamps are milliseconds on the audio clock and must not go backwards.
#[derive(Debug, Clone)]
pub struct AudioMetricsExtractor {
    history: RollingVolumeHistory,
    speaking_threshold: f64,
    filler_gap_ms: u64,
    last_speaking_ms: Option<u64>,
    filler_count: u64,
    elapsed_ms: u64,
}

impl AudioMetricsExtractor {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            history: RollingVolumeHistory::new(config.history_len),
            speaking_threshold: config.speaking_threshold,
            filler_gap_ms: config.filler_gap_ms,
            last_speaking_ms: None,
            filler_count: 0,
            elapsed_ms: 0,
        }
    }

    /// Record one level sample taken at `at_ms`
    pub fn push_level(&mut self, level: f64, at_ms: u64) {
        let level = if level.is_nan() { 0.0 } else { level.clamp(0.0, 1.0) };
        self.history.push(level);
        self.elapsed_ms = self.elapsed_ms.max(at_ms);

        if level > self.speaking_threshold {
            if let Some(last) = self.last_speaking_ms {
                if at_ms.saturating_sub(last) > self.filler_gap_ms {
                    self.filler_count += 1;
                }
            }
            self.last_speaking_ms = Some(at_ms);
        }
    }

    pub fn metrics(&self) -> AudioMetrics {
        let speaking_ratio = if self.history.is_empty() {
            0.0
        } else {
            self.history.count_above(self.speaking_threshold) as f64 / self.history.len() as f64
        };

        let filler_word_count = if self.elapsed_ms == 0 {
            0.0
        } else {
            self.filler_count as f64 * 60_000.0 / self.elapsed_ms as f64
        };

        AudioMetrics {
            speaking_ratio,
            filler_word_count,
            average_volume: self.history.mean(),
        }
    }

    /// Session-lifetime pause-then-resume count
    pub fn filler_count(&self) -> u64 {
        self.filler_count
    }

    pub fn history(&self) -> &RollingVolumeHistory {
        &self.history
    }

    /// Start over for a new session
    pub fn reset(&mut self) {
        self.history.clear();
        self.last_speaking_ms = None;
        self.filler_count = 0;
        self.elapsed_ms = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn extractor() -> AudioMetricsExtractor {
        AudioMetricsExtractor::new(&AudioConfig::default())
    }

    #[test]
    fn test_history_evicts_oldest() {
        let mut history = RollingVolumeHistory::new(3);
        for level in [0.1, 0.2, 0.3, 0.4] {
            history.push(level);
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.iter().copied().collect::<Vec<_>>(), vec![0.2, 0.3, 0.4]);
    }

    #[test]
    fn test_history_zero_capacity_holds_one() {
        let mut history = RollingVolumeHistory::new(0);
        history.push(0.5);
        history.push(0.6);
        assert_eq!(history.capacity(), 1);
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_empty_metrics() {
        assert_eq!(extractor().metrics(), AudioMetrics::default());
    }

    #[test]
    fn test_speaking_ratio() {
        let mut ex = extractor();
        for i in 0..10 {
            let level = if i % 2 == 0 { 0.3 } else { 0.0 };
            ex.push_level(level, i * 16);
        }
        let metrics = ex.metrics();
        assert!((metrics.speaking_ratio - 0.5).abs() < 1e-9);
        assert!((metrics.average_volume - 0.15).abs() < 1e-9);
    }

    #[test]
    fn test_threshold_is_strict() {
        let mut ex = extractor();
        ex.push_level(0.02, 16);
        assert_eq!(ex.metrics().speaking_ratio, 0.0);
    }

    #[test]
    fn test_window_capped() {
        let mut ex = extractor();
        for i in 0..500 {
            ex.push_level(0.5, i * 16);
        }
        assert_eq!(ex.history().len(), 120);
        assert_eq!(ex.metrics().speaking_ratio, 1.0);
    }

    #[test]
    fn test_filler_needs_prior_speech() {
        let mut ex = extractor();
        // First speech after a long silence is not a filler
        ex.push_level(0.0, 0);
        ex.push_level(0.5, 2_000);
        assert_eq!(ex.filler_count(), 0);
    }

    #[test]
    fn test_filler_after_gap() {
        let mut ex = extractor();
        ex.push_level(0.5, 1_000);
        ex.push_level(0.0, 1_200);
        ex.push_level(0.5, 1_400);
        assert_eq!(ex.filler_count(), 0, "400ms pause is not a filler");

        ex.push_level(0.0, 1_600);
        ex.push_level(0.5, 2_000);
        assert_eq!(ex.filler_count(), 1);

        // Exactly the gap does not count
        ex.push_level(0.5, 2_500);
        assert_eq!(ex.filler_count(), 1);
    }

    #[test]
    fn test_filler_rate_per_minute() {
        let mut ex = extractor();
        ex.push_level(0.5, 0);
        ex.push_level(0.5, 10_000);
        ex.push_level(0.5, 20_000);
        ex.push_level(0.0, 30_000);
        assert_eq!(ex.filler_count(), 2);
        // 2 events over 30 seconds
        assert!((ex.metrics().filler_word_count - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_reset() {
        let mut ex = extractor();
        ex.push_level(0.5, 0);
        ex.push_level(0.5, 1_000);
        ex.reset();
        assert_eq!(ex.filler_count(), 0);
        assert!(ex.history().is_empty());
        ex.push_level(0.5, 5_000);
        assert_eq!(ex.filler_count(), 0);
    }

    proptest! {
        #[test]
        fn prop_speaking_ratio_bounded(levels in proptest::collection::vec(any::<f64>(), 0..300)) {
            let mut ex = extractor();
            for (i, level) in levels.iter().enumerate() {
                ex.push_level(*level, i as u64 * 16);
            }
            let metrics = ex.metrics();
            prop_assert!((0.0..=1.0).contains(&metrics.speaking_ratio));
            prop_assert!((0.0..=1.0).contains(&metrics.average_volume));
            prop_assert!(ex.history().len() <= 120);
        }
    }
}
