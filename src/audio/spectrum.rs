//! Microphone level from the frequency domain
//!
//! ## Algorithm
//! 1. Apply a Hann window to the block
//! 2. Zero-pad to the next power of two and run a forward FFT
//! 3. Convert each bin magnitude (scaled by 1/N) to dB
//! 4. Map [-100 dB, -30 dB] linearly to [0, 1] and average over the
//!    non-negative frequency bins

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;

/// Quietest level that maps above 0
const MIN_DB: f32 = -100.0;

/// Loudest level before saturating at 1
const MAX_DB: f32 = -30.0;

/// Planned FFT for one block size, reused across blocks
pub struct SpectrumAnalyzer {
    block_len: usize,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    buffer: Vec<Complex<f32>>,
}

impl SpectrumAnalyzer {
    pub fn new(block_len: usize) -> Self {
        let block_len = block_len.max(2);
        let n = block_len.next_power_of_two();

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(n);

        let window = (0..block_len)
            .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / block_len as f32).cos())
            .collect();

        Self {
            block_len,
            fft,
            window,
            buffer: vec![Complex::new(0.0, 0.0); n],
        }
    }

    pub fn block_len(&self) -> usize {
        self.block_len
    }

    /// Normalized level of one block in [0, 1].
    ///
    /// Samples past `block_len` are ignored; a short block is zero-padded.
    pub fn level(&mut self, samples: &[f32]) -> f64 {
        let n = self.buffer.len();

        for (i, slot) in self.buffer.iter_mut().enumerate() {
            let sample = match (samples.get(i), self.window.get(i)) {
                (Some(&s), Some(&w)) if s.is_finite() => s * w,
                _ => 0.0,
            };
            *slot = Complex::new(sample, 0.0);
        }

        self.fft.process(&mut self.buffer);

        let bins = n / 2;
        let scale = 1.0 / n as f32;
        let sum: f32 = self.buffer[..bins]
            .iter()
            .map(|c| {
                let db = 20.0 * (c.norm() * scale + 1e-10).log10();
                ((db - MIN_DB) / (MAX_DB - MIN_DB)).clamp(0.0, 1.0)
            })
            .sum();

        f64::from(sum / bins as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::fakes::noise;

    #[test]
    fn test_silence_is_zero() {
        let mut analyzer = SpectrumAnalyzer::new(100);
        assert_eq!(analyzer.level(&[0.0; 100]), 0.0);
        assert_eq!(analyzer.level(&[]), 0.0);
    }

    #[test]
    fn test_quiet_speech_above_threshold() {
        let mut analyzer = SpectrumAnalyzer::new(100);
        let level = analyzer.level(&noise(100, 0.01, 7));
        assert!(level > 0.1, "Expected audible level, got {}", level);
        assert!(level < 0.9);
    }

    #[test]
    fn test_louder_is_higher() {
        let mut analyzer = SpectrumAnalyzer::new(800);
        let quiet = analyzer.level(&noise(800, 0.001, 3));
        let loud = analyzer.level(&noise(800, 0.1, 3));
        assert!(loud > quiet, "loud {} <= quiet {}", loud, quiet);
    }

    #[test]
    fn test_full_scale_is_bounded() {
        let mut analyzer = SpectrumAnalyzer::new(256);
        let level = analyzer.level(&[1.0; 256]);
        assert!((0.0..=1.0).contains(&level));
        let level = analyzer.level(&noise(256, 1.0, 11));
        assert!((0.0..=1.0).contains(&level));
    }

    #[test]
    fn test_non_finite_samples_ignored() {
        let mut analyzer = SpectrumAnalyzer::new(64);
        let mut block = vec![0.0f32; 64];
        block[10] = f32::NAN;
        block[20] = f32::INFINITY;
        assert_eq!(analyzer.level(&block), 0.0);
    }
}
