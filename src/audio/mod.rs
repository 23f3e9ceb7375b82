//! Microphone speaking metrics

pub mod metrics;
pub mod sampler;
pub mod spectrum;

pub use metrics::{AudioMetrics, AudioMetricsExtractor, RollingVolumeHistory};
pub use sampler::{spawn_audio_sampler, AudioSampler, AudioSamplerHandle};
pub use spectrum::SpectrumAnalyzer;
