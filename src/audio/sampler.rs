//! Audio sampler task
//!
//! Drains the microphone ring buffer in fixed blocks whenever the capture
//! callback signals new data, folds each block's level into an
//! `AudioMetricsExtractor`, and publishes the latest `AudioMetrics` on a
//! watch channel. The tracking loop only ever reads that channel.

use ringbuf::traits::{Consumer as ConsumerTrait, Observer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use super::metrics::{AudioMetrics, AudioMetricsExtractor};
use super::spectrum::SpectrumAnalyzer;
use crate::config::AudioConfig;
use crate::media::AudioFeed;

/// Samples per level block
pub fn block_len(sample_rate: u32, blocks_per_second: u32) -> usize {
    (sample_rate / blocks_per_second.max(1)).max(1) as usize
}

/// Owns the consumer side of the microphone feed
pub struct AudioSampler {
    feed: AudioFeed,
    analyzer: SpectrumAnalyzer,
    extractor: AudioMetricsExtractor,
    block: Vec<f32>,
    samples_consumed: u64,
    tx: watch::Sender<AudioMetrics>,
}

impl AudioSampler {
    pub fn new(feed: AudioFeed, config: &AudioConfig) -> (Self, watch::Receiver<AudioMetrics>) {
        let len = block_len(feed.sample_rate, config.blocks_per_second);
        let (tx, rx) = watch::channel(AudioMetrics::default());
        let sampler = Self {
            analyzer: SpectrumAnalyzer::new(len),
            extractor: AudioMetricsExtractor::new(config),
            block: vec![0.0; len],
            samples_consumed: 0,
            feed,
            tx,
        };
        (sampler, rx)
    }

    /// Process every complete block in the ring buffer.
    ///
    /// Returns the number of blocks processed; publishes once if any were.
    pub fn drain(&mut self) -> usize {
        let len = self.block.len();
        let sample_rate = u64::from(self.feed.sample_rate.max(1));
        let mut blocks = 0;

        while self.feed.consumer.occupied_len() >= len {
            let read = self.feed.consumer.pop_slice(&mut self.block);
            self.samples_consumed += read as u64;

            let level = self.analyzer.level(&self.block[..read]);
            let at_ms = self.samples_consumed * 1000 / sample_rate;
            self.extractor.push_level(level, at_ms);
            trace!(level, at_ms, "Audio block");
            blocks += 1;
        }

        if blocks > 0 {
            self.tx.send_replace(self.extractor.metrics());
        }
        blocks
    }

    /// Run until `running` is cleared. Wakes on every capture notification.
    pub async fn run(mut self, running: Arc<AtomicBool>) {
        let ready = self.feed.ready.clone();
        info!(
            sample_rate = self.feed.sample_rate,
            block_len = self.block.len(),
            "Audio sampler started"
        );

        while running.load(Ordering::SeqCst) {
            ready.notified().await;
            if !running.load(Ordering::SeqCst) {
                break;
            }
            self.drain();
        }

        info!(
            fillers = self.extractor.filler_count(),
            "Audio sampler stopped after {} samples", self.samples_consumed
        );
    }
}

/// Handle to a spawned sampler task
pub struct AudioSamplerHandle {
    running: Arc<AtomicBool>,
    ready: Arc<Notify>,
    join: Option<JoinHandle<()>>,
}

impl AudioSamplerHandle {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Clear the running flag and wake the task so it can exit
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.ready.notify_one();
    }

    /// Stop and wait for the task to finish
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                debug!("Audio sampler task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for AudioSamplerHandle {
    fn drop(&mut self) {
        self.stop();
        if let Some(join) = self.join.take() {
            join.abort();
        }
    }
}

/// Spawn the sampler on the current runtime
pub fn spawn_audio_sampler(
    feed: AudioFeed,
    config: &AudioConfig,
) -> (AudioSamplerHandle, watch::Receiver<AudioMetrics>) {
    let ready = feed.ready.clone();
    let (sampler, rx) = AudioSampler::new(feed, config);
    let running = Arc::new(AtomicBool::new(true));
    let join = tokio::spawn(sampler.run(running.clone()));

    (
        AudioSamplerHandle {
            running,
            ready,
            join: Some(join),
        },
        rx,
    )
}
