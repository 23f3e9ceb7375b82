//! In-memory media collaborators for tests

use async_trait::async_trait;
use image::RgbImage;
use ringbuf::traits::{Producer as ProducerTrait, Split};
use ringbuf::{HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use super::capture::{AudioFeed, AudioStream, AudioTrack, MediaCapture, MediaConstraints, MediaTracks};
use super::video::{CaptureError, VideoFrame, VideoSource};
use super::MediaError;

/// Blank frames on demand; can be revoked mid-session
pub(crate) struct ScriptedVideoSource {
    width: u32,
    height: u32,
    next: AtomicU64,
    revoked: AtomicBool,
    releases: AtomicUsize,
}

impl ScriptedVideoSource {
    pub fn new(width: u32, height: u32) -> Arc<Self> {
        Arc::new(Self {
            width,
            height,
            next: AtomicU64::new(0),
            revoked: AtomicBool::new(false),
            releases: AtomicUsize::new(0),
        })
    }

    /// Simulate the user withdrawing camera permission
    pub fn revoke(&self) {
        self.revoked.store(true, Ordering::SeqCst);
    }

    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn frames_captured(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VideoSource for ScriptedVideoSource {
    async fn capture_frame(&self) -> Result<VideoFrame, CaptureError> {
        if self.revoked.load(Ordering::SeqCst) {
            return Err(CaptureError::Revoked);
        }
        let sequence = self.next.fetch_add(1, Ordering::SeqCst);
        Ok(VideoFrame::new(
            RgbImage::new(self.width, self.height),
            sequence,
            sequence * 16,
        ))
    }

    fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.revoked.store(true, Ordering::SeqCst);
    }
}

struct CountingStream {
    releases: Arc<AtomicUsize>,
}

impl AudioStream for CountingStream {
    fn release(&mut self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Grants a scripted video source and an in-memory microphone, or denies
pub(crate) struct FakeCapture {
    deny: bool,
    video: Option<Arc<ScriptedVideoSource>>,
    audio: bool,
    sample_rate: u32,
    producer: Mutex<Option<(HeapProd<f32>, Arc<Notify>)>>,
    audio_releases: Arc<AtomicUsize>,
    acquisitions: AtomicUsize,
}

impl FakeCapture {
    pub fn granting(video: Option<Arc<ScriptedVideoSource>>, audio: bool) -> Self {
        Self {
            deny: false,
            video,
            audio,
            sample_rate: 6000,
            producer: Mutex::new(None),
            audio_releases: Arc::new(AtomicUsize::new(0)),
            acquisitions: AtomicUsize::new(0),
        }
    }

    pub fn denying() -> Self {
        Self {
            deny: true,
            ..Self::granting(None, false)
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Feed PCM into the granted microphone as a capture callback would
    pub fn push_audio(&self, samples: &[f32]) -> usize {
        let mut guard = self.producer.lock().unwrap();
        match guard.as_mut() {
            Some((producer, ready)) => {
                let pushed = producer.push_slice(samples);
                ready.notify_one();
                pushed
            }
            None => 0,
        }
    }

    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    pub fn audio_release_count(&self) -> usize {
        self.audio_releases.load(Ordering::SeqCst)
    }
}

impl MediaCapture for FakeCapture {
    fn acquire(&self, constraints: &MediaConstraints) -> Result<MediaTracks, MediaError> {
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        if self.deny {
            return Err(MediaError::PermissionDenied("denied by user".to_string()));
        }

        let audio = if self.audio && constraints.audio {
            let (producer, consumer) = HeapRb::<f32>::new(self.sample_rate as usize * 5).split();
            let ready = Arc::new(Notify::new());
            *self.producer.lock().unwrap() = Some((producer, ready.clone()));
            Some(AudioTrack::new(
                Box::new(CountingStream {
                    releases: self.audio_releases.clone(),
                }),
                AudioFeed {
                    consumer,
                    ready,
                    sample_rate: self.sample_rate,
                },
            ))
        } else {
            None
        };

        Ok(MediaTracks {
            video: self.video.clone().map(|v| v as Arc<dyn VideoSource>),
            audio,
        })
    }
}

/// Deterministic broadband noise in [-amplitude, amplitude]
pub(crate) fn noise(len: usize, amplitude: f32, seed: u32) -> Vec<f32> {
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            let unit = (state >> 8) as f32 / (1u32 << 24) as f32;
            (unit * 2.0 - 1.0) * amplitude
        })
        .collect()
}
