use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use ringbuf::traits::{Producer as ProducerTrait, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use super::video::VideoSource;
use super::MediaError;
use crate::config::MediaConfig;

/// What the session asks the capture collaborator for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaConstraints {
    pub video_width: u32,
    pub video_height: u32,
    pub audio: bool,
    pub input_device_id: Option<String>,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self::from(&MediaConfig::default())
    }
}

impl From<&MediaConfig> for MediaConstraints {
    fn from(config: &MediaConfig) -> Self {
        Self {
            video_width: config.video_width,
            video_height: config.video_height,
            audio: config.audio_enabled,
            input_device_id: config.input_device_id.clone(),
        }
    }
}

/// Consumer side of the microphone ring buffer.
///
/// The capture callback pushes PCM and signals `ready`; the audio sampler
/// awaits `ready` and drains complete blocks.
pub struct AudioFeed {
    pub consumer: HeapCons<f32>,
    pub ready: Arc<Notify>,
    pub sample_rate: u32,
}

/// Hardware side of an audio track
pub trait AudioStream {
    /// Stop the stream. Must be idempotent.
    fn release(&mut self);
}

/// A live audio track: the hardware stream plus its not-yet-claimed feed
pub struct AudioTrack {
    stream: Box<dyn AudioStream>,
    feed: Option<AudioFeed>,
    sample_rate: u32,
}

impl AudioTrack {
    pub fn new(stream: Box<dyn AudioStream>, feed: AudioFeed) -> Self {
        Self {
            stream,
            sample_rate: feed.sample_rate,
            feed: Some(feed),
        }
    }

    /// Hand the feed to the sampler. Only the first call gets it.
    pub fn take_feed(&mut self) -> Option<AudioFeed> {
        self.feed.take()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn release(&mut self) {
        self.stream.release();
        // Wake a sampler parked on the feed so it can observe shutdown
        if let Some(feed) = &self.feed {
            feed.ready.notify_one();
        }
    }
}

/// Tracks granted by the capture collaborator
#[derive(Default)]
pub struct MediaTracks {
    pub video: Option<Arc<dyn VideoSource>>,
    pub audio: Option<AudioTrack>,
}

impl MediaTracks {
    pub fn release(mut self) {
        if let Some(video) = self.video.take() {
            video.release();
        }
        if let Some(mut audio) = self.audio.take() {
            audio.release();
        }
    }
}

/// Media capture collaborator: grants both tracks or denies.
pub trait MediaCapture {
    fn acquire(&self, constraints: &MediaConstraints) -> Result<MediaTracks, MediaError>;
}

type VideoFactory = Box<dyn Fn(&MediaConstraints) -> Result<Arc<dyn VideoSource>>>;

/// Microphone via cpal plus an optional video source factory
pub struct DeviceCapture {
    video: Option<VideoFactory>,
}

impl DeviceCapture {
    /// Microphone only
    pub fn audio_only() -> Self {
        Self { video: None }
    }

    pub fn with_video<F>(factory: F) -> Self
    where
        F: Fn(&MediaConstraints) -> Result<Arc<dyn VideoSource>> + 'static,
    {
        Self {
            video: Some(Box::new(factory)),
        }
    }

    fn open_microphone(constraints: &MediaConstraints) -> Result<AudioTrack> {
        let device = get_device(constraints.input_device_id.as_deref())?;
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        info!("Using audio device: {}", device_name);

        let selected = select_input_config(&device)?;
        let sample_rate = selected.config.sample_rate.0;

        let capacity = calculate_ring_buffer_capacity(sample_rate);
        let (producer, consumer) = HeapRb::<f32>::new(capacity).split();
        debug!("Ring buffer capacity: {} samples", capacity);

        let ready = Arc::new(Notify::new());
        let capture = MicrophoneCapture::new(
            &device,
            &selected.config,
            selected.sample_format,
            producer,
            ready.clone(),
        )?;
        capture.start()?;

        Ok(AudioTrack::new(
            Box::new(capture),
            AudioFeed {
                consumer,
                ready,
                sample_rate,
            },
        ))
    }
}

impl MediaCapture for DeviceCapture {
    fn acquire(&self, constraints: &MediaConstraints) -> Result<MediaTracks, MediaError> {
        let audio = if constraints.audio {
            let track = Self::open_microphone(constraints)
                .map_err(|e| MediaError::PermissionDenied(format!("{:#}", e)))?;
            Some(track)
        } else {
            None
        };

        let video = match &self.video {
            Some(factory) => match factory(constraints) {
                Ok(source) => Some(source),
                Err(e) => {
                    // Denial is all-or-nothing
                    if let Some(mut audio) = audio {
                        audio.release();
                    }
                    return Err(MediaError::PermissionDenied(format!("{:#}", e)));
                }
            },
            None => None,
        };

        Ok(MediaTracks { video, audio })
    }
}

/// Audio device information
#[derive(Debug, Clone)]
pub struct AudioDevice {
    pub id: String,
    pub name: String,
    pub is_default: bool,
}

/// List available input devices
pub fn list_input_devices() -> Result<Vec<AudioDevice>> {
    let host = cpal::default_host();
    let default_device = host.default_input_device();
    let default_name = default_device
        .as_ref()
        .and_then(|d| d.name().ok())
        .unwrap_or_default();

    let mut devices = Vec::new();

    for device in host.input_devices().context("Failed to enumerate input devices")? {
        if let Ok(name) = device.name() {
            let is_default = name == default_name;
            devices.push(AudioDevice {
                id: name.clone(),
                name,
                is_default,
            });
        }
    }

    Ok(devices)
}

/// Get device by ID (name) or return default
pub fn get_device(device_id: Option<&str>) -> Result<Device> {
    let host = cpal::default_host();

    match device_id {
        Some(id) if id != "default" => {
            for device in host.input_devices().context("Failed to enumerate devices")? {
                if let Ok(name) = device.name() {
                    if name == id {
                        return Ok(device);
                    }
                }
            }
            anyhow::bail!("Device not found: {}", id);
        }
        _ => host
            .default_input_device()
            .context("No default input device available"),
    }
}

/// Selected audio configuration with both stream config and sample format
pub struct SelectedConfig {
    pub config: StreamConfig,
    pub sample_format: SampleFormat,
}

/// Select the best input configuration for a device
pub fn select_input_config(device: &Device) -> Result<SelectedConfig> {
    // Prefer mono
    if let Ok(supported) = device.supported_input_configs() {
        for config_range in supported {
            if config_range.channels() == 1 {
                let supported_config = config_range.with_max_sample_rate();
                debug!(
                    "Selected mono config: {} Hz, format {:?}",
                    supported_config.sample_rate().0,
                    supported_config.sample_format()
                );
                return Ok(SelectedConfig {
                    config: supported_config.clone().into(),
                    sample_format: supported_config.sample_format(),
                });
            }
        }
    }

    // Fall back to default (will downmix in callback)
    let supported_config = device
        .default_input_config()
        .context("No default input config")?;
    debug!(
        "Using default config (will downmix): {} Hz, {} channels, format {:?}",
        supported_config.sample_rate().0,
        supported_config.channels(),
        supported_config.sample_format()
    );
    Ok(SelectedConfig {
        config: supported_config.clone().into(),
        sample_format: supported_config.sample_format(),
    })
}

/// Ring buffer capacity for the given sample rate
pub fn calculate_ring_buffer_capacity(device_sample_rate: u32) -> usize {
    const BUFFER_DURATION_SECONDS: u32 = 5;
    (device_sample_rate * BUFFER_DURATION_SECONDS) as usize
}

/// cpal input stream feeding the ring buffer
pub struct MicrophoneCapture {
    stream: Stream,
    overflow_counter: Arc<AtomicU64>,
    is_running: Arc<AtomicBool>,
    released: bool,
}

impl MicrophoneCapture {
    /// Build an input stream that writes to the given ring buffer producer
    pub fn new(
        device: &Device,
        config: &StreamConfig,
        sample_format: SampleFormat,
        mut producer: HeapProd<f32>,
        ready: Arc<Notify>,
    ) -> Result<Self> {
        let channels = config.channels as usize;
        let overflow_counter = Arc::new(AtomicU64::new(0));
        let overflow_clone = overflow_counter.clone();
        let is_running = Arc::new(AtomicBool::new(false));
        let running_clone = is_running.clone();

        info!(
            "Building input stream: {} Hz, {} channels, format {:?}",
            config.sample_rate.0, channels, sample_format
        );

        let error_callback = |err| {
            error!("Audio stream error: {}", err);
        };

        let stream = match sample_format {
            SampleFormat::F32 => device.build_input_stream(
                config,
                move |data: &[f32], _| {
                    if !running_clone.load(Ordering::Relaxed) {
                        return;
                    }
                    push_downmixed(data.iter().copied(), channels, &mut producer, &overflow_clone);
                    ready.notify_one();
                },
                error_callback,
                None,
            ),
            SampleFormat::I16 => device.build_input_stream(
                config,
                move |data: &[i16], _| {
                    if !running_clone.load(Ordering::Relaxed) {
                        return;
                    }
                    let samples = data.iter().map(|&s| s as f32 / 32768.0);
                    push_downmixed(samples, channels, &mut producer, &overflow_clone);
                    ready.notify_one();
                },
                error_callback,
                None,
            ),
            SampleFormat::U8 => device.build_input_stream(
                config,
                move |data: &[u8], _| {
                    if !running_clone.load(Ordering::Relaxed) {
                        return;
                    }
                    // u8 is unsigned: 0-255, with 128 as center
                    let samples = data.iter().map(|&s| (s as f32 - 128.0) / 128.0);
                    push_downmixed(samples, channels, &mut producer, &overflow_clone);
                    ready.notify_one();
                },
                error_callback,
                None,
            ),
            _ => anyhow::bail!("Unsupported sample format: {:?}", sample_format),
        }
        .context("Failed to build input stream")?;

        Ok(Self {
            stream,
            overflow_counter,
            is_running,
            released: false,
        })
    }

    /// Start capturing audio
    pub fn start(&self) -> Result<()> {
        self.is_running.store(true, Ordering::SeqCst);
        self.stream.play().context("Failed to start audio stream")?;
        info!("Audio capture started");
        Ok(())
    }

    /// Get overflow count
    pub fn overflow_count(&self) -> u64 {
        self.overflow_counter.load(Ordering::Relaxed)
    }
}

impl AudioStream for MicrophoneCapture {
    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.is_running.store(false, Ordering::SeqCst);
        if let Err(e) = self.stream.pause() {
            warn!("Failed to pause audio stream: {}", e);
        }
        if self.overflow_count() > 0 {
            warn!("Audio overflows detected: {}", self.overflow_count());
        }
        info!("Audio capture stopped");
    }
}

/// Push the first channel of each interleaved frame
fn push_downmixed<I>(samples: I, channels: usize, producer: &mut HeapProd<f32>, overflow_counter: &AtomicU64)
where
    I: Iterator<Item = f32>,
{
    for sample in samples.step_by(channels.max(1)) {
        if producer.try_push(sample).is_err() {
            overflow_counter.fetch_add(1, Ordering::Relaxed);
            break;
        }
    }
}
