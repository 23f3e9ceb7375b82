use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use interview_signals::config::Config;
use interview_signals::landmarks::{FaceMeshConfig, FaceMeshLoader, SharedLandmarkModel};
use interview_signals::media::{list_input_devices, DeviceCapture, DirectoryVideoSource, VideoSource};
use interview_signals::tracking::{Coach, SessionMetrics};

/// Headless CLI for live interview-practice signals
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the config file (defaults to ~/.interview-signals/config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory of JPEG frames to replay as the camera
    #[arg(short, long)]
    frames: Option<PathBuf>,

    /// Path to the face mesh model file (.onnx)
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// Input device ID (use "default" or run with --list-devices)
    #[arg(short, long, default_value = "default")]
    device: String,

    /// Stop after this many seconds (runs until Ctrl+C otherwise)
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Write the session summary JSON to this path
    #[arg(long)]
    summary: Option<PathBuf>,

    /// List available input devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    // Handle --list-devices
    if args.list_devices {
        return list_devices_and_exit();
    }

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => Config::default_config_path()?,
    };
    let mut config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    if args.device != "default" {
        config.media.input_device_id = Some(args.device.clone());
    }
    if let Some(model) = &args.model {
        config.model_path = Some(model.clone());
    }

    info!("Interview signals starting...");
    info!("Config: {:?}", config_path);
    info!("Device: {}", args.device);

    // Face tracking needs both a camera and a model
    let (capture, model) = match &args.frames {
        Some(dir) => {
            let model_path = config.get_model_path()?;
            info!("Frames: {:?}", dir);
            info!("Model: {:?}", model_path);
            if !model_path.exists() {
                warn!("Face mesh model not found at {:?}; face metrics will be unavailable", model_path);
            }

            let dir = dir.clone();
            let capture = DeviceCapture::with_video(move |_| {
                let source = DirectoryVideoSource::open(&dir)?;
                Ok(Arc::new(source) as Arc<dyn VideoSource>)
            });
            let loader = FaceMeshLoader::new(FaceMeshConfig {
                model_path,
                n_threads: config.face.n_threads,
                presence_threshold: config.face.presence_threshold,
            });
            (capture, Some(SharedLandmarkModel::new(loader)))
        }
        None => (DeviceCapture::audio_only(), None),
    };

    let mut coach = Coach::new(config, model);
    coach.start(&capture, Vec::new()).await?;

    let mut overlay = match coach.active() {
        Some(session) => {
            info!("Session {} ({:?})", session.session_id(), session.media_state());
            session.overlay()
        }
        None => anyhow::bail!("Session failed to start"),
    };

    println!("\nTracking... Press Ctrl+C to stop.\n");

    let deadline = async {
        match args.duration_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    let mut print_interval = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, stopping...");
                break;
            }
            _ = &mut deadline => {
                info!("Duration reached, stopping...");
                break;
            }
            _ = print_interval.tick() => {
                let latest = *overlay.borrow_and_update();
                if let Some(metrics) = latest {
                    print_metrics(&metrics);
                }
            }
        }
    }

    let summary = match coach.stop().await {
        Some(summary) => summary,
        None => anyhow::bail!("No active session to stop"),
    };

    // Print summary
    println!("\n--- Session Summary ---");
    let json = serde_json::to_string_pretty(&summary).context("Failed to serialize summary")?;
    println!("{}", json);

    if let Some(path) = &args.summary {
        std::fs::write(path, &json)
            .with_context(|| format!("Failed to write summary to {:?}", path))?;
        info!("Summary written to {:?}", path);
    }

    info!("Session complete");
    Ok(())
}

fn print_metrics(metrics: &SessionMetrics) {
    println!(
        "eye contact {:>3}  smile {:>3}  posture {:>3}  speaking {:>3}  fillers/min {:>5.1}",
        metrics.eye_contact,
        metrics.smile,
        metrics.posture,
        metrics.speaking_ratio,
        metrics.filler_words
    );
}

fn list_devices_and_exit() -> Result<()> {
    println!("Available input devices:\n");

    match list_input_devices() {
        Ok(devices) => {
            if devices.is_empty() {
                println!("  No input devices found.");
            } else {
                for device in devices {
                    let default_marker = if device.is_default { " (default)" } else { "" };
                    println!("  - {}{}", device.name, default_marker);
                }
            }
        }
        Err(e) => {
            error!("Failed to list devices: {}", e);
            println!("  Error: {}", e);
        }
    }

    Ok(())
}
