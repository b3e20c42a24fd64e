//! PlaneCalibrate - ground-plane perspective calibration
//!
//! Loads an image (or the first frame of a video), lets the operator click
//! four points of a planar region in a browser, extends the region's side
//! edges down to the bottom of the frame, previews the rectified view and
//! saves the resulting source quadrilateral for a downstream tracking
//! pipeline.

mod calibration;
mod config;
mod error;
mod input;
mod npy;
mod overlay;
mod server;
mod session;
mod transform;

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::Config;
use crate::input::FrameSource;
use crate::server::AppState;
use crate::session::{run_event_loop, CalibrationSession, SessionOptions};

/// Pending commands the UI may queue ahead of the session
const COMMAND_QUEUE: usize = 32;

/// PlaneCalibrate - click four points, get a rectifying source quadrilateral
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(group(ArgGroup::new("source").required(true).args(["video", "image"])))]
struct Args {
    /// Path to video file (its first frame is used)
    #[arg(long)]
    video: Option<PathBuf>,

    /// Path to image file
    #[arg(long)]
    image: Option<PathBuf>,

    /// Configuration file path
    #[arg(short, long, default_value = "planecalibrate.toml")]
    config: PathBuf,

    /// Web UI host (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Web UI port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Where to save the source points (overrides config)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn frame_source(&self) -> Option<FrameSource> {
        match (&self.video, &self.image) {
            (Some(video), _) => Some(FrameSource::Video(video.clone())),
            (None, Some(image)) => Some(FrameSource::Image(image.clone())),
            (None, None) => None,
        }
    }

    /// Apply command line overrides on top of the file configuration
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(output) = &self.output {
            config.output.points_file = output.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let _subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    info!("PlaneCalibrate v{}", env!("CARGO_PKG_VERSION"));

    let result = run(args).await;
    if let Err(e) = &result {
        error!("Error: {:#}", e);
    }
    result
}

async fn run(args: Args) -> Result<()> {
    let mut config = Config::load_or_create(&args.config)?;
    args.apply_overrides(&mut config);

    let source = args
        .frame_source()
        .context("Please provide either --video or --image argument")?;
    let image_path = source
        .resolve(&config.input.first_frame)
        .context("Failed to prepare calibration input")?;

    let session = CalibrationSession::open(&image_path, SessionOptions::from(&config))
        .with_context(|| format!("Failed to start calibration on {}", image_path.display()))?;

    let (commands, requests) = mpsc::channel(COMMAND_QUEUE);
    let state = Arc::new(AppState::new(commands, config.output.jpeg_quality));

    // The session thread owns all calibration state
    let (done_tx, done_rx) = oneshot::channel::<()>();
    let surface = state.clone();
    std::thread::Builder::new()
        .name("calibration-session".to_string())
        .spawn(move || {
            run_event_loop(session, surface.as_ref(), requests);
            let _ = done_tx.send(());
        })
        .context("Failed to spawn session thread")?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Open http://{} in a browser to calibrate", addr);

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let mut server_handle = tokio::spawn(async move {
        server::run_server(&addr, state, async {
            let _ = stop_rx.await;
        })
        .await
    });

    tokio::select! {
        _ = done_rx => {
            info!("Calibration finished");
        }
        result = &mut server_handle => {
            return match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.context("Web server failed")),
                Err(e) => Err(anyhow::anyhow!("Web server task panicked: {}", e)),
            };
        }
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            info!("Interrupted, exiting");
        }
    }

    let _ = stop_tx.send(());
    match server_handle.await {
        Ok(Ok(())) => info!("Server exited normally"),
        Ok(Err(e)) => error!("Server error: {}", e),
        Err(e) => error!("Server task panicked: {}", e),
    }

    Ok(())
}
