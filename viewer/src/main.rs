use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use eduvision_common::capture::{self, CaptureError, FrameSource};
use eduvision_common::config::Config;
use eduvision_common::dispatch::{DetectError, Dispatcher};
use eduvision_common::logging;
use eduvision_common::overlay::{self, FpsCounter};
use eduvision_common::roboflow::RoboflowClient;
use eduvision_common::terminal::{self, Input, Screen, TerminalSession};
use tokio::time::Instant;
use tracing::{error, info};

const TITLE: &str = "Roboflow Camera Test - press 'q' to quit";

/// Live camera viewer with periodic uniform detection.
#[derive(Debug, Parser)]
#[command(name = "eduvision-viewer", version)]
struct Args {
    /// Path to the TOML config file.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

#[derive(Debug, thiserror::Error)]
enum ViewerError {
    #[error("failed to start async runtime: {0}")]
    Runtime(std::io::Error),
    #[error("camera error: {0}")]
    Capture(#[from] CaptureError),
    #[error("detector setup failed: {0}")]
    Detector(#[from] DetectError),
    #[error("terminal error: {0}")]
    Terminal(#[from] std::io::Error),
}

fn main() {
    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", args.config.display());
            std::process::exit(1);
        }
    };

    logging::init(&config.logging);

    info!(
        candidates = config.camera.candidates.len(),
        model = config.detector.model,
        interval_secs = config.detector.interval_secs,
        "starting viewer"
    );

    if let Err(e) = run(&config) {
        error!(error = %e, "viewer stopped");
        eprintln!("{e}");
        std::process::exit(1);
    }
    info!("viewer exited");
}

fn run(config: &Config) -> Result<(), ViewerError> {
    let runtime = tokio::runtime::Runtime::new().map_err(ViewerError::Runtime)?;

    let mut camera = capture::open_first_available(&config.camera, runtime.handle())?;
    let client = RoboflowClient::new(&config.detector)?;
    info!(url = client.url(), "detector ready");

    let mut dispatcher = Dispatcher::new(client, config.detector.interval(), runtime.handle().clone())
        .with_failure_warning(config.detector.warn_after_failures);
    let mut fps = FpsCounter::new();
    let mut session = TerminalSession::start(false)?;

    loop {
        let frame = match camera.read() {
            Ok(frame) => frame,
            Err(e) => {
                // Restore the terminal before the error is printed.
                drop(session);
                error!(camera = camera.describe(), error = %e, "failed to read frame");
                return Err(e.into());
            }
        };

        let now = Instant::now();
        let current_fps = fps.tick(now);
        dispatcher.tick(now, &frame);

        let snapshot = dispatcher.snapshot();
        let mut display = frame.to_rgb();
        let captions = match &snapshot.last_result {
            Some(detections) => {
                overlay::draw_detections(&mut display, detections);
                overlay::captions(detections)
            }
            None => Vec::new(),
        };
        let status = overlay::status_line(current_fps, &snapshot, now);

        session.draw(&Screen {
            title: TITLE,
            image: &display,
            captions: &captions,
            status: &status,
        })?;

        if terminal::poll_input(Duration::from_millis(1))? == Some(Input::Quit) {
            info!(dispatched = dispatcher.dispatched(), "quit requested");
            break;
        }
    }

    Ok(())
}
