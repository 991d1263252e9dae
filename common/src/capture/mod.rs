//! Camera capture over HTTP.
//!
//! Cameras publish either an MJPEG multipart stream or a single-JPEG snapshot
//! endpoint. A background task on the Tokio runtime pulls bytes and hands
//! complete JPEGs over a small channel; [`FrameSource::read`] blocks the
//! calling (render) thread until the next frame and decodes it there.

pub mod mjpeg;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::CameraConfig;
use crate::frame::{Frame, FrameError};

/// Anything the capture loop can pull frames from.
pub trait FrameSource {
    /// Block until the next frame. Errors are fatal for the capture loop.
    fn read(&mut self) -> Result<Frame, CaptureError>;

    fn describe(&self) -> String;
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("no usable camera among {0} candidate(s)")]
    NoDevice(usize),
    #[error("unknown capture mode '{0}', expected 'mjpeg' or 'polling'")]
    UnknownMode(String),
    #[error("HTTP request to camera failed: {0}")]
    Http(reqwest::Error),
    #[error("camera returned HTTP {0}")]
    HttpStatus(u16),
    #[error("camera stream ended")]
    StreamEnded,
    #[error("no frame within {0:?}")]
    Timeout(Duration),
    #[error("undecodable frame: {0}")]
    Frame(#[from] FrameError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    Mjpeg,
    Polling,
}

impl FromStr for CaptureMode {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mjpeg" => Ok(Self::Mjpeg),
            "polling" => Ok(Self::Polling),
            other => Err(CaptureError::UnknownMode(other.to_string())),
        }
    }
}

/// JPEG bytes as they came off the wire.
#[derive(Debug)]
pub(crate) struct RawFrame {
    jpeg: Vec<u8>,
    captured_at_ms: i64,
    seq: u64,
}

/// Consecutive undecodable frames tolerated before the stream counts as broken.
const MAX_CORRUPT_FRAMES: u32 = 10;

pub struct HttpCamera {
    url: String,
    runtime: Handle,
    rx: mpsc::Receiver<Result<RawFrame, CaptureError>>,
    task: JoinHandle<()>,
    /// First frame read during probing, returned by the next `read`.
    pending: Option<Frame>,
}

impl HttpCamera {
    /// `poll_interval` is only used in polling mode.
    pub fn open(url: &str, mode: CaptureMode, poll_interval: Duration, runtime: &Handle) -> Self {
        let (tx, rx) = mpsc::channel(2);
        let task = match mode {
            CaptureMode::Mjpeg => runtime.spawn(mjpeg::run_mjpeg_stream(url.to_string(), tx)),
            CaptureMode::Polling => {
                runtime.spawn(mjpeg::run_polling(url.to_string(), poll_interval, tx))
            }
        };
        Self {
            url: url.to_string(),
            runtime: runtime.clone(),
            rx,
            task,
            pending: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Wait at most `timeout` for a frame. Must not be called from inside the runtime.
    pub fn read_timeout(&mut self, timeout: Duration) -> Result<Frame, CaptureError> {
        if let Some(frame) = self.pending.take() {
            return Ok(frame);
        }
        let rx = &mut self.rx;
        let received = self
            .runtime
            .block_on(async { tokio::time::timeout(timeout, rx.recv()).await })
            .map_err(|_| CaptureError::Timeout(timeout))?;
        Self::decode(received)
    }

    fn decode(received: Option<Result<RawFrame, CaptureError>>) -> Result<Frame, CaptureError> {
        let raw = received.ok_or(CaptureError::StreamEnded)??;
        Ok(Frame::from_jpeg(&raw.jpeg, raw.captured_at_ms, raw.seq)?)
    }
}

impl FrameSource for HttpCamera {
    fn read(&mut self) -> Result<Frame, CaptureError> {
        if let Some(frame) = self.pending.take() {
            return Ok(frame);
        }
        let mut corrupt = 0;
        loop {
            match Self::decode(self.rx.blocking_recv()) {
                Err(CaptureError::Frame(e)) if corrupt < MAX_CORRUPT_FRAMES => {
                    corrupt += 1;
                    warn!(error = %e, url = self.url, corrupt, "skipping undecodable frame");
                }
                other => return other,
            }
        }
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

impl fmt::Debug for HttpCamera {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpCamera")
            .field("url", &self.url)
            .field("pending", &self.pending.as_ref().map(|frame| frame.seq))
            .finish_non_exhaustive()
    }
}

impl Drop for HttpCamera {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Probe `config.candidates` in order and return the first camera that
/// delivers a decodable frame within the probe timeout.
pub fn open_first_available(
    config: &CameraConfig,
    runtime: &Handle,
) -> Result<HttpCamera, CaptureError> {
    let mode: CaptureMode = config.mode.parse()?;
    info!(candidates = config.candidates.len(), ?mode, "opening camera");

    for (idx, url) in config.candidates.iter().enumerate() {
        info!(idx, url, "testing camera");
        let mut camera = HttpCamera::open(url, mode, config.poll_interval(), runtime);
        match camera.read_timeout(config.probe_timeout()) {
            Ok(frame) => {
                info!(
                    idx,
                    url,
                    width = frame.width(),
                    height = frame.height(),
                    "using camera"
                );
                camera.pending = Some(frame);
                return Ok(camera);
            }
            Err(e) => {
                warn!(idx, url, error = %e, "camera unusable, trying next");
            }
        }
    }

    error!(candidates = ?config.candidates, "no camera could be opened");
    Err(CaptureError::NoDevice(config.candidates.len()))
}
