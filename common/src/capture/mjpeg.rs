use bytes::BytesMut;
use chrono::Utc;
use futures_util::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{CaptureError, RawFrame};

static SEQ_COUNTER: AtomicU64 = AtomicU64::new(0);

const BOUNDARY: &[u8] = b"--frame\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";

/// Parse state for the MJPEG multipart stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    /// Looking for the boundary marker `--frame\r\n`.
    SeekingBoundary,
    /// Found boundary, now looking for end of headers `\r\n\r\n`.
    SeekingHeaderEnd,
    /// Collecting JPEG bytes until the next boundary.
    CollectingJpeg,
}

/// Incremental splitter for `multipart/x-mixed-replace; boundary=frame` bodies.
///
/// Chunks may cut boundaries, headers and images at any byte; complete JPEG
/// payloads come out of [`MjpegParser::push`] as soon as the following
/// boundary has been seen.
pub struct MjpegParser {
    buffer: BytesMut,
    state: ParseState,
    jpeg_start: usize,
}

impl Default for MjpegParser {
    fn default() -> Self {
        Self::new()
    }
}

impl MjpegParser {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(256 * 1024),
            state: ParseState::SeekingBoundary,
            jpeg_start: 0,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);
        let mut images = Vec::new();

        loop {
            match self.state {
                ParseState::SeekingBoundary => {
                    if let Some(pos) = find_subsequence(&self.buffer, BOUNDARY) {
                        let _ = self.buffer.split_to(pos + BOUNDARY.len());
                        self.state = ParseState::SeekingHeaderEnd;
                    } else {
                        // Keep a tail in case the boundary spans chunks
                        if self.buffer.len() > BOUNDARY.len() {
                            let _ = self.buffer.split_to(self.buffer.len() - BOUNDARY.len());
                        }
                        break;
                    }
                }
                ParseState::SeekingHeaderEnd => {
                    if let Some(pos) = find_subsequence(&self.buffer, HEADER_END) {
                        let _ = self.buffer.split_to(pos + HEADER_END.len());
                        self.jpeg_start = 0;
                        self.state = ParseState::CollectingJpeg;
                    } else {
                        break;
                    }
                }
                ParseState::CollectingJpeg => {
                    let Some(pos) = find_subsequence(&self.buffer[self.jpeg_start..], BOUNDARY)
                    else {
                        // Skip already-scanned bytes next time
                        self.jpeg_start = self.buffer.len().saturating_sub(BOUNDARY.len());
                        break;
                    };
                    let jpeg_end = self.jpeg_start + pos;
                    // Strip trailing \r\n before boundary
                    let end = if jpeg_end >= 2
                        && self.buffer[jpeg_end - 2] == b'\r'
                        && self.buffer[jpeg_end - 1] == b'\n'
                    {
                        jpeg_end - 2
                    } else {
                        jpeg_end
                    };
                    let jpeg_data = self.buffer[..end].to_vec();
                    let _ = self.buffer.split_to(jpeg_end + BOUNDARY.len());
                    if !jpeg_data.is_empty() {
                        images.push(jpeg_data);
                    }
                    self.state = ParseState::SeekingHeaderEnd;
                }
            }
        }

        images
    }
}

fn http_client() -> Result<reqwest::Client, CaptureError> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(CaptureError::Http)
}

fn next_frame(jpeg: Vec<u8>) -> RawFrame {
    RawFrame {
        jpeg,
        captured_at_ms: Utc::now().timestamp_millis(),
        seq: SEQ_COUNTER.fetch_add(1, Ordering::Relaxed),
    }
}

/// Hand a frame to the reader without waiting. A full channel means the
/// reader is behind; dropping keeps the display close to real time.
fn offer(tx: &mpsc::Sender<Result<RawFrame, CaptureError>>, frame: RawFrame) -> bool {
    match tx.try_send(Ok(frame)) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            debug!("reader behind, dropping frame");
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

/// Consume an MJPEG stream until it ends or the reader goes away.
pub(super) async fn run_mjpeg_stream(
    url: String,
    tx: mpsc::Sender<Result<RawFrame, CaptureError>>,
) {
    if let Err(e) = consume_stream(&url, &tx).await {
        let _ = tx.send(Err(e)).await;
    }
}

async fn consume_stream(
    url: &str,
    tx: &mpsc::Sender<Result<RawFrame, CaptureError>>,
) -> Result<(), CaptureError> {
    let client = http_client()?;
    info!(url, "connecting to MJPEG stream");
    let response = client.get(url).send().await.map_err(CaptureError::Http)?;

    if !response.status().is_success() {
        return Err(CaptureError::HttpStatus(response.status().as_u16()));
    }

    info!(status = %response.status(), url, "connected to MJPEG stream");

    let mut byte_stream = response.bytes_stream();
    let mut parser = MjpegParser::new();

    while let Some(chunk) = byte_stream.next().await {
        let chunk = chunk.map_err(CaptureError::Http)?;
        for jpeg in parser.push(&chunk) {
            if !offer(tx, next_frame(jpeg)) {
                debug!(url, "reader closed, stopping stream");
                return Ok(());
            }
        }
    }

    Err(CaptureError::StreamEnded)
}

/// Polling fallback: fetch one JPEG per tick from a snapshot URL.
pub(super) async fn run_polling(
    url: String,
    interval: Duration,
    tx: mpsc::Sender<Result<RawFrame, CaptureError>>,
) {
    if let Err(e) = poll_snapshots(&url, interval, &tx).await {
        let _ = tx.send(Err(e)).await;
    }
}

async fn poll_snapshots(
    url: &str,
    interval: Duration,
    tx: &mpsc::Sender<Result<RawFrame, CaptureError>>,
) -> Result<(), CaptureError> {
    let client = http_client()?;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    info!(url, ?interval, "polling camera snapshots");

    loop {
        ticker.tick().await;

        let resp = client.get(url).send().await.map_err(CaptureError::Http)?;
        if !resp.status().is_success() {
            warn!(status = %resp.status(), url, "non-success response from camera");
            return Err(CaptureError::HttpStatus(resp.status().as_u16()));
        }
        let jpeg = resp.bytes().await.map_err(CaptureError::Http)?.to_vec();
        if !offer(tx, next_frame(jpeg)) {
            return Ok(());
        }
    }
}

/// Find the position of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(BOUNDARY);
        out.extend_from_slice(b"Content-Type: image/jpeg\r\n");
        out.extend_from_slice(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
        out.extend_from_slice(body);
        out.extend_from_slice(b"\r\n");
        out
    }

    #[test]
    fn emits_image_once_next_boundary_arrives() {
        let mut parser = MjpegParser::new();
        assert!(parser.push(&part(b"\xFF\xD8first\xFF\xD9")).is_empty());
        let images = parser.push(&part(b"\xFF\xD8second\xFF\xD9"));
        assert_eq!(images, vec![b"\xFF\xD8first\xFF\xD9".to_vec()]);
    }

    #[test]
    fn handles_one_byte_chunks() {
        let mut body = part(b"AAAA");
        body.extend(part(b"BBBBBB"));
        body.extend(part(b"CC"));

        let mut parser = MjpegParser::new();
        let mut images = Vec::new();
        for byte in body {
            images.extend(parser.push(&[byte]));
        }
        assert_eq!(images, vec![b"AAAA".to_vec(), b"BBBBBB".to_vec()]);
    }

    #[test]
    fn skips_preamble_before_first_boundary() {
        let mut body = b"HTTP garbage that is not a part".to_vec();
        body.extend(part(b"JPEG"));
        body.extend_from_slice(BOUNDARY);

        let mut parser = MjpegParser::new();
        assert_eq!(parser.push(&body), vec![b"JPEG".to_vec()]);
    }

    #[test]
    fn empty_parts_are_dropped() {
        let mut body = part(b"");
        body.extend(part(b"X"));
        body.extend_from_slice(BOUNDARY);
        let mut parser = MjpegParser::new();
        assert_eq!(parser.push(&body), vec![b"X".to_vec()]);
    }

    #[test]
    fn find_subsequence_positions() {
        assert_eq!(find_subsequence(b"abc--frame\r\n", BOUNDARY), Some(3));
        assert_eq!(find_subsequence(b"abc", BOUNDARY), None);
    }
}
