//! Non-blocking periodic inference dispatch.
//!
//! The capture loop calls [`Dispatcher::tick`] once per frame. When the
//! interval has elapsed and no detector call is in flight, a snapshot of the
//! frame is handed to a task on the Tokio runtime; otherwise the tick is a
//! no-op. The loop never waits on the detector, and reads the latest result
//! through [`Dispatcher::snapshot`].

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::frame::{Frame, FrameError};

/// An external detection function. Called from a background task, at most
/// once at a time per dispatcher.
pub trait Detector: Send + Sync + 'static {
    type Output: Clone + Send + 'static;

    fn detect(&self, frame: Frame)
        -> impl Future<Output = Result<Self::Output, DetectError>> + Send;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "detector"
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    #[error("failed to prepare frame: {0}")]
    Frame(#[from] FrameError),
    #[error("detector request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("detector returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("unexpected detector response: {0}")]
    Response(String),
}

/// Result bookkeeping written by the worker, read by the render loop.
struct ResultSlot<T> {
    last_result: Option<T>,
    last_result_time: Option<Instant>,
    consecutive_failures: u32,
}

struct Shared<T> {
    busy: AtomicBool,
    slot: Mutex<ResultSlot<T>>,
}

impl<T> Shared<T> {
    fn slot(&self) -> MutexGuard<'_, ResultSlot<T>> {
        // A poisoned slot only means a worker panicked mid-update; the data is
        // still a complete previous value.
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Clears the busy flag when the worker finishes, including by panic.
struct BusyGuard<T>(Arc<Shared<T>>);

impl<T> Drop for BusyGuard<T> {
    fn drop(&mut self) {
        self.0.busy.store(false, Ordering::Release);
    }
}

/// Point-in-time view of the dispatch state for status display.
#[derive(Debug, Clone)]
pub struct DispatchSnapshot<T> {
    pub busy: bool,
    pub last_result: Option<T>,
    pub last_result_time: Option<Instant>,
    pub consecutive_failures: u32,
    /// Consecutive failures reached the configured warning threshold.
    pub failing: bool,
}

impl<T> DispatchSnapshot<T> {
    /// Age of the last stored result, `None` before the first success.
    pub fn result_age(&self, now: Instant) -> Option<Duration> {
        self.last_result_time
            .map(|t| now.saturating_duration_since(t))
    }
}

pub struct Dispatcher<D: Detector> {
    detector: Arc<D>,
    interval: Duration,
    last_dispatch: Instant,
    shared: Arc<Shared<D::Output>>,
    runtime: Handle,
    warn_after_failures: u32,
    dispatched: u64,
}

impl<D: Detector> Dispatcher<D> {
    /// The first dispatch happens one `interval` after creation.
    pub fn new(detector: D, interval: Duration, runtime: Handle) -> Self {
        Self {
            detector: Arc::new(detector),
            interval,
            last_dispatch: Instant::now(),
            shared: Arc::new(Shared {
                busy: AtomicBool::new(false),
                slot: Mutex::new(ResultSlot {
                    last_result: None,
                    last_result_time: None,
                    consecutive_failures: 0,
                }),
            }),
            runtime,
            warn_after_failures: 3,
            dispatched: 0,
        }
    }

    /// Consecutive failures before the snapshot reports `failing`. 0 disables it.
    pub fn with_failure_warning(mut self, warn_after_failures: u32) -> Self {
        self.warn_after_failures = warn_after_failures;
        self
    }

    /// Number of detector calls started so far.
    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }

    pub fn is_busy(&self) -> bool {
        self.shared.busy.load(Ordering::Acquire)
    }

    /// Start a detector call for `frame` if the interval has elapsed and the
    /// slot is free. Returns `true` when a call was started.
    pub fn tick(&mut self, now: Instant, frame: &Frame) -> bool {
        if now.saturating_duration_since(self.last_dispatch) < self.interval {
            return false;
        }
        if self
            .shared
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(seq = frame.seq, "detector still busy, skipping tick");
            return false;
        }

        self.last_dispatch = now;
        self.dispatched += 1;

        let snapshot = frame.clone();
        let detector = Arc::clone(&self.detector);
        let guard = BusyGuard(Arc::clone(&self.shared));
        let warn_after = self.warn_after_failures;

        debug!(
            seq = snapshot.seq,
            captured_at_ms = snapshot.captured_at_ms,
            dispatched = self.dispatched,
            "dispatching frame"
        );

        self.runtime.spawn(async move {
            let seq = snapshot.seq;
            let outcome = detector.detect(snapshot).await;
            let shared = &guard.0;
            let mut slot = shared.slot();
            match outcome {
                Ok(result) => {
                    slot.last_result = Some(result);
                    slot.last_result_time = Some(Instant::now());
                    slot.consecutive_failures = 0;
                }
                Err(e) => {
                    slot.consecutive_failures += 1;
                    let failures = slot.consecutive_failures;
                    if warn_after > 0 && failures == warn_after {
                        warn!(
                            detector = detector.name(),
                            error = %e,
                            failures,
                            "detector keeps failing, showing stale result"
                        );
                    } else {
                        warn!(detector = detector.name(), error = %e, seq, "detector call failed");
                    }
                }
            }
            drop(slot);
            drop(guard);
        });

        true
    }

    pub fn snapshot(&self) -> DispatchSnapshot<D::Output> {
        let busy = self.is_busy();
        let slot = self.shared.slot();
        DispatchSnapshot {
            busy,
            last_result: slot.last_result.clone(),
            last_result_time: slot.last_result_time,
            consecutive_failures: slot.consecutive_failures,
            failing: self.warn_after_failures > 0
                && slot.consecutive_failures >= self.warn_after_failures,
        }
    }
}
