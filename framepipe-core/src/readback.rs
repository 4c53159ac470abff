//! Asynchronous readback scheduling.
//!
//! GPU readbacks complete out of order and with unpredictable latency,
//! but the encoder needs frames in submission order. [`Session`] keeps
//! outstanding requests in a FIFO ring and only ever forwards its head:
//!
//! ```text
//!  submitted:  [A] [B] [C]          A not done, B done
//!               ▲
//!               └── wait_for_completion(A), then forward A, B, ...
//! ```
//!
//! Forcing the head blocks the render thread. That latency is the price
//! of never writing frames out of order.

use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::error::CaptureError;
use crate::frame::FrameData;
use crate::pipe::Pipe;

/// Requests allowed in flight before new captures are shed.
pub const DEFAULT_MAX_OUTSTANDING: usize = 6;

// ── Collaborator traits ──────────────────────────────────────────

/// One outstanding readback.
///
/// Once done and error-free, [`FrameData::as_bytes`] yields the frame.
pub trait ReadbackRequest: FrameData {
    /// Non-blocking completion check.
    fn is_done(&self) -> bool;
    /// Whether the readback failed. Only meaningful once done.
    fn has_error(&self) -> bool;
    /// Block until the readback has finished.
    fn wait_for_completion(&mut self);
}

/// Facility that turns a rendered image into readback requests.
pub trait ReadbackSource {
    type Image: ?Sized;
    type Request: ReadbackRequest;

    /// Whether asynchronous readback is available at all.
    fn supports_async_readback(&self) -> bool {
        true
    }

    /// Start reading `image` back. Must not block.
    fn request_readback(&mut self, image: &Self::Image) -> Self::Request;
}

// ── Session ──────────────────────────────────────────────────────

/// Counters for one [`Session`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub submitted: u64,
    pub forwarded: u64,
    pub failed: u64,
    pub shed: u64,
    /// Times the head had to be force-completed to keep order.
    pub forced: u64,
}

/// Orders readbacks and feeds them to a [`Pipe`].
pub struct Session<S: ReadbackSource> {
    source: S,
    pending: VecDeque<S::Request>,
    max_outstanding: usize,
    stats: SessionStats,
}

impl<S: ReadbackSource> Session<S> {
    pub fn new(source: S) -> Result<Self, CaptureError> {
        Self::with_max_outstanding(source, DEFAULT_MAX_OUTSTANDING)
    }

    /// Fails with [`CaptureError::Unsupported`] when the source cannot
    /// read back asynchronously.
    pub fn with_max_outstanding(source: S, max_outstanding: usize) -> Result<Self, CaptureError> {
        if !source.supports_async_readback() {
            return Err(CaptureError::Unsupported);
        }
        Ok(Self {
            source,
            pending: VecDeque::with_capacity(max_outstanding),
            max_outstanding: max_outstanding.max(1),
            stats: SessionStats::default(),
        })
    }

    /// Issue a readback of `image`. Never blocks.
    ///
    /// With `max_outstanding` requests already pending the capture is
    /// shed instead of queued.
    pub fn request_capture(&mut self, image: &S::Image) -> Result<(), CaptureError> {
        if self.pending.len() >= self.max_outstanding {
            self.stats.shed += 1;
            warn!(
                "too many readback requests outstanding ({}); frame dropped",
                self.pending.len()
            );
            return Err(CaptureError::Backlogged {
                outstanding: self.pending.len(),
                max: self.max_outstanding,
            });
        }
        let request = self.source.request_readback(image);
        self.pending.push_back(request);
        self.stats.submitted += 1;
        Ok(())
    }

    /// Forward every request that is ready, in submission order.
    ///
    /// If the head is still running while a later request has finished,
    /// the head is waited on so the later one can follow it. Failed
    /// readbacks are logged and skipped. Returns the number of frames
    /// forwarded.
    pub fn drain_completed(&mut self, pipe: &Pipe) -> usize {
        let mut forwarded = 0;
        loop {
            let Some(head) = self.pending.front_mut() else {
                break;
            };

            if !head.is_done() {
                let later_done = self.pending.iter().skip(1).any(|r| r.is_done());
                if !later_done {
                    break;
                }
                self.stats.forced += 1;
                debug!("forcing readback completion to keep frame order");
                if let Some(head) = self.pending.front_mut() {
                    head.wait_for_completion();
                }
            }

            let Some(request) = self.pending.pop_front() else {
                break;
            };
            if request.has_error() {
                self.stats.failed += 1;
                warn!("readback error detected; frame dropped");
                continue;
            }
            pipe.enqueue(request);
            self.stats.forwarded += 1;
            forwarded += 1;
        }
        forwarded
    }

    /// Wait for every outstanding request, then forward them all.
    pub fn complete_all(&mut self, pipe: &Pipe) -> usize {
        for request in self.pending.iter_mut().filter(|r| !r.is_done()) {
            request.wait_for_completion();
        }
        self.drain_completed(pipe)
    }

    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

// ── Tests ────────────────────────────────────────────────────────
