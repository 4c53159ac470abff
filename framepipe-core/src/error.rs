//! Domain-specific error types for the frame-delivery pipeline.
//!
//! Only the caller-facing operations (spawning the encoder, submitting
//! captures, closing the pipe) return errors. Failures inside the copy and
//! transmit threads never cross the pipeline boundary; they become log
//! records and [`TransmitFault`]s instead.

use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

/// Errors raised by [`Pipe`](crate::pipe::Pipe) and the encoder process.
#[derive(Debug, Error)]
pub enum PipeError {
    // ── Environment ──────────────────────────────────────────────
    /// The encoder executable could not be found on disk or in `PATH`.
    #[error("encoder executable not found: {0}")]
    ExecutableNotFound(String),

    /// The encoder process could not be started.
    #[error("failed to spawn encoder {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A standard stream of the child was not captured.
    #[error("encoder {0} stream was not piped")]
    MissingStdio(&'static str),

    // ── Threads ──────────────────────────────────────────────────
    /// A worker thread could not be created.
    #[error("failed to start {name} thread: {source}")]
    ThreadSpawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// A worker thread panicked before it could be joined.
    #[error("{0} thread panicked")]
    ThreadPanicked(&'static str),

    // ── Shutdown ─────────────────────────────────────────────────
    /// Waiting on the encoder process failed.
    #[error("failed to wait for encoder exit: {0}")]
    Wait(#[source] std::io::Error),
}

/// Errors raised when submitting a capture to the readback scheduler.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CaptureError {
    /// The readback source cannot read back asynchronously.
    #[error("asynchronous readback is not supported by this source")]
    Unsupported,

    /// Too many readbacks are outstanding; the frame was dropped.
    #[error("too many outstanding readback requests ({outstanding}, max {max})")]
    Backlogged { outstanding: usize, max: usize },
}

// ── TransmitFault ─────────────────────────────────────────────────

/// A swallowed write failure, reported on the pipe's status channel.
///
/// The transmit thread keeps running after a fault; the encoder's exit
/// status and stderr collected at close are the authoritative signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransmitFault {
    /// Zero-based index of the frame whose write failed.
    pub frame_index: u64,
    /// Kind of the underlying I/O error.
    pub kind: std::io::ErrorKind,
    /// Human-readable message of the underlying I/O error.
    pub message: String,
}

impl TransmitFault {
    pub(crate) fn new(frame_index: u64, err: &std::io::Error) -> Self {
        Self {
            frame_index,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl std::fmt::Display for TransmitFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "frame {} write failed: {}", self.frame_index, self.message)
    }
}

// ── Diagnostics ───────────────────────────────────────────────────

/// What the encoder left behind once the pipe was closed.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    /// Exit status of the encoder, `None` for in-process writers.
    pub status: Option<ExitStatus>,
    /// Everything the encoder wrote to stderr, verbatim.
    pub stderr: String,
    /// Frames fully written to the encoder.
    pub frames_written: u64,
    /// Writes that failed and were swallowed.
    pub faults: u64,
}

impl Diagnostics {
    /// True when the encoder exited cleanly and said nothing.
    pub fn is_clean(&self) -> bool {
        self.status.is_none_or(|s| s.success()) && self.stderr.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = PipeError::ExecutableNotFound("ffmpeg".into());
        assert!(e.to_string().contains("ffmpeg"));

        let e = CaptureError::Backlogged {
            outstanding: 6,
            max: 6,
        };
        assert!(e.to_string().contains("6"));
    }

    #[test]
    fn fault_keeps_error_kind() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let fault = TransmitFault::new(3, &io_err);
        assert_eq!(fault.kind, std::io::ErrorKind::BrokenPipe);
        assert_eq!(fault.to_string(), "frame 3 write failed: pipe broke");
    }

    #[test]
    fn empty_diagnostics_are_clean() {
        assert!(Diagnostics::default().is_clean());
        let d = Diagnostics {
            stderr: "[rawvideo] warning\n".into(),
            ..Default::default()
        };
        assert!(!d.is_clean());
    }
}
