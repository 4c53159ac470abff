//! Per-tick glue between the pacer, the readback session and the pipe.
//!
//! The pipe (and with it the encoder process) is opened lazily on the
//! first tick after the recorder is enabled, and torn down again when it
//! is disabled or closed.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::encoder::EncoderCommand;
use crate::error::{CaptureError, Diagnostics, PipeError, TransmitFault};
use crate::pacer::{DEFAULT_DROP_WARNING_THRESHOLD, FramePacer, PaceDecision};
use crate::pipe::{DEFAULT_TRANSMIT_QUEUE_CAP, Pipe, PipeConfig};
use crate::readback::{DEFAULT_MAX_OUTSTANDING, ReadbackSource, Session, SessionStats};

// ── RecorderConfig ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub encoder: EncoderCommand,
    /// Soft cap on buffers waiting to be written.
    pub transmit_queue_cap: usize,
    /// Readbacks allowed in flight before captures are shed.
    pub max_outstanding: usize,
    /// Lagging ticks before the one-time slow-renderer warning.
    pub drop_warning_threshold: u64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            encoder: EncoderCommand::default(),
            transmit_queue_cap: DEFAULT_TRANSMIT_QUEUE_CAP,
            max_outstanding: DEFAULT_MAX_OUTSTANDING,
            drop_warning_threshold: DEFAULT_DROP_WARNING_THRESHOLD,
        }
    }
}

impl RecorderConfig {
    pub fn pipe_config(&self) -> PipeConfig {
        PipeConfig {
            transmit_queue_cap: self.transmit_queue_cap,
        }
    }
}

/// Opens a pipe for one recording session.
pub type PipeOpener = Box<dyn FnMut(&EncoderCommand, PipeConfig) -> Result<Pipe, PipeError> + Send>;

/// What one [`Recorder::tick`] did.
#[derive(Debug, Default)]
pub struct TickReport {
    /// `None` when the recorder is disabled or unavailable.
    pub decision: Option<PaceDecision>,
    /// Readbacks issued this tick.
    pub submitted: u32,
    /// Captures rejected because too many readbacks were in flight.
    pub shed: u32,
    /// Completed readbacks handed to the pipe this tick.
    pub forwarded: usize,
    /// Write failures reported by the transmit stage since the last tick.
    pub faults: Vec<TransmitFault>,
}

// ── Recorder ─────────────────────────────────────────────────────

pub struct Recorder<S: ReadbackSource> {
    config: RecorderConfig,
    session: Option<Session<S>>,
    pacer: FramePacer,
    pipe: Option<Pipe>,
    opener: PipeOpener,
    enabled: bool,
    unavailable: bool,
}

impl<S: ReadbackSource> Recorder<S> {
    /// Recorder that launches the configured encoder executable.
    pub fn new(config: RecorderConfig, source: S) -> Self {
        Self::with_opener(config, source, Box::new(Pipe::spawn))
    }

    /// Recorder with a custom way of opening the pipe.
    pub fn with_opener(config: RecorderConfig, source: S, opener: PipeOpener) -> Self {
        let pacer = FramePacer::new(config.encoder.frame_rate)
            .with_warning_threshold(config.drop_warning_threshold);
        let session = match Session::with_max_outstanding(source, config.max_outstanding) {
            Ok(session) => Some(session),
            Err(CaptureError::Unsupported) => {
                warn!("asynchronous readback is not supported; recording disabled");
                None
            }
            Err(e) => {
                warn!("readback session unavailable: {e}; recording disabled");
                None
            }
        };
        let unavailable = session.is_none();

        Self {
            config,
            session,
            pacer,
            pipe: None,
            opener,
            enabled: true,
            unavailable,
        }
    }

    /// Advance one render tick at logical time `now` (seconds).
    pub fn tick(&mut self, now: f64, image: &S::Image) -> Result<TickReport, PipeError> {
        let mut report = TickReport::default();
        if !self.enabled || self.unavailable {
            return Ok(report);
        }
        if self.pipe.is_none() && !self.open(now)? {
            return Ok(report);
        }
        let (Some(session), Some(pipe)) = (self.session.as_mut(), self.pipe.as_mut()) else {
            return Ok(report);
        };

        let decision = self.pacer.tick(now);
        report.decision = Some(decision);
        report.forwarded = session.drain_completed(pipe);

        for _ in 0..decision.frames() {
            match session.request_capture(image) {
                Ok(()) => report.submitted += 1,
                Err(_) => report.shed += 1,
            }
        }

        report.faults = pipe.sync_barrier();
        Ok(report)
    }

    fn open(&mut self, now: f64) -> Result<bool, PipeError> {
        match (self.opener)(&self.config.encoder, self.config.pipe_config()) {
            Ok(pipe) => {
                info!(
                    "recording to {} at {} fps",
                    self.config.encoder.output_path().display(),
                    self.config.encoder.frame_rate
                );
                self.pipe = Some(pipe);
                self.pacer.restart(now);
                Ok(true)
            }
            Err(PipeError::ExecutableNotFound(name)) => {
                warn!("encoder executable {name:?} not found; recording disabled");
                self.unavailable = true;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Enable or disable recording. Disabling closes the open session.
    pub fn set_enabled(&mut self, enabled: bool) -> Result<Option<Diagnostics>, PipeError> {
        self.enabled = enabled;
        if enabled {
            return Ok(None);
        }
        self.close()
    }

    /// Finish the current session: every readback still in flight is
    /// completed and written before the encoder is shut down.
    ///
    /// Returns `None` when no session was open. The next enabled tick
    /// starts a new one.
    pub fn close(&mut self) -> Result<Option<Diagnostics>, PipeError> {
        let Some(pipe) = self.pipe.take() else {
            return Ok(None);
        };
        if let Some(session) = self.session.as_mut() {
            let n = session.complete_all(&pipe);
            debug!("forwarded {n} outstanding readbacks before close");
        }
        self.pacer.reset();

        let diagnostics = pipe.close()?;
        if !diagnostics.stderr.trim().is_empty() {
            warn!("encoder reported:\n{}", diagnostics.stderr.trim_end());
        }
        if let Some(status) = diagnostics.status.filter(|s| !s.success()) {
            warn!("encoder exited with {status}");
        }
        info!(
            "recording finished: {} frames written, {} write faults",
            diagnostics.frames_written, diagnostics.faults
        );
        Ok(Some(diagnostics))
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether recording is impossible in this environment.
    pub fn is_unavailable(&self) -> bool {
        self.unavailable
    }

    pub fn is_recording(&self) -> bool {
        self.pipe.is_some()
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn pacer(&self) -> &FramePacer {
        &self.pacer
    }

    pub fn session_stats(&self) -> Option<SessionStats> {
        self.session.as_ref().map(Session::stats)
    }

    pub fn pipe(&self) -> Option<&Pipe> {
        self.pipe.as_ref()
    }
}

impl<S: ReadbackSource> Drop for Recorder<S> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("closing recorder on drop failed: {e}");
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
