//! Recorder service: drives the synthetic render loop and streams every
//! paced frame into the encoder.
//!
//! The loop itself is blocking (the pipe's barrier waits on a condvar),
//! so it runs on tokio's blocking pool while the async side only waits
//! for it and for Ctrl-C.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use framepipe_core::{Diagnostics, PipeError, Recorder, SessionStats};

use crate::config::RecorderFileConfig;
use crate::synthetic::{SimulatedReadback, TestPattern};

/// What one run of the service produced.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Render ticks executed.
    pub ticks: u64,
    /// Readbacks dropped because too many were in flight.
    pub shed: u64,
    /// Write failures observed while running.
    pub faults: u64,
    pub session: Option<SessionStats>,
    /// `None` when recording never started.
    pub diagnostics: Option<Diagnostics>,
}

// ── RecorderService ──────────────────────────────────────────────

pub struct RecorderService {
    config: RecorderFileConfig,
    running: Arc<AtomicBool>,
}

impl RecorderService {
    pub fn new(config: RecorderFileConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// A cloneable handle that stops the render loop when set to `false`.
    ///
    /// Clearing it before [`run`](Self::run) starts makes the run return
    /// without rendering.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Run until the configured duration has elapsed or the service is
    /// stopped.
    pub async fn run(&self) -> Result<RunSummary, Box<dyn std::error::Error + Send + Sync>> {
        let config = self.config.clone();
        let running = Arc::clone(&self.running);
        let runtime = Handle::current();

        let summary =
            tokio::task::spawn_blocking(move || render_loop(&config, &running, runtime)).await??;

        self.running.store(false, Ordering::SeqCst);
        Ok(summary)
    }
}

fn render_loop(
    config: &RecorderFileConfig,
    running: &AtomicBool,
    runtime: Handle,
) -> Result<RunSummary, PipeError> {
    let recorder_config = config.to_recorder_config();
    let size = recorder_config.encoder.size;
    let source = SimulatedReadback::new(
        runtime,
        Duration::from_millis(config.capture.readback_latency_ms),
        config.capture.readback_failure_every,
    );
    let mut recorder = Recorder::new(recorder_config, source);
    let mut pattern = TestPattern::new(size);

    let interval = Duration::from_secs_f64(1.0 / config.render_fps());
    let limit = (config.capture.duration_secs > 0.0)
        .then(|| Duration::from_secs_f64(config.capture.duration_secs));
    let mut summary = RunSummary::default();
    let start = Instant::now();

    info!(
        "render loop started: {size} at {} fps, recording at {} fps",
        config.render_fps(),
        recorder.config().encoder.frame_rate
    );

    while running.load(Ordering::SeqCst) {
        let elapsed = start.elapsed();
        if limit.is_some_and(|limit| elapsed >= limit) {
            break;
        }

        let image = pattern.render(summary.ticks);
        let report = recorder.tick(elapsed.as_secs_f64(), image)?;
        summary.ticks += 1;
        summary.shed += u64::from(report.shed);
        summary.faults += report.faults.len() as u64;

        if recorder.is_unavailable() {
            warn!("recording is unavailable; stopping render loop");
            break;
        }

        let next = interval * u32::try_from(summary.ticks).unwrap_or(u32::MAX);
        if let Some(sleep) = next.checked_sub(start.elapsed()) {
            std::thread::sleep(sleep);
        } else {
            debug!("render tick {} overran its slot", summary.ticks);
        }
    }

    summary.session = recorder.session_stats();
    summary.diagnostics = recorder.close()?;
    Ok(summary)
}

// ── Tests ────────────────────────────────────────────────────────
