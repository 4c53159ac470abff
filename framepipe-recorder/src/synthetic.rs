//! Synthetic renderer and simulated asynchronous readback.
//!
//! Stands in for a GPU: [`TestPattern`] draws moving colour bars into an
//! RGBA8 image, and [`SimulatedReadback`] returns each image after a
//! latency that varies per request, so completions regularly arrive out
//! of submission order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::trace;

use framepipe_core::{BYTES_PER_PIXEL, FrameData, FrameSize, ReadbackRequest, ReadbackSource};

// ── TestPattern ──────────────────────────────────────────────────

pub struct TestPattern {
    size: FrameSize,
    pixels: Vec<u8>,
}

impl TestPattern {
    pub fn new(size: FrameSize) -> Self {
        Self {
            size,
            pixels: vec![0; size.byte_len()],
        }
    }

    /// Draw frame `index` and return the image.
    pub fn render(&mut self, index: u64) -> &[u8] {
        let width = self.size.width as usize;
        let shift = (index * 4) as usize;
        for (i, px) in self.pixels.chunks_exact_mut(BYTES_PER_PIXEL).enumerate() {
            let x = i % width;
            let y = i / width;
            let bar = ((x + shift) / 64) as u8;
            px[0] = bar.wrapping_mul(37);
            px[1] = (y & 0xFF) as u8;
            px[2] = (index & 0xFF) as u8;
            px[3] = 0xFF;
        }
        &self.pixels
    }
}

// ── SimulatedReadback ────────────────────────────────────────────

#[derive(Default)]
struct Completion {
    pixels: OnceLock<Vec<u8>>,
    failed: AtomicBool,
    lock: Mutex<()>,
    ready: Condvar,
}

impl Completion {
    fn finish(&self, pixels: Vec<u8>, failed: bool) {
        self.failed.store(failed, Ordering::SeqCst);
        let _ = self.pixels.set(pixels);
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.ready.notify_all();
    }
}

/// Handle to one simulated readback.
pub struct SimulatedRequest {
    completion: Arc<Completion>,
}

impl FrameData for SimulatedRequest {
    fn as_bytes(&self) -> &[u8] {
        self.completion.pixels.get().map(Vec::as_slice).unwrap_or_default()
    }
}

impl ReadbackRequest for SimulatedRequest {
    fn is_done(&self) -> bool {
        self.completion.pixels.get().is_some()
    }

    fn has_error(&self) -> bool {
        self.completion.failed.load(Ordering::SeqCst)
    }

    fn wait_for_completion(&mut self) {
        let mut guard = self.completion.lock.lock().unwrap_or_else(|e| e.into_inner());
        while self.completion.pixels.get().is_none() {
            guard = self
                .completion
                .ready
                .wait(guard)
                .unwrap_or_else(|e| e.into_inner());
        }
    }
}

/// Readback source that completes requests on the tokio runtime.
pub struct SimulatedReadback {
    runtime: Handle,
    base_latency: Duration,
    failure_every: u64,
    issued: u64,
}

impl SimulatedReadback {
    pub fn new(runtime: Handle, base_latency: Duration, failure_every: u64) -> Self {
        Self {
            runtime,
            base_latency,
            failure_every,
            issued: 0,
        }
    }

    /// Latency of request `seq`: cycles through 4, 1, 3 and 2 times the
    /// base so neighbouring requests overtake each other.
    pub fn latency_of(&self, seq: u64) -> Duration {
        const PATTERN: [u32; 4] = [4, 1, 3, 2];
        self.base_latency * PATTERN[(seq % 4) as usize]
    }

    pub fn issued(&self) -> u64 {
        self.issued
    }
}

impl ReadbackSource for SimulatedReadback {
    type Image = [u8];
    type Request = SimulatedRequest;

    fn request_readback(&mut self, image: &[u8]) -> SimulatedRequest {
        let seq = self.issued;
        self.issued += 1;

        let completion = Arc::new(Completion::default());
        let latency = self.latency_of(seq);
        let failed = self.failure_every > 0 && (seq + 1) % self.failure_every == 0;
        // The GPU copy is a snapshot of the image at request time.
        let snapshot = image.to_vec();

        let done = Arc::clone(&completion);
        self.runtime.spawn(async move {
            tokio::time::sleep(latency).await;
            trace!("simulated readback {seq} finished after {latency:?}");
            if failed {
                done.finish(Vec::new(), true);
            } else {
                done.finish(snapshot, false);
            }
        });

        SimulatedRequest { completion }
    }
}

// ── Tests ────────────────────────────────────────────────────────
