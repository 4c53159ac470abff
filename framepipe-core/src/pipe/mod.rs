//! Frame-delivery pipe.
//!
//! ```text
//!  caller (render thread)        copy thread               transmit thread
//! ┌─────────────────────┐  copy  ┌──────────────┐ transmit ┌────────────────┐
//! │ Pipe::enqueue       │ ─────► │ CopyStage    │ ───────► │ TransmitStage  │ ──► encoder stdin
//! │ Pipe::sync_barrier  │  chan  │ pool.acquire │  chan    │ write + flush  │
//! └─────────────────────┘ (unb.) └──────────────┘ (cap 4)  │ pool.release   │
//!            ▲                                             └────────────────┘
//!            └──────────── status channel (TransmitFault) ◄────────┘
//! ```
//!
//! Both queues are single-consumer `tokio::sync::mpsc` channels driven
//! from plain OS threads; buffers move through them by ownership. The
//! transmit channel's capacity is the soft cap that
//! [`sync_barrier`](Pipe::sync_barrier) relies on.
//!
//! # Lifetime
//!
//! A [`Pipe`] must be finished with [`close`](Pipe::close). Dropping an
//! open pipe still tears everything down, but logs an error: a leaked
//! encoder is a bug in the caller.

mod copy;
mod transmit;

use std::io::Write;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;

use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::encoder::{EncoderCommand, EncoderProcess};
use crate::error::{Diagnostics, PipeError, TransmitFault};
use crate::frame::FrameData;
use crate::pool::{BufferPool, PoolStats};

/// Default soft cap on buffers waiting for the transmit thread.
pub const DEFAULT_TRANSMIT_QUEUE_CAP: usize = 4;

pub(crate) type Source = Box<dyn FrameData>;

// ── PipeConfig ───────────────────────────────────────────────────

/// Tuning for a [`Pipe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeConfig {
    /// Buffers allowed to wait for the transmit thread before the copy
    /// thread (and through it [`Pipe::sync_barrier`]) blocks. Minimum 1.
    pub transmit_queue_cap: usize,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            transmit_queue_cap: DEFAULT_TRANSMIT_QUEUE_CAP,
        }
    }
}

// ── Shared state ─────────────────────────────────────────────────

/// Snapshot of the two queue lengths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueDepths {
    /// Sources enqueued but not yet handed to the transmit queue.
    pub copy: usize,
    /// Buffers in the transmit queue, not counting one being written.
    pub transmit: usize,
    /// Whether the transmit thread is in the middle of a write.
    pub writing: bool,
}

#[derive(Debug, Default)]
pub(crate) struct Backlog {
    pub(crate) depths: QueueDepths,
    pub(crate) frames_written: u64,
    pub(crate) faults: u64,
}

/// State shared by the caller and both stage threads.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    backlog: Mutex<Backlog>,
    /// Signalled whenever any queue depth decreases.
    pub(crate) progress: Condvar,
    pub(crate) pool: BufferPool,
}

impl Shared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, Backlog> {
        self.backlog.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn wait<'a>(&self, guard: MutexGuard<'a, Backlog>) -> MutexGuard<'a, Backlog> {
        self.progress.wait(guard).unwrap_or_else(|e| e.into_inner())
    }
}

// ── Pipe ─────────────────────────────────────────────────────────

/// Owns the encoder, both stage threads, both queues and the pool.
pub struct Pipe {
    copy_tx: Option<mpsc::UnboundedSender<Source>>,
    copy_thread: Option<JoinHandle<()>>,
    transmit_thread: Option<JoinHandle<()>>,
    status_rx: mpsc::UnboundedReceiver<TransmitFault>,
    encoder: Option<EncoderProcess>,
    shared: Arc<Shared>,
    config: PipeConfig,
    closed: bool,
}

impl Pipe {
    /// Launch the encoder described by `cmd` and start both stages.
    pub fn spawn(cmd: &EncoderCommand, config: PipeConfig) -> Result<Self, PipeError> {
        let (process, stdin) = EncoderProcess::spawn(cmd)?;
        Self::from_process(process, stdin, config)
    }

    /// Start both stages on an already running encoder.
    pub fn from_process(
        process: EncoderProcess,
        stdin: std::process::ChildStdin,
        config: PipeConfig,
    ) -> Result<Self, PipeError> {
        match Self::start(Box::new(stdin), Some(process), config) {
            Ok(pipe) => Ok(pipe),
            Err((e, Some(process))) => {
                // Stages failed to start; stdin was dropped with them.
                if let Err(kill_err) = process.kill() {
                    warn!("failed to reap encoder after startup error: {kill_err}");
                }
                Err(e)
            }
            Err((e, None)) => Err(e),
        }
    }

    /// Start both stages writing into an arbitrary sink instead of a
    /// child process.
    pub fn with_writer<W>(writer: W, config: PipeConfig) -> Result<Self, PipeError>
    where
        W: Write + Send + 'static,
    {
        Self::start(Box::new(writer), None, config).map_err(|(e, _)| e)
    }

    fn start(
        writer: Box<dyn Write + Send>,
        encoder: Option<EncoderProcess>,
        config: PipeConfig,
    ) -> Result<Self, (PipeError, Option<EncoderProcess>)> {
        let config = PipeConfig {
            transmit_queue_cap: config.transmit_queue_cap.max(1),
        };
        let shared = Arc::new(Shared::default());
        let (copy_tx, copy_rx) = mpsc::unbounded_channel();
        let (transmit_tx, transmit_rx) = mpsc::channel(config.transmit_queue_cap);
        let (status_tx, status_rx) = mpsc::unbounded_channel();

        let transmit_thread = match transmit::TransmitStage::new(
            transmit_rx,
            writer,
            status_tx,
            Arc::clone(&shared),
        )
        .spawn()
        {
            Ok(handle) => handle,
            Err(e) => return Err((e, encoder)),
        };

        let copy_thread = match copy::CopyStage::new(copy_rx, transmit_tx, Arc::clone(&shared))
            .spawn()
        {
            Ok(handle) => handle,
            Err(e) => {
                // The transmit sender went down with the failed spawn, so
                // the transmit thread exits on its own.
                let _ = transmit_thread.join();
                return Err((e, encoder));
            }
        };

        debug!(
            "pipe started (transmit queue cap {})",
            config.transmit_queue_cap
        );

        Ok(Self {
            copy_tx: Some(copy_tx),
            copy_thread: Some(copy_thread),
            transmit_thread: Some(transmit_thread),
            status_rx,
            encoder,
            shared,
            config,
            closed: false,
        })
    }

    /// Queue a frame source for copying. Never blocks.
    pub fn enqueue<F: FrameData>(&self, source: F) {
        self.enqueue_boxed(Box::new(source));
    }

    /// Queue an already boxed frame source.
    pub fn enqueue_boxed(&self, source: Box<dyn FrameData>) {
        let Some(tx) = self.copy_tx.as_ref() else {
            return;
        };
        self.shared.lock().depths.copy += 1;
        if tx.send(source).is_err() {
            let mut backlog = self.shared.lock();
            backlog.depths.copy -= 1;
            drop(backlog);
            self.shared.progress.notify_all();
            warn!("copy stage is gone; frame dropped");
        }
    }

    /// Block until the copy queue is empty and the transmit queue holds
    /// at most `transmit_queue_cap` buffers.
    ///
    /// Called once per render tick to keep latency and memory bounded.
    /// Returns the transmit faults reported since the previous call.
    pub fn sync_barrier(&mut self) -> Vec<TransmitFault> {
        let cap = self.config.transmit_queue_cap;
        let mut backlog = self.shared.lock();
        while backlog.depths.copy > 0 || backlog.depths.transmit > cap {
            backlog = self.shared.wait(backlog);
        }
        drop(backlog);
        self.take_faults()
    }

    /// Block until every enqueued frame has been written (or failed).
    pub fn flush(&mut self) -> Vec<TransmitFault> {
        let mut backlog = self.shared.lock();
        while backlog.depths != QueueDepths::default() {
            backlog = self.shared.wait(backlog);
        }
        drop(backlog);
        self.take_faults()
    }

    /// Drain the status channel without blocking.
    pub fn take_faults(&mut self) -> Vec<TransmitFault> {
        let mut faults = Vec::new();
        while let Ok(fault) = self.status_rx.try_recv() {
            faults.push(fault);
        }
        faults
    }

    pub fn queue_depths(&self) -> QueueDepths {
        self.shared.lock().depths
    }

    pub fn frames_written(&self) -> u64 {
        self.shared.lock().frames_written
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.shared.pool.stats()
    }

    pub fn config(&self) -> PipeConfig {
        self.config
    }

    /// OS process id of the encoder, if there is one.
    pub fn encoder_id(&self) -> Option<u32> {
        self.encoder.as_ref().map(EncoderProcess::id)
    }

    /// Shut the pipe down and return what the encoder reported.
    ///
    /// Every frame already enqueued is still written. Then stdin is
    /// closed, the encoder is awaited (without timeout) and its stderr is
    /// returned verbatim.
    pub fn close(mut self) -> Result<Diagnostics, PipeError> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<Diagnostics, PipeError> {
        self.closed = true;

        // Closing the copy channel is the terminate signal: the copy
        // thread drains what is left, exits and drops the transmit
        // sender, which in turn lets the transmit thread drain and exit.
        drop(self.copy_tx.take());

        let copy_result = join_stage(self.copy_thread.take(), "copy");
        // The transmit thread owns the writer; joining it closes stdin.
        let transmit_result = join_stage(self.transmit_thread.take(), "transmit");

        let wait_result = self.encoder.take().map(EncoderProcess::wait).transpose();

        let mut diagnostics = Diagnostics::default();
        {
            let backlog = self.shared.lock();
            diagnostics.frames_written = backlog.frames_written;
            diagnostics.faults = backlog.faults;
        }
        self.shared.pool.clear();

        copy_result?;
        transmit_result?;
        if let Some((status, stderr)) = wait_result? {
            diagnostics.status = Some(status);
            diagnostics.stderr = stderr;
        }

        debug!(
            "pipe closed: {} frames written, {} faults",
            diagnostics.frames_written, diagnostics.faults
        );
        Ok(diagnostics)
    }
}

impl Drop for Pipe {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        error!("pipe dropped without close(); shutting the encoder down implicitly");
        if let Err(e) = self.shutdown() {
            error!("implicit pipe shutdown failed: {e}");
        }
    }
}

fn join_stage(handle: Option<JoinHandle<()>>, name: &'static str) -> Result<(), PipeError> {
    match handle {
        Some(h) => h.join().map_err(|_| PipeError::ThreadPanicked(name)),
        None => Ok(()),
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    /// Writer that appends into a shared buffer and can be gated.
    #[derive(Clone, Default)]
    struct SharedSink {
        bytes: Arc<Mutex<Vec<u8>>>,
        writes: Arc<Mutex<Vec<usize>>>,
    }

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.bytes.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
            self.writes.lock().unwrap().push(buf.len());
            self.write(buf).map(|_| ())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "encoder went away"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Source whose pixels cannot be read.
    struct Unreadable;

    impl FrameData for Unreadable {
        fn as_bytes(&self) -> &[u8] {
            panic!("readback mapping lost");
        }
    }

    #[test]
    fn frames_arrive_in_enqueue_order() {
        let sink = SharedSink::default();
        let mut pipe = Pipe::with_writer(sink.clone(), PipeConfig::default()).unwrap();
        for i in 0..20u8 {
            pipe.enqueue(vec![i; 3]);
        }
        assert!(pipe.flush().is_empty());

        let expected: Vec<u8> = (0..20u8).flat_map(|i| [i; 3]).collect();
        assert_eq!(*sink.bytes.lock().unwrap(), expected);

        let diag = pipe.close().unwrap();
        assert_eq!(diag.frames_written, 20);
        assert!(diag.status.is_none());
    }

    #[test]
    fn barrier_leaves_copy_queue_empty() {
        let mut pipe = Pipe::with_writer(SharedSink::default(), PipeConfig::default()).unwrap();
        for _ in 0..50 {
            pipe.enqueue(vec![1u8; 64]);
            pipe.sync_barrier();
            let depths = pipe.queue_depths();
            assert_eq!(depths.copy, 0);
            assert!(depths.transmit <= DEFAULT_TRANSMIT_QUEUE_CAP);
        }
        pipe.close().unwrap();
    }

    #[test]
    fn write_failures_are_swallowed_and_reported() {
        let mut pipe = Pipe::with_writer(BrokenPipe, PipeConfig::default()).unwrap();
        pipe.enqueue(vec![0u8; 4]);
        pipe.enqueue(vec![0u8; 4]);
        let faults = pipe.flush();
        assert_eq!(faults.len(), 2);
        assert_eq!(faults[0].frame_index, 0);
        assert_eq!(faults[1].frame_index, 1);
        assert_eq!(faults[0].kind, io::ErrorKind::BrokenPipe);

        let diag = pipe.close().unwrap();
        assert_eq!(diag.faults, 2);
        assert_eq!(diag.frames_written, 0);
    }

    #[test]
    fn panicking_source_does_not_wedge_barrier() {
        let sink = SharedSink::default();
        let pipe = Pipe::with_writer(sink.clone(), PipeConfig::default()).unwrap();
        let shared = Arc::clone(&pipe.shared);

        let (done_tx, done_rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let mut pipe = pipe;
            pipe.enqueue(vec![1u8; 8]);
            pipe.enqueue(Unreadable);
            pipe.enqueue(vec![2u8; 8]);
            pipe.enqueue(vec![3u8; 8]);
            pipe.sync_barrier();
            let depths = pipe.queue_depths();
            let _ = done_tx.send((depths, pipe.close()));
        });

        let (depths, closed) = done_rx
            .recv_timeout(std::time::Duration::from_secs(10))
            .expect("barrier never returned");
        assert_eq!(depths.copy, 0);
        assert!(matches!(closed, Err(PipeError::ThreadPanicked("copy"))));
        // Close still cleaned up after the failed stage.
        assert_eq!(shared.pool.stats().free, 0);
        assert_eq!(*sink.bytes.lock().unwrap(), vec![1u8; 8]);
    }

    #[test]
    fn zero_cap_is_raised_to_one() {
        let pipe = Pipe::with_writer(
            SharedSink::default(),
            PipeConfig {
                transmit_queue_cap: 0,
            },
        )
        .unwrap();
        assert_eq!(pipe.config().transmit_queue_cap, 1);
        pipe.close().unwrap();
    }

    #[test]
    fn close_clears_pool_and_drains_pending_frames() {
        let sink = SharedSink::default();
        let pipe = Pipe::with_writer(sink.clone(), PipeConfig::default()).unwrap();
        for _ in 0..8 {
            pipe.enqueue(vec![9u8; 16]);
        }
        let shared = Arc::clone(&pipe.shared);
        let diag = pipe.close().unwrap();
        assert_eq!(diag.frames_written, 8);
        assert_eq!(sink.bytes.lock().unwrap().len(), 8 * 16);
        assert_eq!(shared.pool.stats().free, 0);
    }

    #[test]
    fn dropping_open_pipe_still_flushes() {
        let sink = SharedSink::default();
        {
            let pipe = Pipe::with_writer(sink.clone(), PipeConfig::default()).unwrap();
            pipe.enqueue(vec![5u8; 10]);
        }
        assert_eq!(*sink.writes.lock().unwrap(), vec![10]);
    }
}
