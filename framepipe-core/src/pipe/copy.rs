//! Copy stage: readback results → pooled byte buffers.

use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, trace};

use super::{Shared, Source};
use crate::error::PipeError;

pub(super) struct CopyStage {
    rx: mpsc::UnboundedReceiver<Source>,
    tx: mpsc::Sender<Vec<u8>>,
    shared: Arc<Shared>,
}

impl CopyStage {
    pub(super) fn new(
        rx: mpsc::UnboundedReceiver<Source>,
        tx: mpsc::Sender<Vec<u8>>,
        shared: Arc<Shared>,
    ) -> Self {
        Self { rx, tx, shared }
    }

    pub(super) fn spawn(self) -> Result<JoinHandle<()>, PipeError> {
        std::thread::Builder::new()
            .name("framepipe-copy".into())
            .spawn(move || self.run())
            .map_err(|source| PipeError::ThreadSpawn {
                name: "copy",
                source,
            })
    }

    fn run(self) {
        let Self { rx, tx, shared } = self;
        let mut queue = Backlogged {
            rx,
            shared,
            in_flight: false,
        };
        let mut copied: u64 = 0;

        // `None` means the pipe closed the channel and everything queued
        // before that has been received.
        while let Some(source) = queue.rx.blocking_recv() {
            queue.in_flight = true;
            let buf = queue.shared.pool.acquire_copy(source.as_bytes());
            // The readback handle is no longer needed.
            drop(source);

            trace!("copied frame {copied} ({} bytes)", buf.len());
            forward(&queue.shared, &tx, buf);
            queue.in_flight = false;
            copied += 1;
        }
        debug!("copy stage finished after {copied} frames");
        // Dropping `tx` here closes the transmit queue.
    }
}

/// Move `buf` into the transmit queue, waiting while it is full.
///
/// The depth counters are updated under the same lock as the send so
/// the transmit thread never observes a buffer it has not been credited
/// for.
fn forward(shared: &Shared, tx: &mpsc::Sender<Vec<u8>>, mut buf: Vec<u8>) {
    let mut backlog = shared.lock();
    loop {
        match tx.try_send(buf) {
            Ok(()) => {
                backlog.depths.copy -= 1;
                backlog.depths.transmit += 1;
                break;
            }
            Err(TrySendError::Full(returned)) => {
                buf = returned;
                backlog = shared.wait(backlog);
            }
            Err(TrySendError::Closed(returned)) => {
                // Transmit thread is gone; nothing left to write to.
                backlog.depths.copy -= 1;
                shared.pool.release(returned);
                break;
            }
        }
    }
    drop(backlog);
    shared.progress.notify_all();
}

/// The copy queue together with its share of the backlog.
///
/// If the copy thread unwinds, every source it will never forward is
/// taken off `depths.copy` so barrier waiters are released.
struct Backlogged {
    rx: mpsc::UnboundedReceiver<Source>,
    shared: Arc<Shared>,
    in_flight: bool,
}

impl Drop for Backlogged {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            return;
        }
        // After `close` further sends fail and `enqueue` undoes its own
        // count; what is already queued is counted here.
        self.rx.close();
        let mut abandoned = usize::from(self.in_flight);
        while self.rx.try_recv().is_ok() {
            abandoned += 1;
        }

        let mut backlog = self.shared.lock();
        backlog.depths.copy -= abandoned;
        drop(backlog);
        self.shared.progress.notify_all();
        error!("copy stage panicked; {abandoned} frames abandoned");
    }
}
