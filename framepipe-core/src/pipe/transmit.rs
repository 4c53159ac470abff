//! Transmit stage: pooled buffers → encoder stdin, strictly FIFO.

use std::io::Write;
use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::Shared;
use crate::error::{PipeError, TransmitFault};

pub(super) struct TransmitStage {
    rx: mpsc::Receiver<Vec<u8>>,
    writer: Box<dyn Write + Send>,
    status_tx: mpsc::UnboundedSender<TransmitFault>,
    shared: Arc<Shared>,
}

impl TransmitStage {
    pub(super) fn new(
        rx: mpsc::Receiver<Vec<u8>>,
        writer: Box<dyn Write + Send>,
        status_tx: mpsc::UnboundedSender<TransmitFault>,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            rx,
            writer,
            status_tx,
            shared,
        }
    }

    pub(super) fn spawn(self) -> Result<JoinHandle<()>, PipeError> {
        std::thread::Builder::new()
            .name("framepipe-transmit".into())
            .spawn(move || self.run())
            .map_err(|source| PipeError::ThreadSpawn {
                name: "transmit",
                source,
            })
    }

    fn run(mut self) {
        let mut frame_index: u64 = 0;
        loop {
            let Some(buf) = self.rx.blocking_recv() else {
                break;
            };

            {
                let mut backlog = self.shared.lock();
                backlog.depths.transmit -= 1;
                backlog.depths.writing = true;
            }
            // Room opened up in the transmit queue.
            self.shared.progress.notify_all();

            let result = self
                .writer
                .write_all(&buf)
                .and_then(|()| self.writer.flush());
            self.shared.pool.release(buf);

            {
                let mut backlog = self.shared.lock();
                backlog.depths.writing = false;
                match &result {
                    Ok(()) => backlog.frames_written += 1,
                    Err(_) => backlog.faults += 1,
                }
                if let Err(e) = &result {
                    // The encoder's own exit status is the real signal;
                    // only the first fault is worth a warning.
                    if backlog.faults == 1 {
                        warn!("write to encoder failed at frame {frame_index}: {e}");
                    } else {
                        debug!("write to encoder failed at frame {frame_index}: {e}");
                    }
                    let _ = self.status_tx.send(TransmitFault::new(frame_index, e));
                }
            }
            self.shared.progress.notify_all();
            frame_index += 1;
        }

        debug!("transmit stage finished after {frame_index} frames");
        // Dropping the writer closes the encoder's stdin.
    }
}
