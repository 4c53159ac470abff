//! # framepipe-core
//!
//! Streams rendered frames into an external encoder process without
//! stalling the render loop.
//!
//! This crate contains:
//! - **Pipe**: copy and transmit threads feeding the encoder's stdin, with
//!   a bounded transmit queue and a reusable buffer pool
//! - **Readback**: `Session`, which keeps asynchronous readbacks in
//!   submission order and sheds load when too many are in flight
//! - **Pacer**: `FramePacer`, deciding per tick whether to skip, capture,
//!   duplicate or fast-forward
//! - **Encoder**: presets, command line construction, executable lookup
//!   and the child process itself
//! - **Recorder**: the per-tick glue tying the above together
//! - **Error**: `thiserror`-based `PipeError` and `CaptureError`

pub mod encoder;
pub mod error;
pub mod frame;
pub mod pacer;
pub mod pipe;
pub mod pool;
pub mod readback;
pub mod recorder;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use encoder::{EncoderCommand, EncoderPreset, EncoderProcess, locate_executable};
pub use error::{CaptureError, Diagnostics, PipeError, TransmitFault};
pub use frame::{BYTES_PER_PIXEL, FrameData, FrameSize};
pub use pacer::{FramePacer, PaceDecision};
pub use pipe::{DEFAULT_TRANSMIT_QUEUE_CAP, Pipe, PipeConfig, QueueDepths};
pub use pool::{BufferPool, PoolStats};
pub use readback::{DEFAULT_MAX_OUTSTANDING, ReadbackRequest, ReadbackSource, Session, SessionStats};
pub use recorder::{PipeOpener, Recorder, RecorderConfig, TickReport};
