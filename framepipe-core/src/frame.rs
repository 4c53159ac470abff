//! Shared frame types used between pipeline stages.
//!
//! The encoder consumes a headerless stream of tightly packed RGBA8
//! frames. Before the copy stage runs, a frame is still an external
//! handle (a completed readback); [`FrameData`] is the only view the
//! pipeline needs of it.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Bytes per RGBA8 pixel.
pub const BYTES_PER_PIXEL: usize = 4;

// ── FrameSize ────────────────────────────────────────────────────

/// Dimensions of every frame in one pipeline session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameSize {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
}

impl FrameSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Size of one RGBA8 frame on the wire.
    pub const fn byte_len(self) -> usize {
        self.width as usize * self.height as usize * BYTES_PER_PIXEL
    }
}

impl std::fmt::Display for FrameSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

// ── FrameData ────────────────────────────────────────────────────

/// Read access to the pixel bytes of a frame source.
///
/// The copy stage takes ownership of the source, copies
/// [`as_bytes`](Self::as_bytes) into a pooled buffer and drops it.
pub trait FrameData: Send + 'static {
    fn as_bytes(&self) -> &[u8];
}

impl FrameData for Vec<u8> {
    fn as_bytes(&self) -> &[u8] {
        self
    }
}

impl FrameData for Bytes {
    fn as_bytes(&self) -> &[u8] {
        self
    }
}

impl FrameData for Box<[u8]> {
    fn as_bytes(&self) -> &[u8] {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgba_frame_len() {
        assert_eq!(FrameSize::new(1920, 1080).byte_len(), 1920 * 1080 * 4);
        assert_eq!(FrameSize::new(0, 1080).byte_len(), 0);
    }

    #[test]
    fn frame_size_display() {
        assert_eq!(FrameSize::new(640, 480).to_string(), "640x480");
    }

    #[test]
    fn bytes_sources_expose_payload() {
        let b = Bytes::from_static(b"rgba");
        assert_eq!(b.as_bytes(), b"rgba");
        let v = vec![1u8, 2, 3];
        assert_eq!(FrameData::as_bytes(&v), &[1, 2, 3]);
    }
}
