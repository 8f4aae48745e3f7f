//! Stream reassembly
//!
//! The tunnel socket hands us arbitrarily-sized chunks; frame
//! boundaries fall anywhere. [`FrameAssembler`] accumulates chunks and
//! re-emits complete delimiter-terminated frames, in arrival order,
//! with the delimiter stripped. Bytes after the last delimiter are
//! retained until the next chunk completes them.

use bytes::{Buf, Bytes, BytesMut};

use crate::frame::FRAME_DELIMITER;

/// Reconstructs frames from a raw byte stream.
///
/// One assembler per tunnel connection; state does not survive the
/// connection it was reading.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buf: BytesMut,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk read off the socket; returns every frame whose
    /// terminating delimiter has now been seen. Empty segments (a
    /// delimiter immediately following another) are skipped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = find_delimiter(&self.buf) {
            let frame = self.buf.split_to(pos).freeze();
            self.buf.advance(FRAME_DELIMITER.len());
            if !frame.is_empty() {
                frames.push(frame);
            }
        }
        frames
    }

    /// Bytes buffered while waiting for a delimiter.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

fn find_delimiter(buf: &[u8]) -> Option<usize> {
    if buf.len() < FRAME_DELIMITER.len() {
        return None;
    }
    buf.windows(FRAME_DELIMITER.len())
        .position(|window| window == FRAME_DELIMITER)
}
