//! Delimiter-based frame codec
//!
//! A frame on the tunnel wire is a byte sequence terminated by the
//! literal delimiter `data_end;`. There is no escaping and no length
//! prefix: a payload containing the delimiter bytes desynchronizes the
//! stream. One-byte frames are heartbeats and carry no connection id.

use bytes::{BufMut, Bytes, BytesMut};

/// Literal frame terminator on the tunnel wire.
pub const FRAME_DELIMITER: &[u8] = b"data_end;";

/// Payload length of a heartbeat frame.
pub const HEARTBEAT_LEN: usize = 1;

/// Encode an outbound payload by appending the frame delimiter.
pub fn encode(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(payload.len() + FRAME_DELIMITER.len());
    buf.put_slice(payload);
    buf.put_slice(FRAME_DELIMITER);
    buf.freeze()
}

/// Whether a reassembled frame is a keep-alive heartbeat.
pub fn is_heartbeat(frame: &[u8]) -> bool {
    frame.len() == HEARTBEAT_LEN
}
