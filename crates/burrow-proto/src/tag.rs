//! Connection-id tagging
//!
//! Frames crossing the tunnel carry a connection id so both sides can
//! demultiplex. Relay -> agent frames are tagged
//! `"<peer-addr> <id>\r\n" + payload`; agent -> relay frames are
//! `"<id>\r\n" + payload`. The id parser is deliberately fail-open:
//! noise CR/LF bytes are skipped and anything else maps to id 0, which
//! is never allocated, so malformed frames fall out at the dispatcher.

use bytes::{BufMut, Bytes, BytesMut};

/// Connection identifier multiplexed over the tunnel. `0` is invalid.
pub type ConnId = u16;

/// Build the relay -> agent tag prefix followed by the payload.
pub fn encode_tag(peer_addr: &str, conn_id: ConnId, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(peer_addr.len() + 8 + payload.len());
    buf.put_slice(peer_addr.as_bytes());
    buf.put_slice(b" ");
    buf.put_slice(conn_id.to_string().as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(payload);
    buf.freeze()
}

/// Split an agent -> relay frame into its connection id and payload.
///
/// Returns `None` when the frame has no CRLF separator at all. A
/// malformed or out-of-range id prefix parses as id 0.
pub fn split_tagged(frame: &Bytes) -> Option<(ConnId, Bytes)> {
    let pos = frame.windows(2).position(|window| window == b"\r\n")?;
    let id = parse_conn_id(&frame[..pos]);
    let payload = frame.slice(pos + 2..);
    Some((id, payload))
}

/// Parse a decimal id prefix, skipping CR/LF noise bytes.
pub fn parse_conn_id(prefix: &[u8]) -> ConnId {
    let mut id: usize = 0;
    for &byte in prefix {
        match byte {
            b'\r' | b'\n' => continue,
            b'0'..=b'9' => id = id.saturating_mul(10).saturating_add((byte - b'0') as usize),
            _ => return 0,
        }
    }
    ConnId::try_from(id).unwrap_or(0)
}
