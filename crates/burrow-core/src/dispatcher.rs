//! Frame dispatch
//!
//! Routes each reassembled tunnel frame to the inbound queue of the
//! connection named by its id prefix. Heartbeats and frames addressed
//! to unallocated ids are dropped silently: an unallocated id is the
//! normal race between a connection tearing down and frames still in
//! flight, not an error.

use bytes::Bytes;
use tracing::{debug, trace};

use burrow_proto::split_tagged;

use crate::engine::RelayEngine;

/// Route one reassembled frame.
///
/// Enqueueing awaits when the target queue is full, which
/// backpressures the tunnel receive loop onto a slow external client.
pub async fn dispatch(engine: &RelayEngine, frame: Bytes) {
    if burrow_proto::is_heartbeat(&frame) {
        trace!("dropping heartbeat frame");
        return;
    }

    let Some((conn_id, payload)) = split_tagged(&frame) else {
        debug!("dropping frame with no id separator ({} bytes)", frame.len());
        return;
    };

    if !engine.ids().is_allocated(conn_id) {
        debug!("dropping frame for unallocated connection {}", conn_id);
        return;
    }

    // Clone the sender out of the slot before awaiting; the queue may
    // close underneath us if the connection is torn down meanwhile.
    let Some(tx) = engine.inbound().sender(conn_id) else {
        debug!("dropping frame for connection {} with no queue", conn_id);
        return;
    };

    if tx.send(payload).await.is_err() {
        debug!("connection {} closed its queue mid-dispatch", conn_id);
    }
}
