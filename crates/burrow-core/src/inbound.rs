//! Per-connection inbound queues
//!
//! A fixed array of queue slots, indexed by connection id, carrying
//! tunnel-sourced payloads back to the owning external client. The
//! slot holds the sender half; the writer task owns the receiver.
//! Unregistering drops the sender, which closes the queue and wakes a
//! writer blocked on it.

use bytes::Bytes;
use std::sync::Mutex;
use tokio::sync::mpsc;

use burrow_proto::ConnId;

/// Registry of inbound queue handles, sized once at startup.
pub struct InboundRegistry {
    slots: Box<[Mutex<Option<mpsc::Sender<Bytes>>>]>,
    queue_capacity: usize,
}

impl InboundRegistry {
    pub fn new(max_conns: usize, queue_capacity: usize) -> Self {
        assert!(queue_capacity >= 1);
        let slots = (0..=max_conns).map(|_| Mutex::new(None)).collect();
        Self {
            slots,
            queue_capacity,
        }
    }

    /// Create the bounded queue for a freshly allocated id and hand
    /// back the receiver for the connection's writer task.
    ///
    /// A sender left behind by an unclean predecessor is replaced.
    pub fn register(&self, id: ConnId) -> mpsc::Receiver<Bytes> {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        *self.slot(id).lock().expect("inbound registry poisoned") = Some(tx);
        rx
    }

    /// Drop the queue for a released id, closing it.
    pub fn unregister(&self, id: ConnId) {
        self.slot(id).lock().expect("inbound registry poisoned").take();
    }

    /// Clone the sender for an id, if its queue exists.
    pub fn sender(&self, id: ConnId) -> Option<mpsc::Sender<Bytes>> {
        if id == 0 || id as usize >= self.slots.len() {
            return None;
        }
        self.slot(id)
            .lock()
            .expect("inbound registry poisoned")
            .clone()
    }

    fn slot(&self, id: ConnId) -> &Mutex<Option<mpsc::Sender<Bytes>>> {
        &self.slots[id as usize]
    }
}
