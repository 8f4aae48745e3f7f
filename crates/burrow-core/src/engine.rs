//! Shared relay context
//!
//! [`RelayEngine`] bundles every piece of state the listeners share:
//! the id pool, the buffer pool, the inbound queue registry, and the
//! single shared outbound queue feeding the tunnel. It is constructed
//! once at startup and passed around as `Arc<RelayEngine>`.

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex, MutexGuard};

use burrow_proto::ConnId;

use crate::buffer_pool::BufferPool;
use crate::id_pool::ConnIdPool;
use crate::inbound::InboundRegistry;

/// Sizing knobs for the relay engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Connection-id pool capacity.
    pub max_conns: usize,
    /// Shared outbound queue capacity.
    pub outbound_capacity: usize,
    /// Per-connection inbound queue capacity.
    pub inbound_capacity: usize,
    /// Size of each pooled read buffer.
    pub buffer_size: usize,
    /// Idle buffers kept around for reuse.
    pub buffer_pool_idle: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_conns: 2000,
            outbound_capacity: 10_000,
            inbound_capacity: 30,
            buffer_size: 1024 * 10 * 8,
            buffer_pool_idle: 64,
        }
    }
}

/// A tagged payload awaiting transmission to the internal agent.
///
/// `data` already carries the `"<peer-addr> <id>\r\n"` tag; a
/// zero-length `data` is the connection-closed marker.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub conn_id: ConnId,
    pub data: Bytes,
}

/// Shared multiplexing state for one relay process.
pub struct RelayEngine {
    ids: ConnIdPool,
    buffers: BufferPool,
    inbound: InboundRegistry,
    outbound_tx: mpsc::Sender<Outbound>,
    outbound_rx: Mutex<mpsc::Receiver<Outbound>>,
    config: EngineConfig,
}

impl RelayEngine {
    pub fn new(config: EngineConfig) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity);
        Self {
            ids: ConnIdPool::new(config.max_conns),
            buffers: BufferPool::new(config.buffer_size, config.buffer_pool_idle),
            inbound: InboundRegistry::new(config.max_conns, config.inbound_capacity),
            outbound_tx,
            outbound_rx: Mutex::new(outbound_rx),
            config,
        }
    }

    pub fn ids(&self) -> &ConnIdPool {
        &self.ids
    }

    pub fn buffers(&self) -> &BufferPool {
        &self.buffers
    }

    pub fn inbound(&self) -> &InboundRegistry {
        &self.inbound
    }

    /// Sender half of the shared outbound queue; cloned into every
    /// external reader task.
    pub fn outbound_sender(&self) -> mpsc::Sender<Outbound> {
        self.outbound_tx.clone()
    }

    /// Take the outbound receiver for the lifetime of one tunnel
    /// connection. Holding the guard makes that connection the sole
    /// drain of the queue; a later tunnel waits here until the
    /// previous one is gone.
    pub async fn lock_outbound(&self) -> MutexGuard<'_, mpsc::Receiver<Outbound>> {
        self.outbound_rx.lock().await
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl Default for RelayEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}
