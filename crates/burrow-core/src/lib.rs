//! Relay engine
//!
//! Shared multiplexing state for the relay: the connection-id
//! allocator, the reusable buffer pool, the per-connection inbound
//! queues, the single shared outbound queue, and the dispatcher that
//! routes reassembled tunnel frames back to external clients. One
//! [`RelayEngine`] is built at startup and handed to every listener.

pub mod buffer_pool;
pub mod dispatcher;
pub mod engine;
pub mod id_pool;
pub mod inbound;

pub use buffer_pool::{BufferPool, PooledBuf};
pub use dispatcher::dispatch;
pub use engine::{EngineConfig, Outbound, RelayEngine};
pub use id_pool::ConnIdPool;
pub use inbound::InboundRegistry;
