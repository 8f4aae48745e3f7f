//! Tunnel Wire Protocol
//!
//! This crate defines the framing used on the single relay <-> agent
//! connection: the delimiter codec, the stream reassembler that
//! reconstructs frames from raw socket reads, and the connection-id
//! tag parsing used to route frames back to external clients.

pub mod assembler;
pub mod frame;
pub mod tag;

pub use assembler::FrameAssembler;
pub use frame::{encode, is_heartbeat, FRAME_DELIMITER};
pub use tag::{encode_tag, split_tagged, ConnId};

/// Connection id meaning "no identifier"; never allocated.
pub const NO_CONN_ID: ConnId = 0;
