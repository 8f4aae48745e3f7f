//! Relay listeners
//!
//! The public-facing external listener and the tunnel listener for the
//! internal agent, plus the supervised-loop wrapper that keeps both
//! accept loops running across faults.

pub mod external;
pub mod supervisor;
pub mod tunnel;

pub use external::{ExternalServer, ExternalServerConfig, ExternalServerError};
pub use supervisor::supervise;
pub use tunnel::{TunnelServer, TunnelServerConfig, TunnelServerError};
