//! File-based configuration
//!
//! Optional JSON file providing defaults for the CLI flags; loaded
//! once at startup, never reloaded.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Settings a config file may provide; CLI flags override every field.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    /// Address both listeners bind on.
    pub bind_addr: Option<String>,
    /// Port for public client connections.
    pub external_port: Option<u16>,
    /// Port the internal agent connects to.
    pub tunnel_port: Option<u16>,
    /// Shared secret the agent must present.
    pub secret: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .context(format!("Failed to read config file: {:?}", path))?;
        serde_json::from_str(&json).context(format!("Failed to parse config file: {:?}", path))
    }
}
