//! Coordinator configuration

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PgError, PgResult};
use crate::types::NodeId;

/// Configuration for a group coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PgConfig {
    /// Identity of the local node; random when absent
    pub node_id: Option<NodeId>,
    /// How long `join`/`leave` wait for the owning node, in milliseconds
    pub call_timeout_ms: u64,
    /// `tracing` filter directive used by the binary
    pub log_filter: String,
}

impl Default for PgConfig {
    fn default() -> Self {
        PgConfig {
            node_id: None,
            call_timeout_ms: 5_000,
            log_filter: "info".to_string(),
        }
    }
}

impl PgConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> PgResult<Self> {
        let config: PgConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> PgResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Reject values the coordinator cannot run with
    pub fn validate(&self) -> PgResult<()> {
        if self.call_timeout_ms == 0 {
            return Err(PgError::Config("call_timeout_ms must be positive".to_string()));
        }
        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Set the node identity
    pub fn node_id(mut self, node_id: NodeId) -> Self {
        self.node_id = Some(node_id);
        self
    }

    /// Set the call timeout
    pub fn call_timeout_ms(mut self, millis: u64) -> Self {
        self.call_timeout_ms = millis;
        self
    }
}
