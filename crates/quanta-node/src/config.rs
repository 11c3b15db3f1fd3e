//! Node configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Configuration for a full-node instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Root directory for all persistent data.
    pub data_dir: PathBuf,
    /// Log level filter string (e.g. "info", "quanta_node=debug").
    pub log_level: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("quanta");
        Self {
            data_dir,
            log_level: "info".to_string(),
        }
    }
}

impl NodeConfig {
    /// Path to the RocksDB chain database.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("chaindata")
    }
}
